pub mod ping;
pub mod resources;
pub mod status;
