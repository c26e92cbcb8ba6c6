use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    pub panel: PanelConfig,
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PanelConfig {
    pub base_url: String,
    #[serde(default = "default_application_api_key_env")]
    pub application_api_key_env: String,
    #[serde(default)]
    pub application_api_key: Option<String>,
    #[serde(default = "default_client_api_key_env")]
    pub client_api_key_env: String,
    #[serde(default)]
    pub client_api_key: Option<String>,
    #[serde(default = "default_panel_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PingConfig {
    #[serde(default = "default_ping_host")]
    pub host: String,
    #[serde(default = "default_ping_count")]
    pub count: u32,
    #[serde(default = "default_ping_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub channel_id: Option<i64>,
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            host: default_ping_host(),
            count: default_ping_count(),
            timeout_secs: default_ping_timeout_secs(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token_env: default_bot_token_env(),
            bot_token: None,
            channel_id: None,
            allowed_chat_ids: Vec::new(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PanelCredentials {
    pub application_key: Option<String>,
    pub client_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.report_interval_secs < 60 {
            return Err(ConfigError::Validation(
                "report_interval_secs must be >= 60".to_string(),
            ));
        }

        validate_panel(&self.panel)?;
        validate_ping(&self.ping)?;
        validate_telegram(&self.telegram)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl PanelConfig {
    pub fn resolve_credentials(&self) -> PanelCredentials {
        PanelCredentials {
            application_key: resolve_secret(
                &self.application_api_key_env,
                self.application_api_key.as_deref(),
            ),
            client_key: resolve_secret(&self.client_api_key_env, self.client_api_key.as_deref()),
        }
    }
}

impl TelegramConfig {
    pub fn resolve_bot_token(&self) -> Option<String> {
        resolve_secret(&self.bot_token_env, self.bot_token.as_deref())
    }
}

pub fn resolve_secret(env_name: &str, inline: Option<&str>) -> Option<String> {
    if let Ok(v) = std::env::var(env_name) {
        if !v.trim().is_empty() {
            return Some(v.trim().to_string());
        }
    }
    inline
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_panel(cfg: &PanelConfig) -> Result<(), ConfigError> {
    let url = cfg.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation(
            "panel.base_url must start with http:// or https://".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "panel.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_ping(cfg: &PingConfig) -> Result<(), ConfigError> {
    let host = cfg.host.as_str();
    if host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "ping.host must not be empty".to_string(),
        ));
    }
    // the host is passed as a positional argument to ping
    if host.starts_with('-') || host.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "ping.host '{host}' is not a valid host name or address"
        )));
    }
    if !(1..=100).contains(&cfg.count) {
        return Err(ConfigError::Validation(
            "ping.count must be in range 1..100".to_string(),
        ));
    }
    if cfg.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "ping.timeout_secs must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_telegram(cfg: &TelegramConfig) -> Result<(), ConfigError> {
    if cfg.rate_limit_per_minute < 1 {
        return Err(ConfigError::Validation(
            "telegram.rate_limit_per_minute must be >= 1".to_string(),
        ));
    }
    Ok(())
}

const fn default_report_interval_secs() -> u64 {
    3600
}

fn default_application_api_key_env() -> String {
    "PTERODACTYL_APPLICATION_API_KEY".to_string()
}

fn default_client_api_key_env() -> String {
    "PTERODACTYL_CLIENT_API_KEY".to_string()
}

const fn default_panel_timeout_ms() -> u64 {
    10_000
}

fn default_ping_host() -> String {
    "1.1.1.1".to_string()
}

const fn default_ping_count() -> u32 {
    4
}

const fn default_ping_timeout_secs() -> u64 {
    30
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

const fn default_rate_limit_per_minute() -> u32 {
    20
}
