use std::time::Duration;

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Running,
    Offline,
    Starting,
    Stopping,
    Installing,
    Suspended,
    Unknown(Option<String>),
}

impl ServerStatus {
    pub fn from_panel(raw: Option<&str>) -> Self {
        match raw {
            Some("running") => Self::Running,
            Some("offline") => Self::Offline,
            Some("starting") => Self::Starting,
            Some("stopping") => Self::Stopping,
            Some("installing") => Self::Installing,
            Some("suspended") => Self::Suspended,
            other => Self::Unknown(other.map(str::to_string)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptor {
    pub id: String,
    pub display_name: String,
    pub status: ServerStatus,
    pub memory_limit_mib: u64,
    pub disk_limit_mib: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerResourceSample {
    pub server_id: String,
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub disk_used_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub total_servers: usize,
    pub failed_samples: usize,
    pub cpu_percent_sum: f64,
    pub memory_used_sum: u64,
    pub memory_limit_sum: u64,
    pub disk_used_sum: u64,
    pub disk_limit_sum: u64,
    pub network_rx_sum: u64,
    pub network_tx_sum: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTally {
    pub online: usize,
    pub offline: usize,
    pub transitioning: usize,
    pub suspended: usize,
    pub unrecognized: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Green,
    Amber,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingStats {
    pub packets_sent: String,
    pub packets_received: String,
    pub packets_lost: String,
    pub loss_percent: String,
    pub avg_latency: String,
    pub min_latency: String,
    pub max_latency: String,
}

impl PingStats {
    pub fn loss_percent_value(&self) -> Option<f64> {
        self.loss_percent.strip_suffix('%')?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_panel_maps_known_and_unknown_values() {
        assert_eq!(ServerStatus::from_panel(Some("running")), ServerStatus::Running);
        assert_eq!(
            ServerStatus::from_panel(Some("installing")),
            ServerStatus::Installing
        );
        assert_eq!(ServerStatus::from_panel(None), ServerStatus::Unknown(None));
        assert_eq!(
            ServerStatus::from_panel(Some("Running")),
            ServerStatus::Unknown(Some("Running".to_string()))
        );
    }

    #[test]
    fn loss_percent_value_ignores_sentinel() {
        let mut stats = PingStats {
            packets_sent: "4".to_string(),
            packets_received: "3".to_string(),
            packets_lost: "1".to_string(),
            loss_percent: "25%".to_string(),
            avg_latency: "20ms".to_string(),
            min_latency: UNKNOWN.to_string(),
            max_latency: UNKNOWN.to_string(),
        };
        assert_eq!(stats.loss_percent_value(), Some(25.0));
        stats.loss_percent = UNKNOWN.to_string();
        assert_eq!(stats.loss_percent_value(), None);
    }
}
