use crate::collectors::ping::PingProber;
use crate::collectors::resources::aggregate;
use crate::collectors::status::{classify, severity};
use crate::config::PingConfig;
use crate::metrics::Metrics;
use crate::model::{AggregateReport, PingStats, StatusTally};
use crate::panel::{ApiScope, PanelApi, PanelError};
use crate::render::{code, format_bytes, format_millis, Accent, Embed};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use teloxide::utils::html;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportKind {
    Status,
    Resources,
    Ping,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Resources => "resources",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("telegram send failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_html(&self, text: &str) -> Result<(), SinkError>;
}

pub struct StdoutSink;

#[async_trait]
impl MessageSink for StdoutSink {
    async fn send_html(&self, text: &str) -> Result<(), SinkError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{text}")?;
        stdout.flush()?;
        Ok(())
    }
}

pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn send_html(&self, text: &str) -> Result<(), SinkError> {
        info!(text = %text, "report");
        Ok(())
    }
}

pub struct ReportService {
    panel: Arc<dyn PanelApi>,
    prober: PingProber,
    ping: PingConfig,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl ReportService {
    pub fn new(
        panel: Arc<dyn PanelApi>,
        prober: PingProber,
        ping: PingConfig,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            panel,
            prober,
            ping,
            metrics,
            interval,
        }
    }

    pub async fn render(&self, kind: ReportKind) -> Embed {
        match kind {
            ReportKind::Status => self.status_report().await,
            ReportKind::Resources => self.resource_report().await,
            ReportKind::Ping => self.ping_report().await,
        }
    }

    pub async fn send(&self, kind: ReportKind, sink: &dyn MessageSink) -> Result<(), SinkError> {
        let embed = self.render(kind).await;
        debug!(report = kind.as_str(), accent = ?embed.accent(), "report rendered");
        sink.send_html(&embed.to_html()).await
    }

    pub async fn status_report(&self) -> Embed {
        let kind = ReportKind::Status;
        let start = Instant::now();
        if let Err(missing) = self.panel.ensure_credentials(&[ApiScope::Application]) {
            return self.credentials_error(kind, &missing);
        }

        let servers = match self.panel.list_servers().await {
            Ok(servers) => servers,
            Err(err) => return self.upstream_error(kind, "Failed to load panel status", &err, start),
        };
        let latency = start.elapsed();

        let tally = classify(&servers);
        self.metrics.update_from_tally(&tally);
        self.metrics.record_report(kind.as_str(), latency);
        info!(
            total = tally.total,
            online = tally.online,
            offline = tally.offline,
            "status report"
        );
        render_status(&tally, latency)
    }

    pub async fn resource_report(&self) -> Embed {
        let kind = ReportKind::Resources;
        let start = Instant::now();
        if let Err(missing) = self
            .panel
            .ensure_credentials(&[ApiScope::Application, ApiScope::Client])
        {
            return self.credentials_error(kind, &missing);
        }

        let servers = match self.panel.list_servers().await {
            Ok(servers) => servers,
            Err(err) => {
                return self.upstream_error(kind, "Failed to collect resource totals", &err, start)
            }
        };

        let report = aggregate(&servers, self.panel.as_ref()).await;
        self.metrics.update_from_aggregate(&report);
        self.metrics.record_report(kind.as_str(), start.elapsed());
        info!(
            total = report.total_servers,
            failed = report.failed_samples,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "resource report"
        );
        render_resources(&report, self.interval)
    }

    pub async fn ping_report(&self) -> Embed {
        let kind = ReportKind::Ping;
        let start = Instant::now();
        match self.prober.probe(&self.ping.host, self.ping.count).await {
            Ok(stats) => {
                self.metrics.update_from_ping(&stats);
                self.metrics.record_report(kind.as_str(), start.elapsed());
                info!(host = %self.ping.host, loss = %stats.loss_percent, avg = %stats.avg_latency, "ping report");
                render_ping(&self.ping.host, &stats)
            }
            Err(err) => {
                error!(host = %self.ping.host, error = %err, "ping probe failed");
                self.metrics.inc_probe_failure();
                self.metrics.record_failure(kind.as_str());
                Embed::new("Failed to ping host", Accent::Red)
                    .description(code(&self.ping.host))
                    .timestamped("Checked at")
            }
        }
    }

    fn credentials_error(&self, kind: ReportKind, missing: &[PanelError]) -> Embed {
        for err in missing {
            error!(report = kind.as_str(), error = %err, "panel credentials missing");
        }
        self.metrics.record_failure(kind.as_str());
        let lines: Vec<String> = missing
            .iter()
            .map(|err| format!("• {}", html::escape(&err.to_string())))
            .collect();
        configuration_error(&lines.join("\n"))
    }

    fn upstream_error(
        &self,
        kind: ReportKind,
        title: &str,
        err: &PanelError,
        start: Instant,
    ) -> Embed {
        let elapsed = start.elapsed();
        warn!(report = kind.as_str(), error = %err, elapsed_ms = elapsed.as_millis() as u64, "panel request failed");
        self.metrics.record_failure(kind.as_str());
        Embed::new(title, Accent::Red)
            .description(format!(
                "The panel request did not succeed.\n<pre>{}</pre>",
                html::escape(&err.to_string())
            ))
            .field("API latency (at error)", code(&format_millis(elapsed)))
            .timestamped("Updated at")
    }
}

// detail_html must already be escaped
pub fn configuration_error(detail_html: &str) -> Embed {
    Embed::new("Configuration error", Accent::Red)
        .description(detail_html.to_string())
        .timestamped("Updated at")
}

fn render_status(tally: &StatusTally, latency: Duration) -> Embed {
    let mut embed = Embed::new("Panel status", severity(tally).into())
        .field("Total servers", code(&tally.total.to_string()))
        .field("Online", code(&tally.online.to_string()))
        .field("Offline", code(&tally.offline.to_string()))
        .field(
            "Other (starting/stopping/installing/suspended)",
            code(&(tally.transitioning + tally.suspended).to_string()),
        );
    if tally.unrecognized > 0 {
        embed = embed.field("Unrecognized state", code(&tally.unrecognized.to_string()));
    }
    embed
        .field("API latency", code(&format_millis(latency)))
        .timestamped("Updated at")
}

fn render_resources(report: &AggregateReport, interval: Duration) -> Embed {
    let mut embed = Embed::new("Server usage report", Accent::Blue)
        .description("CPU, memory, disk and network usage summed over all servers.")
        .field("Total servers", code(&report.total_servers.to_string()))
        .field(
            "Total CPU load",
            code(&format!("{:.2}%", report.cpu_percent_sum)),
        )
        .field(
            "Total memory",
            code(&format!(
                "{} / {}",
                format_bytes(report.memory_used_sum),
                format_bytes(report.memory_limit_sum)
            )),
        )
        .field(
            "Total disk",
            code(&format!(
                "{} / {}",
                format_bytes(report.disk_used_sum),
                format_bytes(report.disk_limit_sum)
            )),
        )
        .field("Network inbound", code(&format_bytes(report.network_rx_sum)))
        .field("Network outbound", code(&format_bytes(report.network_tx_sum)))
        .field("Collection time", code(&format_millis(report.elapsed)));
    if report.failed_samples > 0 {
        embed = embed.field(
            "Servers without data",
            code(&report.failed_samples.to_string()),
        );
    }
    embed
        .field(
            "",
            format!(
                "This report is posted every {}.",
                humantime::format_duration(interval)
            ),
        )
        .timestamped("Collected at")
}

fn render_ping(host: &str, stats: &PingStats) -> Embed {
    Embed::new("Ping & packet loss report", Accent::Green)
        .description(code(host))
        .field(
            "Ping",
            format!(
                "Minimum {}, Maximum {} (avg. {})",
                code(&stats.min_latency),
                code(&stats.max_latency),
                code(&stats.avg_latency)
            ),
        )
        .field(
            "Packet loss",
            format!(
                "Sent {}, Received {}, Lost {} ({})",
                code(&stats.packets_sent),
                code(&stats.packets_received),
                code(&stats.packets_lost),
                code(&stats.loss_percent)
            ),
        )
        .timestamped("Collected at")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::collectors::ping::{CommandOutput, CommandRunner, OsFamily};
    use crate::model::{ServerDescriptor, ServerResourceSample, ServerStatus};
    use crate::panel::SampleSource;
    use std::sync::Mutex;

    pub(crate) struct StubPanel {
        pub(crate) servers: Result<Vec<ServerDescriptor>, u16>,
        pub(crate) missing: Vec<ApiScope>,
    }

    #[async_trait]
    impl SampleSource for StubPanel {
        async fn fetch_sample(&self, server_id: &str) -> Result<ServerResourceSample, PanelError> {
            if server_id == "broken" {
                return Err(PanelError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(ServerResourceSample {
                server_id: server_id.to_string(),
                cpu_percent: 12.5,
                memory_used_bytes: 512 * 1024 * 1024,
                disk_used_bytes: 1024 * 1024 * 1024,
                network_rx_bytes: 1024,
                network_tx_bytes: 1536,
            })
        }
    }

    #[async_trait]
    impl PanelApi for StubPanel {
        fn ensure_credentials(&self, scopes: &[ApiScope]) -> Result<(), Vec<PanelError>> {
            let missing: Vec<PanelError> = scopes
                .iter()
                .filter(|s| self.missing.contains(*s))
                .map(|s| PanelError::MissingCredential {
                    scope: *s,
                    env_name: format!("{s}_KEY").to_uppercase(),
                })
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(missing)
            }
        }

        async fn list_servers(&self) -> Result<Vec<ServerDescriptor>, PanelError> {
            match &self.servers {
                Ok(servers) => Ok(servers.clone()),
                Err(status) => Err(PanelError::Status {
                    status: *status,
                    body: "<html>denied</html>".to_string(),
                }),
            }
        }
    }

    struct StubRunner(CommandOutput);

    #[async_trait]
    impl CommandRunner for StubRunner {
        async fn run(&self, _program: &str, _args: &[String]) -> std::io::Result<CommandOutput> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink(pub(crate) Mutex<Vec<String>>);

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send_html(&self, text: &str) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    pub(crate) fn server(id: &str, status: ServerStatus) -> ServerDescriptor {
        ServerDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            status,
            memory_limit_mib: 1024,
            disk_limit_mib: 2048,
        }
    }

    pub(crate) fn service(panel: StubPanel, ping_output: CommandOutput) -> ReportService {
        service_with_metrics(panel, ping_output, Metrics::new().expect("metrics"))
    }

    pub(crate) fn service_with_metrics(
        panel: StubPanel,
        ping_output: CommandOutput,
        metrics: Arc<Metrics>,
    ) -> ReportService {
        let prober = PingProber::new(
            Arc::new(StubRunner(ping_output)),
            OsFamily::Unix,
            Duration::from_secs(5),
        );
        ReportService::new(
            Arc::new(panel),
            prober,
            PingConfig::default(),
            metrics,
            Duration::from_secs(3600),
        )
    }

    pub(crate) fn ping_ok() -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            success: true,
            stdout: "4 packets transmitted, 4 received, 0% packet loss, time 3003ms\n\
                     rtt min/avg/max/mdev = 10.0/12.5/15.0/1.0 ms\n"
                .to_string(),
            stderr: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::collectors::ping::CommandOutput;
    use crate::model::ServerStatus;

    #[tokio::test]
    async fn resource_report_sums_and_flags_missing_samples() {
        let panel = StubPanel {
            servers: Ok(vec![
                server("a", ServerStatus::Running),
                server("broken", ServerStatus::Running),
            ]),
            missing: vec![],
        };
        let svc = service(panel, ping_ok());
        let sink = RecordingSink::default();

        svc.send(ReportKind::Resources, &sink).await.expect("send");

        let sent = sink.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let text = &sent[0];
        assert!(text.starts_with("🔵"));
        assert!(text.contains("<b>Total servers:</b> <code>2</code>"));
        assert!(text.contains("<code>12.50%</code>"));
        assert!(text.contains("<code>512 MiB / 2 GiB</code>"));
        assert!(text.contains("<code>1 GiB / 4 GiB</code>"));
        assert!(text.contains("<b>Servers without data:</b> <code>1</code>"));
        assert!(text.contains("posted every 1h"));
    }

    #[tokio::test]
    async fn status_report_uses_severity_accent() {
        let panel = StubPanel {
            servers: Ok(vec![
                server("a", ServerStatus::Offline),
                server("b", ServerStatus::Offline),
            ]),
            missing: vec![],
        };
        let embed = service(panel, ping_ok()).status_report().await;

        assert_eq!(embed.accent(), Accent::Red);
        let text = embed.to_html();
        assert!(text.contains("<b>Offline:</b> <code>2</code>"));
        assert!(!text.contains("Unrecognized"));
    }

    #[tokio::test]
    async fn missing_client_key_aborts_resource_report_only() {
        let panel = StubPanel {
            servers: Ok(vec![server("a", ServerStatus::Running)]),
            missing: vec![ApiScope::Client],
        };
        let svc = service(panel, ping_ok());

        let resources = svc.resource_report().await.to_html();
        assert!(resources.contains("Configuration error"));
        assert!(resources.contains("CLIENT_KEY"));

        let status = svc.status_report().await;
        assert_eq!(status.accent(), Accent::Green);
    }

    #[tokio::test]
    async fn inventory_failure_renders_escaped_error() {
        let panel = StubPanel {
            servers: Err(403),
            missing: vec![],
        };
        let text = service(panel, ping_ok()).resource_report().await.to_html();

        assert!(text.starts_with("🔴 <b>Failed to collect resource totals</b>"));
        assert!(text.contains("HTTP 403"));
        assert!(text.contains("&lt;html&gt;denied&lt;/html&gt;"));
        assert!(text.contains("API latency (at error)"));
    }

    #[tokio::test]
    async fn ping_report_renders_stats() {
        let panel = StubPanel {
            servers: Ok(vec![]),
            missing: vec![],
        };
        let text = service(panel, ping_ok()).ping_report().await.to_html();

        assert!(text.contains("(avg. <code>12.5ms</code>)"));
        assert!(text.contains("Minimum <code>unknown</code>"));
        assert!(text.contains("Lost <code>0</code> (<code>0%</code>)"));
    }

    #[tokio::test]
    async fn ping_failure_renders_terse_message_without_stats() {
        let panel = StubPanel {
            servers: Ok(vec![]),
            missing: vec![],
        };
        let failed = CommandOutput {
            exit_code: Some(2),
            success: false,
            stdout: String::new(),
            stderr: "ping: connect: Network is unreachable".to_string(),
        };
        let embed = service(panel, failed).ping_report().await;

        assert_eq!(embed.accent(), Accent::Red);
        let text = embed.to_html();
        assert!(text.contains("Failed to ping host"));
        assert!(!text.contains("Packet loss"));
    }
}
