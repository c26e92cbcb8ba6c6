use crate::model::{AggregateReport, PingStats, StatusTally};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub panelwatch_reports_sent_total: CounterVec,
    pub panelwatch_report_failures_total: CounterVec,
    pub panelwatch_sample_fetch_failures_total: Counter,
    pub panelwatch_ping_probe_failures_total: Counter,
    pub panelwatch_scrape_count_total: Counter,
    pub panelwatch_report_duration_ms: GaugeVec,
    pub panelwatch_servers: GaugeVec,
    pub panelwatch_cpu_percent_sum: Gauge,
    pub panelwatch_memory_used_bytes: Gauge,
    pub panelwatch_memory_limit_bytes: Gauge,
    pub panelwatch_disk_used_bytes: Gauge,
    pub panelwatch_disk_limit_bytes: Gauge,
    pub panelwatch_network_rx_bytes: Gauge,
    pub panelwatch_network_tx_bytes: Gauge,
    pub panelwatch_ping_loss_percent: Gauge,
    pub panelwatch_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let panelwatch_reports_sent_total = CounterVec::new(
            opts!("panelwatch_reports_sent_total", "Reports rendered, by kind"),
            &["kind"],
        )?;
        let panelwatch_report_failures_total = CounterVec::new(
            opts!(
                "panelwatch_report_failures_total",
                "Report cycles that ended in an error message, by kind"
            ),
            &["kind"],
        )?;
        let panelwatch_sample_fetch_failures_total = Counter::with_opts(opts!(
            "panelwatch_sample_fetch_failures_total",
            "Per-server resource fetches that failed"
        ))?;
        let panelwatch_ping_probe_failures_total = Counter::with_opts(opts!(
            "panelwatch_ping_probe_failures_total",
            "Ping invocations that produced no statistics"
        ))?;
        let panelwatch_scrape_count_total = Counter::with_opts(opts!(
            "panelwatch_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let panelwatch_report_duration_ms = GaugeVec::new(
            opts!(
                "panelwatch_report_duration_ms",
                "Duration of the last report cycle in milliseconds, by kind"
            ),
            &["kind"],
        )?;
        let panelwatch_servers = GaugeVec::new(
            opts!(
                "panelwatch_servers",
                "Servers by lifecycle bucket in the last status report"
            ),
            &["state"],
        )?;
        let panelwatch_cpu_percent_sum = Gauge::with_opts(opts!(
            "panelwatch_cpu_percent_sum",
            "Sum of absolute CPU usage across servers"
        ))?;
        let panelwatch_memory_used_bytes = Gauge::with_opts(opts!(
            "panelwatch_memory_used_bytes",
            "Memory used across servers"
        ))?;
        let panelwatch_memory_limit_bytes = Gauge::with_opts(opts!(
            "panelwatch_memory_limit_bytes",
            "Memory limit across servers"
        ))?;
        let panelwatch_disk_used_bytes = Gauge::with_opts(opts!(
            "panelwatch_disk_used_bytes",
            "Disk used across servers"
        ))?;
        let panelwatch_disk_limit_bytes = Gauge::with_opts(opts!(
            "panelwatch_disk_limit_bytes",
            "Disk limit across servers"
        ))?;
        let panelwatch_network_rx_bytes = Gauge::with_opts(opts!(
            "panelwatch_network_rx_bytes",
            "Network bytes received across servers"
        ))?;
        let panelwatch_network_tx_bytes = Gauge::with_opts(opts!(
            "panelwatch_network_tx_bytes",
            "Network bytes sent across servers"
        ))?;
        let panelwatch_ping_loss_percent = Gauge::with_opts(opts!(
            "panelwatch_ping_loss_percent",
            "Packet loss of the last ping probe in percent"
        ))?;
        let panelwatch_uptime_seconds = Gauge::with_opts(opts!(
            "panelwatch_uptime_seconds",
            "Seconds since the process started"
        ))?;

        register(&registry, &panelwatch_reports_sent_total)?;
        register(&registry, &panelwatch_report_failures_total)?;
        register(&registry, &panelwatch_sample_fetch_failures_total)?;
        register(&registry, &panelwatch_ping_probe_failures_total)?;
        register(&registry, &panelwatch_scrape_count_total)?;
        register(&registry, &panelwatch_report_duration_ms)?;
        register(&registry, &panelwatch_servers)?;
        register(&registry, &panelwatch_cpu_percent_sum)?;
        register(&registry, &panelwatch_memory_used_bytes)?;
        register(&registry, &panelwatch_memory_limit_bytes)?;
        register(&registry, &panelwatch_disk_used_bytes)?;
        register(&registry, &panelwatch_disk_limit_bytes)?;
        register(&registry, &panelwatch_network_rx_bytes)?;
        register(&registry, &panelwatch_network_tx_bytes)?;
        register(&registry, &panelwatch_ping_loss_percent)?;
        register(&registry, &panelwatch_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            panelwatch_reports_sent_total,
            panelwatch_report_failures_total,
            panelwatch_sample_fetch_failures_total,
            panelwatch_ping_probe_failures_total,
            panelwatch_scrape_count_total,
            panelwatch_report_duration_ms,
            panelwatch_servers,
            panelwatch_cpu_percent_sum,
            panelwatch_memory_used_bytes,
            panelwatch_memory_limit_bytes,
            panelwatch_disk_used_bytes,
            panelwatch_disk_limit_bytes,
            panelwatch_network_rx_bytes,
            panelwatch_network_tx_bytes,
            panelwatch_ping_loss_percent,
            panelwatch_uptime_seconds,
        }))
    }

    pub fn record_report(&self, kind: &str, elapsed: Duration) {
        self.panelwatch_reports_sent_total
            .with_label_values(&[kind])
            .inc();
        self.panelwatch_report_duration_ms
            .with_label_values(&[kind])
            .set(elapsed.as_millis() as f64);
    }

    pub fn record_failure(&self, kind: &str) {
        self.panelwatch_report_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn update_from_tally(&self, tally: &StatusTally) {
        for (state, value) in [
            ("online", tally.online),
            ("offline", tally.offline),
            ("transitioning", tally.transitioning),
            ("suspended", tally.suspended),
            ("unrecognized", tally.unrecognized),
            ("total", tally.total),
        ] {
            self.panelwatch_servers
                .with_label_values(&[state])
                .set(value as f64);
        }
    }

    pub fn update_from_aggregate(&self, report: &AggregateReport) {
        self.panelwatch_servers
            .with_label_values(&["total"])
            .set(report.total_servers as f64);
        self.panelwatch_sample_fetch_failures_total
            .inc_by(report.failed_samples as f64);
        self.panelwatch_cpu_percent_sum.set(report.cpu_percent_sum);
        self.panelwatch_memory_used_bytes
            .set(report.memory_used_sum as f64);
        self.panelwatch_memory_limit_bytes
            .set(report.memory_limit_sum as f64);
        self.panelwatch_disk_used_bytes.set(report.disk_used_sum as f64);
        self.panelwatch_disk_limit_bytes
            .set(report.disk_limit_sum as f64);
        self.panelwatch_network_rx_bytes
            .set(report.network_rx_sum as f64);
        self.panelwatch_network_tx_bytes
            .set(report.network_tx_sum as f64);
    }

    pub fn update_from_ping(&self, stats: &PingStats) {
        if let Some(loss) = stats.loss_percent_value() {
            self.panelwatch_ping_loss_percent.set(loss);
        }
    }

    pub fn inc_probe_failure(&self) {
        self.panelwatch_ping_probe_failures_total.inc();
        self.panelwatch_ping_loss_percent.set(100.0);
    }

    pub fn inc_scrape_count(&self) {
        self.panelwatch_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.panelwatch_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
