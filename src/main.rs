mod collectors;
mod config;
mod http;
mod metrics;
mod model;
mod panel;
mod render;
mod report;
mod telegram;

use axum::serve;
use clap::Parser;
use collectors::ping::{OsFamily, PingProber, SystemCommandRunner};
use config::Config;
use metrics::Metrics;
use panel::{PanelClient, PanelError};
use report::{LogSink, MessageSink, ReportKind, ReportService, StdoutSink};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telegram::TelegramSink;
use teloxide::types::ChatId;
use teloxide::Bot;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SCHEDULED_REPORTS: [ReportKind; 2] = [ReportKind::Resources, ReportKind::Ping];

#[derive(Parser, Debug)]
#[command(name = "panelwatch")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, conflicts_with = "telegram_off")]
    telegram_on: bool,
    #[arg(long, conflicts_with = "telegram_on")]
    telegram_off: bool,
    /// Render one report to stdout and exit.
    #[arg(long, value_enum)]
    once: Option<ReportKind>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.telegram_on {
        cfg.telegram.enabled = true;
    } else if cli.telegram_off {
        cfg.telegram.enabled = false;
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let service = match build_service(&cfg, metrics.clone()) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            error!(error = %err, "failed to build panel client");
            std::process::exit(1);
        }
    };

    if let Some(kind) = cli.once {
        if let Err(err) = service.send(kind, &StdoutSink).await {
            error!(error = %err, "failed to print report");
            std::process::exit(1);
        }
        return;
    }

    let bot = if cfg.telegram.enabled {
        match cfg.telegram.resolve_bot_token() {
            Some(token) => Some(Bot::new(token)),
            None => {
                error!(
                    env = %cfg.telegram.bot_token_env,
                    "telegram is enabled but no bot token was found in the environment or telegram.bot_token"
                );
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    info!(
        listen = %cfg.listen,
        report_interval_secs = cfg.report_interval_secs,
        telegram = cfg.telegram.enabled,
        "starting panelwatch"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let telegram_task = if let Some(bot) = bot.clone() {
        let telegram_cfg = cfg.telegram.clone();
        let service = service.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = telegram::run_bot(bot, telegram_cfg, service, shutdown).await {
                error!(error = %err, "telegram task failed");
            }
        }))
    } else {
        None
    };

    let scheduler_task = {
        let service = service.clone();
        let mut shutdown = shutdown_rx.clone();
        let sink = scheduled_sink(bot, cfg.telegram.channel_id);
        let period = Duration::from_secs(cfg.report_interval_secs);
        tokio::spawn(async move {
            // the first tick fires immediately, so reports go out at startup
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("scheduler received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        post_scheduled(&service, sink.as_deref()).await;
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = scheduler_task.await;
    if let Some(task) = telegram_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_service(cfg: &Config, metrics: Arc<Metrics>) -> Result<ReportService, PanelError> {
    let credentials = cfg.panel.resolve_credentials();
    if credentials.application_key.is_none() {
        warn!(env = %cfg.panel.application_api_key_env, "application API key not set; reports will show a configuration error");
    }
    if credentials.client_key.is_none() {
        warn!(env = %cfg.panel.client_api_key_env, "client API key not set; resource reports will show a configuration error");
    }

    let panel = PanelClient::new(&cfg.panel, credentials)?;
    let prober = PingProber::new(
        Arc::new(SystemCommandRunner),
        OsFamily::current(),
        Duration::from_secs(cfg.ping.timeout_secs),
    );
    Ok(ReportService::new(
        Arc::new(panel),
        prober,
        cfg.ping.clone(),
        metrics,
        Duration::from_secs(cfg.report_interval_secs),
    ))
}

fn scheduled_sink(bot: Option<Bot>, channel_id: Option<i64>) -> Option<Box<dyn MessageSink>> {
    match (bot, channel_id) {
        (Some(bot), Some(id)) => Some(Box::new(TelegramSink::new(bot, ChatId(id)))),
        (Some(_), None) => None,
        (None, _) => Some(Box::new(LogSink)),
    }
}

async fn post_scheduled(service: &ReportService, sink: Option<&dyn MessageSink>) {
    let Some(sink) = sink else {
        error!("telegram.channel_id is not configured; scheduled reports skipped");
        return;
    };

    let [first, second] = SCHEDULED_REPORTS;
    let (a, b) = tokio::join!(service.send(first, sink), service.send(second, sink));
    for (kind, result) in [(first, a), (second, b)] {
        if let Err(err) = result {
            warn!(report = kind.as_str(), error = %err, "failed to post scheduled report");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerStatus;
    use crate::report::testing::{ping_ok, server, service_with_metrics, RecordingSink, StubPanel};

    fn panel() -> StubPanel {
        StubPanel {
            servers: Ok(vec![server("a", ServerStatus::Running)]),
            missing: vec![],
        }
    }

    #[test]
    fn scheduled_sink_depends_on_bot_and_channel() {
        let bot = Bot::new("123:test");
        assert!(scheduled_sink(Some(bot.clone()), Some(-100)).is_some());
        assert!(scheduled_sink(Some(bot), None).is_none());
        assert!(scheduled_sink(None, None).is_some());
        assert!(scheduled_sink(None, Some(-100)).is_some());
    }

    #[tokio::test]
    async fn scheduled_cycle_posts_resource_and_ping_reports() {
        let metrics = Metrics::new().expect("metrics");
        let svc = service_with_metrics(panel(), ping_ok(), metrics);
        let sink = RecordingSink::default();

        post_scheduled(&svc, Some(&sink as &dyn MessageSink)).await;

        let sent = sink.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|m| m.contains("Server usage report")));
        assert!(sent.iter().any(|m| m.contains("Ping &amp; packet loss report")));
    }

    #[tokio::test]
    async fn scheduled_cycle_without_channel_sends_nothing() {
        let metrics = Metrics::new().expect("metrics");
        let svc = service_with_metrics(panel(), ping_ok(), metrics.clone());

        post_scheduled(&svc, None).await;

        let text = String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8");
        assert!(!text.contains("panelwatch_reports_sent_total{"));
    }
}
