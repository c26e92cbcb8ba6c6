use crate::model::{PingStats, UNKNOWN};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

static WIN_LOSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Lost = \d+ \((\d+)% loss\)").expect("valid regex"));
static WIN_AVG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Average = (\d+)ms").expect("valid regex"));
static WIN_MIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Minimum = (\d+)ms").expect("valid regex"));
static WIN_MAX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Maximum = (\d+)ms").expect("valid regex"));
static WIN_SENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Sent = (\d+)").expect("valid regex"));
static WIN_RECEIVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Received = (\d+)").expect("valid regex"));
static WIN_LOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Lost = (\d+)").expect("valid regex"));

// iputils, busybox and BSD variants; the BSD one says "packets received" and
// iputils may insert ", +N errors" before the loss figure
static UNIX_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+) packets transmitted, (\d+) (?:packets )?received,(?: [^,]*,)* ([\d.]+)% packet loss",
    )
    .expect("valid regex")
});
static UNIX_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rtt|round-trip) [^=]*= ([\d.]+)/([\d.]+)/([\d.]+)").expect("valid regex")
});

const DEFAULT_SENT: i64 = 4;
const DEFAULT_RECEIVED: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    Unix,
}

impl OsFamily {
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    pub fn ping_args(self, host: &str, count: u32) -> Vec<String> {
        let count_flag = match self {
            Self::Windows => "-n",
            Self::Unix => "-c",
        };
        vec![count_flag.to_string(), count.to_string(), host.to_string()]
    }

    pub fn parse(self, output: &str) -> PingStats {
        match self {
            Self::Windows => parse_windows_ping(output),
            Self::Unix => parse_unix_ping(output),
        }
    }

    fn has_summary(self, output: &str) -> bool {
        match self {
            Self::Windows => WIN_SENT.is_match(output),
            Self::Unix => UNIX_SUMMARY.is_match(output),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ping: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ping did not finish within {0:?}")]
    Timeout(Duration),
    #[error("ping exited with code {code:?}: {detail}")]
    Failed { code: Option<i32>, detail: String },
}

pub struct PingProber {
    runner: Arc<dyn CommandRunner>,
    family: OsFamily,
    timeout: Duration,
}

impl PingProber {
    pub fn new(runner: Arc<dyn CommandRunner>, family: OsFamily, timeout: Duration) -> Self {
        Self {
            runner,
            family,
            timeout,
        }
    }

    pub async fn probe(&self, host: &str, count: u32) -> Result<PingStats, ProbeError> {
        let args = self.family.ping_args(host, count);
        debug!(host, count, ?args, "running ping");

        let output = time::timeout(self.timeout, self.runner.run("ping", &args))
            .await
            .map_err(|_elapsed| ProbeError::Timeout(self.timeout))??;

        if !output.success {
            // unreachable hosts still print a summary with 100% loss
            if self.family.has_summary(&output.stdout) {
                warn!(host, code = ?output.exit_code, "ping reported packet loss");
                return Ok(self.family.parse(&output.stdout));
            }
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(ProbeError::Failed {
                code: output.exit_code,
                detail,
            });
        }

        Ok(self.family.parse(&output.stdout))
    }
}

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn with_suffix(value: Option<&str>, suffix: &str) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| format!("{v}{suffix}"))
}

pub fn parse_windows_ping(output: &str) -> PingStats {
    PingStats {
        packets_sent: with_suffix(capture(&WIN_SENT, output), ""),
        packets_received: with_suffix(capture(&WIN_RECEIVED, output), ""),
        packets_lost: with_suffix(capture(&WIN_LOST, output), ""),
        loss_percent: with_suffix(capture(&WIN_LOSS, output), "%"),
        avg_latency: with_suffix(capture(&WIN_AVG, output), "ms"),
        min_latency: with_suffix(capture(&WIN_MIN, output), "ms"),
        max_latency: with_suffix(capture(&WIN_MAX, output), "ms"),
    }
}

pub fn parse_unix_ping(output: &str) -> PingStats {
    let summary = UNIX_SUMMARY.captures(output);
    let group = |idx: usize| {
        summary
            .as_ref()
            .and_then(|caps| caps.get(idx))
            .map(|m| m.as_str())
    };
    let sent = group(1);
    let received = group(2);
    let loss = group(3);

    let avg = UNIX_RTT
        .captures(output)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str());

    let sent_n = sent.and_then(|v| v.parse::<i64>().ok()).unwrap_or(DEFAULT_SENT);
    let received_n = received
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_RECEIVED);

    PingStats {
        packets_sent: with_suffix(sent, ""),
        packets_received: with_suffix(received, ""),
        packets_lost: (sent_n - received_n).to_string(),
        loss_percent: with_suffix(loss, "%"),
        avg_latency: with_suffix(avg, "ms"),
        min_latency: UNKNOWN.to_string(),
        max_latency: UNKNOWN.to_string(),
    }
}
