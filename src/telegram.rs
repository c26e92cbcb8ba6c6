use crate::config::TelegramConfig;
use crate::render::Embed;
use crate::report::{configuration_error, MessageSink, ReportKind, ReportService, SinkError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, ParseMode};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

#[derive(Clone)]
struct TelegramRuntime {
    cfg: TelegramConfig,
    service: Arc<ReportService>,
    allowed_chats: HashSet<i64>,
    limiter: Arc<Mutex<RateLimiter>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Ping,
    Report(ReportKind),
}

impl Command {
    fn from_text(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "ping" => Some(Self::Ping),
            "!status" | "!serverstatus" => Some(Self::Report(ReportKind::Status)),
            "!resourcetotal" | "!totalusage" => Some(Self::Report(ReportKind::Resources)),
            "!pingcheck" => Some(Self::Report(ReportKind::Ping)),
            _ => None,
        }
    }
}

pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send_html(&self, text: &str) -> Result<(), SinkError> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

pub async fn run_bot(
    bot: Bot,
    cfg: TelegramConfig,
    service: Arc<ReportService>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TelegramError> {
    let me = bot.get_me().await?;
    info!(username = ?me.username, "telegram bot connected");

    let runtime = TelegramRuntime {
        cfg: cfg.clone(),
        service,
        allowed_chats: cfg.allowed_chat_ids.iter().copied().collect(),
        limiter: Arc::new(Mutex::new(RateLimiter::new(cfg.rate_limit_per_minute))),
    };

    let handler = Update::filter_message().endpoint(handle_message);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![runtime])
        .build();

    let mut dispatch_handle = tokio::spawn(async move {
        dispatcher.dispatch().await;
    });

    tokio::select! {
        _ = shutdown.changed() => {
            dispatch_handle.abort();
            let _ = (&mut dispatch_handle).await;
            info!("telegram bot stopped");
            Ok(())
        }
        result = &mut dispatch_handle => {
            match result {
                Ok(()) => Ok(()),
                Err(join_err) if join_err.is_cancelled() => Ok(()),
                Err(join_err) => {
                    warn!(error = %join_err, "telegram task ended with an error");
                    Ok(())
                }
            }
        }
    }
}

async fn handle_message(bot: Bot, msg: Message, runtime: TelegramRuntime) -> ResponseResult<()> {
    if msg.from().is_some_and(|user| user.is_bot) {
        return Ok(());
    }
    let Some(command) = msg.text().and_then(Command::from_text) else {
        return Ok(());
    };

    let chat_id = msg.chat.id.0;
    if !should_handle_message(chat_id, &runtime.allowed_chats) {
        return Ok(());
    }

    if !consume_rate_limit(&runtime, chat_id).await {
        bot.send_message(msg.chat.id, "Too many requests. Try again in a minute.")
            .await?;
        return Ok(());
    }

    match command {
        Command::Ping => {
            bot.send_message(msg.chat.id, "pong")
                .reply_to_message_id(msg.id)
                .await?;
        }
        Command::Report(kind) => run_report(&bot, msg.chat.id, &runtime, kind).await?,
    }
    Ok(())
}

async fn run_report(
    bot: &Bot,
    origin: ChatId,
    runtime: &TelegramRuntime,
    kind: ReportKind,
) -> ResponseResult<()> {
    info!(chat_id = origin.0, report = kind.as_str(), "manual report requested");

    let Some(target) = report_target(kind, origin, runtime.cfg.channel_id) else {
        warn!(report = kind.as_str(), "telegram.channel_id is not configured");
        bot.send_message(origin, missing_channel_notice().to_html())
            .parse_mode(ParseMode::Html)
            .await?;
        return Ok(());
    };

    if let Some(ack) = acknowledgement(kind) {
        bot.send_message(origin, ack).await?;
    }

    let sink = TelegramSink::new(bot.clone(), target);
    if let Err(err) = runtime.service.send(kind, &sink).await {
        warn!(chat_id = target.0, report = kind.as_str(), error = %err, "failed to send report");
    }
    Ok(())
}

fn report_target(kind: ReportKind, origin: ChatId, channel_id: Option<i64>) -> Option<ChatId> {
    match kind {
        ReportKind::Ping => Some(origin),
        ReportKind::Status | ReportKind::Resources => channel_id.map(ChatId),
    }
}

fn missing_channel_notice() -> Embed {
    configuration_error(
        "No report channel is configured. Set <code>telegram.channel_id</code> in the config file.",
    )
}

fn acknowledgement(kind: ReportKind) -> Option<&'static str> {
    match kind {
        ReportKind::Status => Some("Checking server status..."),
        ReportKind::Resources => Some("Checking total server resource usage..."),
        ReportKind::Ping => None,
    }
}

async fn consume_rate_limit(runtime: &TelegramRuntime, chat_id: i64) -> bool {
    let now = now_unix();
    let mut limiter = runtime.limiter.lock().await;
    limiter.allow(chat_id, now)
}

pub fn should_handle_message(chat_id: i64, allowed: &HashSet<i64>) -> bool {
    allowed.is_empty() || allowed.contains(&chat_id)
}

#[derive(Debug)]
struct RateLimiter {
    limit_per_minute: u32,
    timestamps_by_chat: HashMap<i64, VecDeque<i64>>,
}

impl RateLimiter {
    fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            timestamps_by_chat: HashMap::new(),
        }
    }

    fn allow(&mut self, chat_id: i64, now_unix: i64) -> bool {
        self.timestamps_by_chat.retain(|_, queue| {
            while queue.front().is_some_and(|ts| now_unix - ts >= 60) {
                queue.pop_front();
            }
            !queue.is_empty()
        });

        let queue = self.timestamps_by_chat.entry(chat_id).or_default();
        if queue.len() >= self.limit_per_minute as usize {
            return false;
        }

        queue.push_back(now_unix);
        true
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Accent;

    #[test]
    fn commands_match_whole_message_case_insensitively() {
        assert_eq!(Command::from_text("ping"), Some(Command::Ping));
        assert_eq!(Command::from_text("PING"), Some(Command::Ping));
        assert_eq!(
            Command::from_text("!ServerStatus"),
            Some(Command::Report(ReportKind::Status))
        );
        assert_eq!(
            Command::from_text("!status"),
            Some(Command::Report(ReportKind::Status))
        );
        assert_eq!(
            Command::from_text("!TotalUsage"),
            Some(Command::Report(ReportKind::Resources))
        );
        assert_eq!(
            Command::from_text("!resourcetotal"),
            Some(Command::Report(ReportKind::Resources))
        );
        assert_eq!(
            Command::from_text("!pingcheck "),
            Some(Command::Report(ReportKind::Ping))
        );
        assert_eq!(Command::from_text("!status now"), None);
        assert_eq!(Command::from_text("ping me"), None);
        assert_eq!(Command::from_text("hello"), None);
    }

    #[test]
    fn report_target_routes_by_kind() {
        let origin = ChatId(5);
        assert_eq!(report_target(ReportKind::Ping, origin, None), Some(origin));
        assert_eq!(
            report_target(ReportKind::Status, origin, Some(-100)),
            Some(ChatId(-100))
        );
        assert_eq!(report_target(ReportKind::Resources, origin, None), None);
    }

    #[test]
    fn missing_channel_notice_names_the_setting() {
        assert_eq!(report_target(ReportKind::Status, ChatId(5), None), None);

        let notice = missing_channel_notice();
        assert_eq!(notice.accent(), Accent::Red);
        let text = notice.to_html();
        assert!(text.starts_with("🔴 <b>Configuration error</b>"));
        assert!(text.contains("<code>telegram.channel_id</code>"));
    }

    #[test]
    fn empty_allow_list_accepts_every_chat() {
        let empty = HashSet::new();
        assert!(should_handle_message(42, &empty));

        let allowed: HashSet<i64> = [100].into_iter().collect();
        assert!(should_handle_message(100, &allowed));
        assert!(!should_handle_message(101, &allowed));
    }

    #[test]
    fn rate_limiter_enforces_limit() {
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.allow(1, 10));
        assert!(limiter.allow(1, 20));
        assert!(!limiter.allow(1, 30));
        assert!(limiter.allow(2, 30));
        assert!(limiter.allow(1, 71));
    }

    #[test]
    fn rate_limiter_forgets_idle_chats() {
        let mut limiter = RateLimiter::new(5);
        assert!(limiter.allow(1, 0));
        assert!(limiter.allow(2, 10));
        assert!(limiter.allow(3, 100));
        assert_eq!(limiter.timestamps_by_chat.len(), 1);
        assert!(limiter.timestamps_by_chat.contains_key(&3));
    }
}
