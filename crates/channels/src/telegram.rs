//! Telegram channel adapter.
//!
//! Long-polls the Bot API (`getUpdates`) for inbound messages and answers
//! with `sendMessage`. No webhook or public URL is needed. Replies longer
//! than Telegram's limit are split into chunks of [`MESSAGE_CHUNK_CHARS`].

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use concierge_core::channel::{Channel, InboundMessage};
use concierge_core::error::ChannelError;
use concierge_core::message::UserId;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Telegram rejects messages over 4096 characters; stay clear of it.
pub const MESSAGE_CHUNK_CHARS: usize = 4000;

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

// ── Bot API types ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
}

// ── Channel ───────────────────────────────────────────────────────────────

/// Telegram Bot API channel.
pub struct TelegramChannel {
    client: reqwest::Client,
    /// `{api_url}/bot{token}`; holds the secret
    bot_url: String,
    poll_timeout_secs: u64,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("bot_url", &"[REDACTED]")
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl TelegramChannel {
    pub fn new(api_url: &str, bot_token: &str, poll_timeout_secs: u64) -> Result<Self, ChannelError> {
        if bot_token.trim().is_empty() {
            return Err(ChannelError::NotConfigured("TELEGRAM_BOT_TOKEN is empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            bot_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token.trim()),
            poll_timeout_secs,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn from_config(config: &concierge_config::TelegramConfig) -> Result<Self, ChannelError> {
        let token = config
            .bot_token
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("TELEGRAM_BOT_TOKEN is not set".into()))?;
        Self::new(&config.api_url, token, config.poll_timeout_secs)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn post(&self, method: &str, body: serde_json::Value, timeout: Duration) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.bot_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: format!("{method}: {}", e.without_url()),
            })?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let description = response
            .json::<TgResponse<serde_json::Value>>()
            .await
            .ok()
            .and_then(|r| r.description)
            .unwrap_or_default();
        Err(ChannelError::DeliveryFailed {
            channel: "telegram".into(),
            reason: format!("{method} returned {status}: {description}"),
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::ConnectionLost("Telegram channel already started".into()));
        }
        info!(poll_timeout_secs = self.poll_timeout_secs, "Telegram channel starting (long polling)");

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(poll_loop(
            self.client.clone(),
            self.bot_url.clone(),
            self.poll_timeout_secs,
            Arc::clone(&self.running),
            tx,
        ));
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, MESSAGE_CHUNK_CHARS) {
            let body = serde_json::json!({
                "chat_id": chat_id_value(chat_id),
                "text": chunk,
                "disable_web_page_preview": true,
            });
            self.post("sendMessage", body, Duration::from_secs(30)).await?;
        }
        debug!(chat_id, chars = text.chars().count(), "Telegram message sent");
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id_value(chat_id),
            "action": "typing",
        });
        self.post("sendChatAction", body, Duration::from_secs(10)).await
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        let response = self
            .client
            .get(format!("{}/getMe", self.bot_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.without_url().to_string()))?;
        Ok(response.status().is_success())
    }
}

async fn poll_loop(
    client: reqwest::Client,
    bot_url: String,
    poll_timeout_secs: u64,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<Result<InboundMessage, ChannelError>>,
) {
    let mut offset: i64 = 0;
    let mut failures: u32 = 0;

    while running.load(Ordering::SeqCst) {
        match get_updates(&client, &bot_url, offset, poll_timeout_secs).await {
            Ok(updates) => {
                failures = 0;
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(message) = parse_update(update) else {
                        continue;
                    };
                    if tx.send(Ok(message)).await.is_err() {
                        debug!("Inbound receiver dropped, stopping poll loop");
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
            Err(e) => {
                failures += 1;
                let delay = reconnect_delay(failures);
                warn!(
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Telegram getUpdates failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    info!("Telegram poll loop stopped");
}

async fn get_updates(
    client: &reqwest::Client,
    bot_url: &str,
    offset: i64,
    timeout_secs: u64,
) -> Result<Vec<TgUpdate>, ChannelError> {
    let response: TgResponse<Vec<TgUpdate>> = client
        .get(format!("{bot_url}/getUpdates"))
        .query(&[
            ("offset", offset.to_string()),
            ("timeout", timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ])
        .timeout(Duration::from_secs(timeout_secs + 10))
        .send()
        .await
        .map_err(|e| ChannelError::ConnectionLost(e.without_url().to_string()))?
        .json()
        .await
        .map_err(|e| ChannelError::InvalidPayload(e.without_url().to_string()))?;

    if !response.ok {
        return Err(ChannelError::ConnectionLost(format!(
            "getUpdates error: {}",
            response.description.unwrap_or_default()
        )));
    }
    Ok(response.result.unwrap_or_default())
}

/// `1s, 2s, 4s, ...` capped at 30s.
fn reconnect_delay(failures: u32) -> Duration {
    Duration::from_secs(1u64 << failures.saturating_sub(1).min(5)).min(MAX_RECONNECT_DELAY)
}

/// Turn one update into an inbound message.
///
/// Non-message updates and messages from bots yield `None`. Messages
/// without text are passed on with empty text for the pipeline to ignore.
pub(crate) fn parse_update(update: TgUpdate) -> Option<InboundMessage> {
    let message = update.message?;
    if message.from.as_ref().is_some_and(|u| u.is_bot) {
        return None;
    }

    let is_group = matches!(message.chat.chat_type.as_str(), "group" | "supergroup" | "channel")
        || message.chat.id < 0;
    let sender_name = message.from.as_ref().map(|u| match (&u.last_name, &u.username) {
        (Some(last), _) => format!("{} {last}", u.first_name),
        (None, Some(username)) if u.first_name.is_empty() => format!("@{username}"),
        _ => u.first_name.clone(),
    });

    Some(InboundMessage {
        channel: "telegram".into(),
        user_id: message.from.as_ref().map(|u| UserId::from(u.id)),
        chat_id: message.chat.id.to_string(),
        sender_name,
        text: message.text.unwrap_or_default(),
        message_id: Some(message.message_id.to_string()),
        timestamp: Utc.timestamp_opt(message.date, 0).single().unwrap_or_else(Utc::now),
        is_group,
    })
}

/// Numeric chat ids go out as numbers, `@channel` names as strings.
fn chat_id_value(chat_id: &str) -> serde_json::Value {
    match chat_id.parse::<i64>() {
        Ok(id) => serde_json::Value::from(id),
        Err(_) => serde_json::Value::from(chat_id),
    }
}

/// Split `text` into chunks of at most `max_chars` characters, breaking at
/// the last newline in the back half of a chunk when there is one.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            if let Some(newline) = chars[start..end].iter().rposition(|c| *c == '\n') {
                if newline >= max_chars / 2 {
                    end = start + newline + 1;
                }
            }
        }
        chunks.push(chars[start..end].iter().collect());
        start = end;
    }
    chunks
}
