//! Channel trait: the abstraction over chat platforms.
//!
//! A Channel connects Concierge to a messaging platform (Telegram, or the
//! local CLI). It receives messages from users and sends responses back.
//! Outbound delivery is fire-and-forget from the pipeline's point of view:
//! a failed send is logged, never retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::message::UserId;

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Name of the channel this message arrived on
    pub channel: String,

    /// Sender identity; `None` when the platform did not say who sent it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// The text content
    pub text: String,

    /// Platform message id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    /// Group or supergroup chats get a redirect instead of an answer
    #[serde(default)]
    pub is_group: bool,
}

impl InboundMessage {
    /// A private-chat message where chat id and user id coincide.
    pub fn private(channel: impl Into<String>, user_id: impl Into<UserId>, text: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            channel: channel.into(),
            chat_id: user_id.to_string(),
            user_id: Some(user_id),
            sender_name: None,
            text: text.into(),
            message_id: None,
            timestamp: Utc::now(),
            is_group: false,
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn in_group(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = chat_id.into();
        self.is_group = true;
        self
    }

    /// Short preview for logs and events.
    pub fn preview(&self) -> String {
        self.text.chars().take(50).collect()
    }
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic and message
/// formatting. Authorization is not a channel concern; it belongs to the
/// directory.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram", "cli").
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    ///
    /// Returns a receiver that yields incoming messages. The channel
    /// implementation handles polling internally.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<InboundMessage, ChannelError>>,
        ChannelError,
    >;

    /// Send a message to a specific chat.
    async fn send(&self, chat_id: &str, text: &str) -> std::result::Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: &str) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check: is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}
