//! CLI channel: interactive terminal-based chat.
//!
//! Reads lines from stdin and prints replies to stdout. Used by
//! `concierge run --cli` and `concierge ask`.

use async_trait::async_trait;
use concierge_core::channel::{Channel, InboundMessage};
use concierge_core::error::ChannelError;
use concierge_core::message::UserId;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Chat id used for every CLI message.
pub const CLI_CHAT_ID: &str = "cli_session";

/// Interactive CLI channel for terminal-based chat.
#[derive(Debug, Clone)]
pub struct CliChannel {
    user_id: UserId,
}

impl CliChannel {
    pub fn new() -> Self {
        Self::as_user("local_user")
    }

    /// Speak as a specific directory identity.
    pub fn as_user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Wrap one line of input as an inbound message.
    pub fn message(&self, text: impl Into<String>) -> InboundMessage {
        let mut msg = InboundMessage::private("cli", self.user_id.clone(), text).with_sender_name("User");
        msg.chat_id = CLI_CHAT_ID.into();
        msg
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let channel = self.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if is_exit(line) {
                            break;
                        }
                        if tx.send(Ok(channel.message(line))).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, _chat_id: &str, text: &str) -> Result<(), ChannelError> {
        println!("{text}");
        Ok(())
    }
}
