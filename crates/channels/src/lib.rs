//! Chat channel implementations for Concierge.
//!
//! Each channel relays messages between a chat platform and the pipeline.
//!
//! Available channels:
//! - **Telegram**: Telegram Bot API over long polling
//! - **CLI**: Interactive terminal chat (stdin/stdout)

pub mod cli;
pub mod telegram;

pub use cli::CliChannel;
pub use telegram::{TelegramChannel, split_message};
