//! Bot commands answered without touching the conversation store.

use std::time::Duration;

/// A recognized slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Unknown(String),
}

impl Command {
    /// Parse the first word of `text` as a command.
    ///
    /// Returns `None` for anything that does not start with `/`. A trailing
    /// `@botname` mention (as Telegram sends in some clients) is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        if !first.starts_with('/') {
            return None;
        }
        let name = first.split('@').next().unwrap_or(first).to_lowercase();
        Some(match name.as_str() {
            "/start" => Self::Start,
            "/help" => Self::Help,
            "/status" => Self::Status,
            _ => Self::Unknown(name),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Start => "/start",
            Self::Help => "/help",
            Self::Status => "/status",
            Self::Unknown(name) => name,
        }
    }
}

/// Reachability of one external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Connected,
    Degraded,
    Unreachable,
}

impl ComponentStatus {
    pub fn from_check<E>(result: Result<bool, E>) -> Self {
        match result {
            Ok(true) => Self::Connected,
            Ok(false) => Self::Degraded,
            Err(_) => Self::Unreachable,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
        }
    }
}

/// Everything `/status` reports.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub provider: String,
    pub provider_status: ComponentStatus,
    pub directory: String,
    pub directory_status: ComponentStatus,
    pub uptime: Duration,
    pub active_sessions: usize,
}

pub fn welcome_text() -> String {
    format!(
        concat!(
            "Concierge v{}\n\n",
            "I'm your AI assistant. I adapt to you personally based on your profile ",
            "and our conversation, and I focus on clear, outcome-oriented guidance.\n\n",
            "- Personalized answers\n",
            "- Conversation memory for the current session\n",
            "- Private conversations only (no group chats)\n\n",
            "Just send me a message to start our conversation!"
        ),
        env!("CARGO_PKG_VERSION")
    )
}

pub fn help_text() -> String {
    concat!(
        "Concierge help\n\n",
        "Commands:\n",
        "/start - Welcome message and introduction\n",
        "/help - Show this help information\n",
        "/status - System status and diagnostics\n\n",
        "How to use:\n",
        "- Send me any message to start chatting\n",
        "- I remember our recent conversation\n",
        "- Group messages are redirected to private chat\n\n",
        "Access is controlled by your entry in the employee directory. ",
        "If you don't have access, contact your administrator."
    )
    .to_string()
}

pub fn status_text(report: &StatusReport) -> String {
    format!(
        concat!(
            "Concierge system status\n\n",
            "Version: {}\n",
            "Model provider ({}): {}\n",
            "Directory ({}): {}\n",
            "Active conversations: {}\n",
            "Uptime: {}"
        ),
        env!("CARGO_PKG_VERSION"),
        report.provider,
        report.provider_status.label(),
        report.directory,
        report.directory_status.label(),
        report.active_sessions,
        format_uptime(report.uptime),
    )
}

pub fn unknown_text() -> String {
    "I don't recognize that command. Try /help for available commands, \
     or just send me a message to start our conversation."
        .to_string()
}

/// `1d 2h 3m 4s`, omitting leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, hours, minutes, seconds) = (total / 86_400, total / 3600 % 24, total / 60 % 60, total % 60);
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
