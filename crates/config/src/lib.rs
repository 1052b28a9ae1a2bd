//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Completion model
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub persona: PersonaConfig,

    /// User-visible texts for terminal states
    #[serde(default)]
    pub notices: NoticesConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("telegram", &self.telegram)
            .field("directory", &self.directory)
            .field("conversation", &self.conversation)
            .field("completion", &self.completion)
            .field("persona", &self.persona)
            .field("notices", &self.notices)
            .field("health", &self.health)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,

    /// Long-poll timeout passed to getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".into()
}
fn default_poll_timeout() -> u64 {
    25
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: default_telegram_api_url(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

/// Which directory implementation answers authorization lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryBackend {
    #[default]
    Notion,
    Static,
}

/// What the pipeline does when the directory cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// Treat the sender as unauthorized and send the unavailable notice
    #[default]
    FailClosed,
    /// Let the message through without a directory record
    FailOpen,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub backend: DirectoryBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notion_token: Option<String>,

    /// Notion database holding the employee records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,

    #[serde(default = "default_notion_api_url")]
    pub api_url: String,

    /// Static backend allowlist. Empty = deny all. ["*"] = allow all.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    #[serde(default)]
    pub on_lookup_failure: LookupFailurePolicy,
}

fn default_notion_api_url() -> String {
    "https://api.notion.com/v1".into()
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_lookup_timeout() -> u64 {
    10
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            backend: DirectoryBackend::default(),
            notion_token: None,
            database_id: None,
            api_url: default_notion_api_url(),
            allowed_users: vec![],
            cache_ttl_secs: default_cache_ttl(),
            lookup_timeout_secs: default_lookup_timeout(),
            on_lookup_failure: LookupFailurePolicy::default(),
        }
    }
}

impl DirectoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("backend", &self.backend)
            .field("notion_token", &redact(&self.notion_token))
            .field("database_id", &self.database_id)
            .field("api_url", &self.api_url)
            .field("allowed_users", &self.allowed_users)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("lookup_timeout_secs", &self.lookup_timeout_secs)
            .field("on_lookup_failure", &self.on_lookup_failure)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Turns kept per user (K)
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Estimated-token budget for the assembled prompt
    #[serde(default = "default_input_token_budget")]
    pub input_token_budget: usize,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Minimum gap between two messages from the same user
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_history_window() -> usize {
    20
}
fn default_input_token_budget() -> usize {
    6000
}
fn default_idle_timeout() -> u64 {
    3600
}
fn default_eviction_interval() -> u64 {
    300
}
fn default_min_interval_ms() -> u64 {
    2000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            input_token_budget: default_input_token_budget(),
            idle_timeout_secs: default_idle_timeout(),
            eviction_interval_secs: default_eviction_interval(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl ConversationConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_request_timeout() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    1000
}
fn default_backoff_max() -> u64 {
    30_000
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Markdown/text file holding the system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<String>,

    /// Inline system prompt (skips file loading)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticesConfig {
    #[serde(default = "default_unauthorized_notice")]
    pub unauthorized: String,

    #[serde(default = "default_group_redirect_notice")]
    pub group_redirect: String,

    /// Sent when the completion failed
    #[serde(default = "default_failure_notice")]
    pub failure: String,

    /// Sent when the directory could not be reached (fail-closed)
    #[serde(default = "default_unavailable_notice")]
    pub unavailable: String,
}

fn default_unauthorized_notice() -> String {
    concat!(
        "The 10x Output General Manager is available for the rare few. ",
        "For access, you may contact: ladiossato@gmail.com with the Subject: '10x GM AI Access'. ",
        "In your email, explain why you wish to have access to the General Manager.",
    )
    .into()
}
fn default_group_redirect_notice() -> String {
    "Please message me privately.".into()
}
fn default_failure_notice() -> String {
    "I'm experiencing technical difficulties. Please try again.".into()
}
fn default_unavailable_notice() -> String {
    "I can't verify your access right now. Please try again in a few minutes.".into()
}

impl Default for NoticesConfig {
    fn default() -> Self {
        Self {
            unauthorized: default_unauthorized_notice(),
            group_redirect: default_group_redirect_notice(),
            failure: default_failure_notice(),
            unavailable: default_unavailable_notice(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CONCIERGE_API_KEY`, then `OPENAI_API_KEY`
    /// - `OPENAI_MODEL`, `MAX_TOKENS`
    /// - `TELEGRAM_BOT_TOKEN`
    /// - `NOTION_TOKEN`, `EMPLOYEES_DB_ID`
    /// - `PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    ///
    /// Secrets from the environment only fill in values the file left unset;
    /// tuning values (model, max tokens, port) always win.
    pub fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if self.api_key.is_none() {
            self.api_key = non_empty("CONCIERGE_API_KEY").or_else(|| non_empty("OPENAI_API_KEY"));
        }
        if self.telegram.bot_token.is_none() {
            self.telegram.bot_token = non_empty("TELEGRAM_BOT_TOKEN");
        }
        if self.directory.notion_token.is_none() {
            self.directory.notion_token = non_empty("NOTION_TOKEN");
        }
        if self.directory.database_id.is_none() {
            self.directory.database_id = non_empty("EMPLOYEES_DB_ID");
        }

        if let Some(model) = non_empty("OPENAI_MODEL") {
            self.model = model;
        }
        if let Some(raw) = non_empty("MAX_TOKENS") {
            self.max_tokens = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("MAX_TOKENS must be a positive integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = non_empty("PORT") {
            self.health.port = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("PORT must be a valid port number, got '{raw}'"))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }
        if self.conversation.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.history_window must be > 0".into(),
            ));
        }
        if self.conversation.input_token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.input_token_budget must be > 0".into(),
            ));
        }
        if self.completion.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "completion.max_attempts must be > 0".into(),
            ));
        }
        if self.completion.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "completion.request_timeout_secs must be > 0".into(),
            ));
        }
        if self.completion.backoff_base_ms > self.completion.backoff_max_ms {
            return Err(ConfigError::ValidationError(
                "completion.backoff_base_ms must not exceed completion.backoff_max_ms".into(),
            ));
        }
        if self.directory.lookup_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "directory.lookup_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Credentials the configured backends need but do not have.
    ///
    /// Not part of `validate`: `doctor` and `status` must still load a
    /// half-configured file to report on it.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if self.telegram.bot_token.is_none() {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if self.directory.backend == DirectoryBackend::Notion {
            if self.directory.notion_token.is_none() {
                missing.push("NOTION_TOKEN");
            }
            if self.directory.database_id.is_none() {
                missing.push("EMPLOYEES_DB_ID");
            }
        }
        missing
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Persona file path with `~/` expanded.
    pub fn persona_file(&self) -> Option<PathBuf> {
        self.persona.system_prompt_file.as_deref().map(expand_home)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            telegram: TelegramConfig::default(),
            directory: DirectoryConfig::default(),
            conversation: ConversationConfig::default(),
            completion: CompletionConfig::default(),
            persona: PersonaConfig::default(),
            notices: NoticesConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_home().join(rest),
        None => PathBuf::from(path),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for concierge_core::Error {
    fn from(err: ConfigError) -> Self {
        concierge_core::Error::Config {
            message: err.to_string(),
        }
    }
}
