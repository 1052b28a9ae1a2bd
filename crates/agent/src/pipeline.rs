//! The message pipeline: one inbound message from receipt to reply.
//!
//! ```text
//! RECEIVED → AUTHORIZING → (DENIED | BUILDING) → COMPLETING → (DELIVERED | FAILED)
//! ```
//!
//! Side branches end early: invalid input is `Ignored`, commands are
//! answered directly, group chats are `Redirected`, and a user inside the
//! minimum interval is `Throttled`. Every terminal state except `Ignored`
//! produces exactly one user-visible reply.
//!
//! Per-user ordering comes from the session guard: it is checked out before
//! the history snapshot and held until the reply has gone out, so two
//! messages from the same user never interleave while different users run
//! in parallel.

use crate::commands::{self, Command, ComponentStatus, StatusReport};
use crate::prompt::PromptAssembler;
use crate::rate_limit::RateLimiter;
use chrono::Utc;
use concierge_config::{AppConfig, LookupFailurePolicy, NoticesConfig};
use concierge_core::channel::{Channel, InboundMessage};
use concierge_core::directory::AuthorizationRecord;
use concierge_core::event::{DomainEvent, EventBus};
use concierge_core::message::{ConversationTurn, Role, UserId};
use concierge_core::persona::{Persona, PersonaSource};
use concierge_directory::{AuditEvent, AuditLogger, AuditOutcome, DirectoryCache};
use concierge_memory::ConversationStore;
use concierge_providers::CompletionClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// How long `/status` waits for each health check.
const STATUS_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a pipeline run ended (or, for the intermediate states, where it is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Received,
    Authorizing,
    Building,
    Completing,
    Delivered,
    Denied,
    Failed,
    Ignored,
    Redirected,
    Command,
    Throttled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authorizing => "authorizing",
            Self::Building => "building",
            Self::Completing => "completing",
            Self::Delivered => "delivered",
            Self::Denied => "denied",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
            Self::Redirected => "redirected",
            Self::Command => "command",
            Self::Throttled => "throttled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Received | Self::Authorizing | Self::Building | Self::Completing
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of one run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    /// The text sent back, `None` only for ignored input
    pub reply: Option<String>,
    pub correlation_id: String,
}

/// Orchestrates authorization, history, prompt assembly, completion and
/// delivery for inbound messages.
pub struct MessagePipeline {
    directory: Arc<DirectoryCache>,
    store: Arc<ConversationStore>,
    client: Arc<CompletionClient>,
    channel: Arc<dyn Channel>,
    assembler: PromptAssembler,
    persona: Persona,
    notices: NoticesConfig,
    failure_policy: LookupFailurePolicy,
    rate_limiter: Option<RateLimiter>,
    events: Option<Arc<EventBus>>,
    audit: Option<Arc<AuditLogger>>,
    started_at: Instant,
}

impl MessagePipeline {
    pub fn new(
        directory: Arc<DirectoryCache>,
        store: Arc<ConversationStore>,
        client: Arc<CompletionClient>,
        channel: Arc<dyn Channel>,
        assembler: PromptAssembler,
    ) -> Self {
        Self {
            directory,
            store,
            client,
            channel,
            assembler,
            persona: Persona::default(),
            notices: NoticesConfig::default(),
            failure_policy: LookupFailurePolicy::default(),
            rate_limiter: None,
            events: None,
            audit: None,
            started_at: Instant::now(),
        }
    }

    /// Wire a pipeline with every setting the configuration carries.
    pub fn from_config(
        config: &AppConfig,
        directory: Arc<DirectoryCache>,
        store: Arc<ConversationStore>,
        client: Arc<CompletionClient>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        let persona = Persona::load(&PersonaSource {
            prompt_file: config.persona_file(),
            system_prompt_override: config.persona.system_prompt.clone(),
        });
        Self::new(directory, store, client, channel, PromptAssembler::from_config(config))
            .with_persona(persona)
            .with_notices(config.notices.clone())
            .with_failure_policy(config.directory.on_lookup_failure)
            .with_min_interval(config.conversation.min_interval())
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_notices(mut self, notices: NoticesConfig) -> Self {
        self.notices = notices;
        self
    }

    /// What to do when the directory cannot answer.
    pub fn with_failure_policy(mut self, policy: LookupFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Enforce a minimum interval between accepted messages per user.
    /// A zero interval disables the limiter.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.rate_limiter = (!interval.is_zero()).then(|| RateLimiter::new(interval));
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<DirectoryCache> {
        &self.directory
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Run one message through the pipeline.
    pub async fn handle(&self, message: InboundMessage) -> PipelineOutcome {
        let correlation_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let span = info_span!(
            "pipeline",
            correlation_id = %correlation_id,
            channel = %message.channel,
        );

        let (state, reply) = self.run(message).instrument(span).await;
        PipelineOutcome {
            state,
            reply,
            correlation_id,
        }
    }

    async fn run(&self, message: InboundMessage) -> (PipelineState, Option<String>) {
        // ── RECEIVED ──
        let Some(user_id) = message.user_id.clone().filter(|u| !u.is_empty()) else {
            debug!("Ignoring message without a sender");
            return (PipelineState::Ignored, None);
        };
        let text = message.text.trim();
        if text.is_empty() {
            debug!(user_id = %user_id, "Ignoring message without text");
            return (PipelineState::Ignored, None);
        }
        if message.chat_id.trim().is_empty() {
            debug!(user_id = %user_id, "Ignoring message without a chat to reply to");
            return (PipelineState::Ignored, None);
        }
        let chat_id = message.chat_id.as_str();

        info!(
            user_id = %user_id,
            sender = message.sender_name.as_deref().unwrap_or("-"),
            preview = %message.preview(),
            "Message received"
        );
        self.publish(DomainEvent::MessageReceived {
            channel: message.channel.clone(),
            user_id: user_id.to_string(),
            content_preview: message.preview(),
            timestamp: Utc::now(),
        });

        if let Some(command) = Command::parse(text) {
            debug!(user_id = %user_id, command = command.name(), "Handling command");
            let reply = self.command_reply(&command).await;
            return self.finish(chat_id, PipelineState::Command, reply).await;
        }

        if message.is_group {
            info!(user_id = %user_id, chat_id, "Redirecting group message to private chat");
            let reply = self.notices.group_redirect.clone();
            return self.finish(chat_id, PipelineState::Redirected, reply).await;
        }

        // ── AUTHORIZING ──
        let record = match self.directory.lookup(&user_id).await {
            Ok(record) => record,
            Err(e) => match self.failure_policy {
                LookupFailurePolicy::FailClosed => {
                    warn!(user_id = %user_id, error = %e, "Directory unavailable, refusing");
                    self.publish(DomainEvent::PipelineFailed {
                        user_id: user_id.to_string(),
                        stage: PipelineState::Authorizing.as_str().into(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    let reply = self.notices.unavailable.clone();
                    return self.finish(chat_id, PipelineState::Failed, reply).await;
                }
                LookupFailurePolicy::FailOpen => {
                    warn!(user_id = %user_id, error = %e, "Directory unavailable, admitting provisionally");
                    self.audit(AuditEvent::FailOpenBypass, &user_id, AuditOutcome::Success, Some(e.to_string()));
                    AuthorizationRecord::provisional(user_id.clone())
                }
            },
        };

        if !record.allowed {
            info!(user_id = %user_id, "Access denied");
            self.audit(AuditEvent::AccessDenied, &user_id, AuditOutcome::Denied, None);
            self.publish(DomainEvent::AccessDenied {
                user_id: user_id.to_string(),
                timestamp: Utc::now(),
            });
            let reply = self.notices.unauthorized.clone();
            return self.finish(chat_id, PipelineState::Denied, reply).await;
        }
        self.audit(AuditEvent::AccessGranted, &user_id, AuditOutcome::Success, None);

        if let Some(limiter) = &self.rate_limiter {
            if let Err(wait) = limiter.check(&user_id) {
                info!(user_id = %user_id, wait_ms = wait.as_millis() as u64, "Throttled");
                self.publish(DomainEvent::Throttled {
                    user_id: user_id.to_string(),
                    wait_ms: wait.as_millis() as u64,
                    timestamp: Utc::now(),
                });
                return self
                    .finish(chat_id, PipelineState::Throttled, RateLimiter::wait_notice(wait))
                    .await;
            }
        }

        // ── BUILDING ──
        let mut session = self.store.session(&user_id).await;
        self.typing(chat_id).await;

        let history = session.history();
        let user_turn = ConversationTurn::new(Role::User, text, message.timestamp);
        let system_prompt = self.persona.system_prompt_for(&record);
        let assembled = self.assembler.assemble(&system_prompt, &history, &user_turn);
        debug!(
            user_id = %user_id,
            history_included = assembled.metadata.history_included,
            history_dropped = assembled.metadata.history_dropped,
            estimated_tokens = assembled.metadata.total_tokens,
            "Prompt assembled"
        );

        // A directory override may narrow the window, never widen it.
        let window = record
            .context_window
            .map_or(self.store.window(), |w| w.min(self.store.window()));
        session.append_bounded(user_turn, window);

        // ── COMPLETING ──
        match self.client.complete(&assembled.request).await {
            Ok(response) => {
                session.append_bounded(
                    ConversationTurn::new(Role::Assistant, response.text.clone(), Utc::now()),
                    window,
                );
                info!(
                    user_id = %user_id,
                    model = %response.model,
                    attempts = response.attempts,
                    history_len = session.len(),
                    "Completion delivered"
                );
                self.publish(DomainEvent::ResponseDelivered {
                    user_id: user_id.to_string(),
                    model: response.model.clone(),
                    attempts: response.attempts,
                    tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
                    timestamp: Utc::now(),
                });
                // Reply goes out before the session is released so replies
                // for one user leave in receive order.
                let outcome = self.finish(chat_id, PipelineState::Delivered, response.text).await;
                drop(session);
                outcome
            }
            Err(failure) => {
                error!(
                    user_id = %user_id,
                    kind = ?failure.kind,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Completion failed"
                );
                self.publish(DomainEvent::PipelineFailed {
                    user_id: user_id.to_string(),
                    stage: PipelineState::Completing.as_str().into(),
                    error_message: failure.to_string(),
                    timestamp: Utc::now(),
                });
                let reply = self.notices.failure.clone();
                let outcome = self.finish(chat_id, PipelineState::Failed, reply).await;
                drop(session);
                outcome
            }
        }
    }

    /// Deliver the reply and report the terminal state.
    async fn finish(&self, chat_id: &str, state: PipelineState, reply: String) -> (PipelineState, Option<String>) {
        self.deliver(chat_id, &reply).await;
        debug!(state = %state, "Pipeline finished");
        (state, Some(reply))
    }

    async fn deliver(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.channel.send(chat_id, text).await {
            warn!(channel = self.channel.name(), chat_id, error = %e, "Delivery failed");
        }
    }

    async fn typing(&self, chat_id: &str) {
        if let Err(e) = self.channel.send_typing(chat_id).await {
            debug!(chat_id, error = %e, "Typing indicator failed");
        }
    }

    async fn command_reply(&self, command: &Command) -> String {
        match command {
            Command::Start => commands::welcome_text(),
            Command::Help => commands::help_text(),
            Command::Status => commands::status_text(&self.status_report().await),
            Command::Unknown(_) => commands::unknown_text(),
        }
    }

    /// Probe the provider and the directory for `/status`.
    pub async fn status_report(&self) -> StatusReport {
        let (provider, directory) = tokio::join!(
            tokio::time::timeout(STATUS_CHECK_TIMEOUT, self.client.health_check()),
            tokio::time::timeout(STATUS_CHECK_TIMEOUT, self.directory.health_check()),
        );

        StatusReport {
            provider: self.client.provider_name().to_string(),
            provider_status: provider.map_or(ComponentStatus::Unreachable, ComponentStatus::from_check),
            directory: self.directory.backend().to_string(),
            directory_status: directory.map_or(ComponentStatus::Unreachable, ComponentStatus::from_check),
            uptime: self.started_at.elapsed(),
            active_sessions: self.store.len().await,
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    fn audit(&self, event: AuditEvent, user_id: &UserId, outcome: AuditOutcome, details: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.log(event, user_id.as_str(), outcome, details);
        }
    }
}
