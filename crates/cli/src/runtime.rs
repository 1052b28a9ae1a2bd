//! Builds the shared subsystems once per process.

use concierge_agent::MessagePipeline;
use concierge_config::AppConfig;
use concierge_core::channel::Channel;
use concierge_core::event::EventBus;
use concierge_directory::{AuditLogger, DirectoryCache};
use concierge_memory::ConversationStore;
use std::sync::Arc;

pub struct Runtime {
    pub pipeline: Arc<MessagePipeline>,
    pub directory: Arc<DirectoryCache>,
    pub store: Arc<ConversationStore>,
    pub events: Arc<EventBus>,
}

impl Runtime {
    pub fn build(config: &AppConfig, channel: Arc<dyn Channel>) -> Result<Self, Box<dyn std::error::Error>> {
        let audit = Arc::new(AuditLogger::tracing());
        let directory = Arc::new(concierge_directory::cache_from_config(
            &config.directory,
            Arc::clone(&audit),
        )?);
        let client = Arc::new(concierge_providers::build_from_config(config)?);
        let store = Arc::new(ConversationStore::new(config.conversation.history_window));
        let events = Arc::new(EventBus::default());

        let pipeline = MessagePipeline::from_config(
            config,
            Arc::clone(&directory),
            Arc::clone(&store),
            client,
            channel,
        )
        .with_events(Arc::clone(&events))
        .with_audit(audit);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            directory,
            store,
            events,
        })
    }
}
