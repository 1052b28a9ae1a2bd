//! Domain event system: decoupled communication between bounded contexts.
//!
//! The pipeline publishes one event per terminal state. The health reporter
//! subscribes to keep counters; nothing else depends on delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A new message was received from a channel
    MessageReceived {
        channel: String,
        user_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A completion was delivered back to the user
    ResponseDelivered {
        user_id: String,
        model: String,
        attempts: u32,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// The directory refused the sender
    AccessDenied {
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The sender was inside the per-user minimum interval
    Throttled {
        user_id: String,
        wait_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The run ended with the failure notice
    PipelineFailed {
        user_id: String,
        stage: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
