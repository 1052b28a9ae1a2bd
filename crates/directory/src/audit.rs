//! Audit logging: structured access event logging.
//!
//! Records who was refused, and when the directory could not answer,
//! separately from the regular application log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// The user the event is about
    pub actor: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable access events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The directory granted access
    AccessGranted,
    /// The directory refused the sender, or did not list them
    AccessDenied,
    /// The directory could not be reached or timed out
    DirectoryUnavailable { backend: String },
    /// The directory was unreachable and the fail-open policy let the sender through
    FailOpenBypass,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger that keeps a bounded in-memory tail and forwards to sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    capacity: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULT_CAPACITY: usize = 1024;

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity: DEFAULT_CAPACITY,
            sinks,
        }
    }

    /// Logger that writes through `tracing`.
    pub fn tracing() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an audit event.
    pub fn log(&self, event: AuditEvent, actor: &str, outcome: AuditOutcome, details: Option<String>) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            outcome,
            details,
        };

        {
            let mut entries = self.lock();
            if entries.len() >= self.capacity {
                entries.remove(0);
            }
            entries.push(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            user_id = %entry.actor,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn log_and_retrieve_entries() {
        let logger = AuditLogger::new();
        logger.log(AuditEvent::AccessGranted, "111", AuditOutcome::Success, None);
        logger.log(
            AuditEvent::AccessDenied,
            "222",
            AuditOutcome::Denied,
            Some("not in directory".into()),
        );

        assert_eq!(logger.count(), 2);
        let entries = logger.entries();
        assert_eq!(entries[0].actor, "111");
        assert_eq!(entries[1].actor, "222");
    }

    #[test]
    fn filter_by_outcome() {
        let logger = AuditLogger::new();
        logger.log(AuditEvent::AccessGranted, "1", AuditOutcome::Success, None);
        logger.log(AuditEvent::AccessDenied, "2", AuditOutcome::Denied, None);
        logger.log(
            AuditEvent::DirectoryUnavailable { backend: "notion".into() },
            "3",
            AuditOutcome::Failure,
            Some("timed out".into()),
        );

        let denied = logger.entries_by_outcome(&AuditOutcome::Denied);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor, "2");
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Failure).len(), 1);
    }

    #[test]
    fn capacity_keeps_newest_entries() {
        let logger = AuditLogger::new().with_capacity(2);
        for id in ["a", "b", "c"] {
            logger.log(AuditEvent::AccessDenied, id, AuditOutcome::Denied, None);
        }
        let actors: Vec<String> = logger.entries().into_iter().map(|e| e.actor).collect();
        assert_eq!(actors, vec!["b", "c"]);
    }

    #[test]
    fn clear_entries() {
        let logger = AuditLogger::new();
        logger.log(AuditEvent::AccessGranted, "u", AuditOutcome::Success, None);
        assert_eq!(logger.count(), 1);
        logger.clear();
        assert_eq!(logger.count(), 0);
    }

    #[test]
    fn audit_event_serializes_with_tag() {
        let event = AuditEvent::DirectoryUnavailable { backend: "notion".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"directory_unavailable\""));
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn custom_sink_receives_events() {
        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.actor.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink {
            received: received.clone(),
        })]);

        logger.log(AuditEvent::FailOpenBypass, "42", AuditOutcome::Success, None);

        let sink_entries = received.lock().unwrap();
        assert_eq!(sink_entries.as_slice(), ["42"]);
    }

    #[test]
    fn debug_format() {
        let debug_str = format!("{:?}", AuditLogger::tracing());
        assert!(debug_str.contains("AuditLogger"));
        assert!(debug_str.contains("sink_count: 1"));
    }
}
