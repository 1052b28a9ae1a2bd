//! Directory trait: the abstraction over the authorization system of record.
//!
//! The directory is read-only from Concierge's point of view. It answers one
//! question per identity: may this user talk to the assistant, and what do
//! we know about them?

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::message::UserId;

/// What the directory knows about one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// `Field: value` lines describing the user
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,

    /// Per-user history window override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,
}

impl DirectoryEntry {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = Some(window);
        self
    }
}

/// A directory answer stamped with when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub user_id: UserId,
    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,

    pub fetched_at: DateTime<Utc>,
}

impl AuthorizationRecord {
    /// Build a record from a directory answer. `None` means not found,
    /// which is a definite deny.
    pub fn from_lookup(user_id: UserId, entry: Option<DirectoryEntry>, fetched_at: DateTime<Utc>) -> Self {
        let entry = entry.unwrap_or_default();
        Self {
            user_id,
            allowed: entry.allowed,
            display_name: entry.display_name,
            role: entry.role,
            profile: entry.profile,
            context_window: entry.context_window,
            fetched_at,
        }
    }

    /// A record granted without consulting the directory (fail-open policy).
    pub fn provisional(user_id: UserId) -> Self {
        Self::from_lookup(user_id, Some(DirectoryEntry::allowed()), Utc::now())
    }
}

/// The core Directory trait.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Backend name (e.g., "notion", "static").
    fn name(&self) -> &str;

    /// Look up one identity. `Ok(None)` means the user is not listed.
    async fn lookup(&self, user_id: &UserId) -> std::result::Result<Option<DirectoryEntry>, DirectoryError>;

    /// Health check: can we reach the directory?
    async fn health_check(&self) -> std::result::Result<bool, DirectoryError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_becomes_denied_record() {
        let record = AuthorizationRecord::from_lookup(UserId::new("42"), None, Utc::now());
        assert!(!record.allowed);
        assert!(record.profile.is_empty());
        assert!(record.display_name.is_none());
    }

    #[test]
    fn entry_fields_carry_over() {
        let entry = DirectoryEntry::allowed()
            .with_display_name("Dana")
            .with_profile("Role: Ops")
            .with_context_window(8);
        let record = AuthorizationRecord::from_lookup(UserId::new("7"), Some(entry), Utc::now());
        assert!(record.allowed);
        assert_eq!(record.display_name.as_deref(), Some("Dana"));
        assert_eq!(record.profile, "Role: Ops");
        assert_eq!(record.context_window, Some(8));
    }

    #[test]
    fn provisional_record_is_allowed() {
        assert!(AuthorizationRecord::provisional(UserId::new("x")).allowed);
    }
}
