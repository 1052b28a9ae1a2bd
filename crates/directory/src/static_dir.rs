//! Static allowlist directory.
//!
//! Answers lookups from a fixed list of user ids, for local runs and tests.

use async_trait::async_trait;
use concierge_core::directory::{Directory, DirectoryEntry};
use concierge_core::error::DirectoryError;
use concierge_core::message::UserId;
use std::collections::HashMap;

/// A directory backed by configuration.
///
/// Rules:
/// - If the allowlist is empty → deny all
/// - If the allowlist contains `"*"` → allow all
/// - Otherwise, the user must be in the list
///
/// Listed-but-denied users still yield a record so they are not reported
/// as "not found"; unlisted users yield `None`.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    allowed_users: Vec<String>,
    entries: HashMap<UserId, DirectoryEntry>,
}

impl StaticDirectory {
    pub fn new(allowed_users: Vec<String>) -> Self {
        Self {
            allowed_users,
            entries: HashMap::new(),
        }
    }

    /// Attach a full entry (profile, window override) for one user.
    pub fn with_entry(mut self, user_id: impl Into<UserId>, entry: DirectoryEntry) -> Self {
        self.entries.insert(user_id.into(), entry);
        self
    }

    fn is_listed(&self, user_id: &UserId) -> bool {
        self.allowed_users
            .iter()
            .any(|u| u == "*" || u == user_id.as_str())
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    fn name(&self) -> &str {
        "static"
    }

    async fn lookup(&self, user_id: &UserId) -> Result<Option<DirectoryEntry>, DirectoryError> {
        if let Some(entry) = self.entries.get(user_id) {
            return Ok(Some(entry.clone()));
        }
        if self.is_listed(user_id) {
            Ok(Some(DirectoryEntry::allowed()))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_allowlist_denies_all() {
        let dir = StaticDirectory::new(vec![]);
        assert_eq!(dir.lookup(&UserId::new("anyone")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn wildcard_allows_all() {
        let dir = StaticDirectory::new(vec!["*".into()]);
        let entry = dir.lookup(&UserId::new("anyone")).await.unwrap().unwrap();
        assert!(entry.allowed);
    }

    #[tokio::test]
    async fn specific_user_allowed() {
        let dir = StaticDirectory::new(vec!["alice".into(), "bob".into()]);
        assert!(dir.lookup(&UserId::new("alice")).await.unwrap().is_some());
        assert!(dir.lookup(&UserId::new("bob")).await.unwrap().is_some());
        assert!(dir.lookup(&UserId::new("eve")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn explicit_entry_wins_over_list() {
        let dir = StaticDirectory::new(vec!["*".into()])
            .with_entry("blocked", DirectoryEntry::denied().with_display_name("Blocked"));
        let entry = dir.lookup(&UserId::new("blocked")).await.unwrap().unwrap();
        assert!(!entry.allowed);
        assert_eq!(entry.display_name.as_deref(), Some("Blocked"));
    }
}
