//! Directory cache: TTL-bounded authorization records with single-flight lookups.
//!
//! A record is served from memory until its TTL runs out; after that it is
//! treated as absent and refetched before anyone trusts it again. Concurrent
//! misses for the same user share one in-flight lookup, so a burst of
//! messages from a new user costs a single directory call.
//!
//! Failures are never cached. A directory that errors or hangs past the
//! lookup timeout surfaces as [`DirectoryError::Unavailable`] and the caller
//! applies its own policy.

use chrono::Utc;
use concierge_core::directory::{AuthorizationRecord, Directory};
use concierge_core::error::DirectoryError;
use concierge_core::message::UserId;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};

type LookupFuture = Shared<BoxFuture<'static, Result<AuthorizationRecord, DirectoryError>>>;

#[derive(Debug, Clone)]
struct CachedRecord {
    record: AuthorizationRecord,
    expires_at: Instant,
}

/// Caching front for a [`Directory`].
///
/// Both maps are keyed per user and guarded by short, synchronous critical
/// sections; no lock is held across an `.await`.
pub struct DirectoryCache {
    directory: Arc<dyn Directory>,
    ttl: Duration,
    lookup_timeout: Duration,
    records: Arc<RwLock<HashMap<UserId, CachedRecord>>>,
    in_flight: Arc<Mutex<HashMap<UserId, LookupFuture>>>,
    audit: Option<Arc<AuditLogger>>,
}

impl DirectoryCache {
    pub fn new(directory: Arc<dyn Directory>, ttl: Duration) -> Self {
        Self {
            directory,
            ttl,
            lookup_timeout: Duration::from_secs(10),
            records: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            audit: None,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Backend name of the wrapped directory.
    pub fn backend(&self) -> &str {
        self.directory.name()
    }

    /// Whether the user may talk to the assistant.
    pub async fn authorize(&self, user_id: &UserId) -> Result<bool, DirectoryError> {
        Ok(self.lookup(user_id).await?.allowed)
    }

    /// The user's authorization record, fetching it if absent or expired.
    pub async fn lookup(&self, user_id: &UserId) -> Result<AuthorizationRecord, DirectoryError> {
        if let Some(record) = self.fresh(user_id) {
            debug!(user_id = %user_id, "Directory cache hit");
            return Ok(record);
        }

        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // A lookup may have completed between the check above and taking the lock.
            if let Some(record) = self.fresh(user_id) {
                return Ok(record);
            }
            in_flight
                .entry(user_id.clone())
                .or_insert_with(|| self.fetch(user_id.clone()))
                .clone()
        };

        pending.await
    }

    /// Drop one user's record so the next lookup goes to the directory.
    pub fn invalidate(&self, user_id: &UserId) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
    }

    /// Drop every cached record.
    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Remove expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, cached| cached.expires_at > now);
        before - records.len()
    }

    /// Number of cached records (expired ones included until purged).
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn health_check(&self) -> Result<bool, DirectoryError> {
        self.directory.health_check().await
    }

    fn fresh(&self, user_id: &UserId) -> Option<AuthorizationRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .get(user_id)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.record.clone())
    }

    /// Build the shared lookup for one user.
    ///
    /// The future stores a successful record before it unregisters itself,
    /// so a caller that misses the in-flight entry always finds the record.
    fn fetch(&self, user_id: UserId) -> LookupFuture {
        let directory = Arc::clone(&self.directory);
        let records = Arc::clone(&self.records);
        let in_flight = Arc::clone(&self.in_flight);
        let audit = self.audit.clone();
        let ttl = self.ttl;
        let timeout = self.lookup_timeout;

        async move {
            let result = match tokio::time::timeout(timeout, directory.lookup(&user_id)).await {
                Ok(Ok(entry)) => Ok(AuthorizationRecord::from_lookup(user_id.clone(), entry, Utc::now())),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(DirectoryError::Unavailable(format!(
                    "{} lookup timed out after {}ms",
                    directory.name(),
                    timeout.as_millis()
                ))),
            };

            match &result {
                Ok(record) => {
                    info!(
                        user_id = %user_id,
                        allowed = record.allowed,
                        backend = directory.name(),
                        "Directory lookup complete"
                    );
                    records
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(
                            user_id.clone(),
                            CachedRecord {
                                record: record.clone(),
                                expires_at: Instant::now() + ttl,
                            },
                        );
                }
                Err(e) => {
                    warn!(user_id = %user_id, backend = directory.name(), error = %e, "Directory lookup failed");
                    if let Some(audit) = &audit {
                        audit.log(
                            AuditEvent::DirectoryUnavailable {
                                backend: directory.name().to_string(),
                            },
                            user_id.as_str(),
                            AuditOutcome::Failure,
                            Some(e.to_string()),
                        );
                    }
                }
            }

            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&user_id);
            result
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for DirectoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryCache")
            .field("backend", &self.directory.name())
            .field("ttl", &self.ttl)
            .field("lookup_timeout", &self.lookup_timeout)
            .field("records", &self.len())
            .finish()
    }
}
