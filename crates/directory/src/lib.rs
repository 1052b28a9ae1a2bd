//! Authorization directory for Concierge.
//!
//! - [`DirectoryCache`]: TTL cache with single-flight lookups over any [`Directory`]
//! - [`NotionDirectory`]: the Notion employee database
//! - [`StaticDirectory`]: a configured allowlist
//! - [`AuditLogger`]: access denials and directory outages
//!
//! [`Directory`]: concierge_core::Directory

pub mod audit;
pub mod cache;
pub mod notion;
pub mod static_dir;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use cache::DirectoryCache;
pub use notion::NotionDirectory;
pub use static_dir::StaticDirectory;

use concierge_config::{DirectoryBackend, DirectoryConfig};
use concierge_core::{Directory, DirectoryError};
use std::sync::Arc;

/// Build the configured directory backend.
pub fn build_from_config(config: &DirectoryConfig) -> Result<Arc<dyn Directory>, DirectoryError> {
    match config.backend {
        DirectoryBackend::Static => Ok(Arc::new(StaticDirectory::new(config.allowed_users.clone()))),
        DirectoryBackend::Notion => {
            let token = config
                .notion_token
                .clone()
                .ok_or_else(|| DirectoryError::NotConfigured("NOTION_TOKEN is not set".into()))?;
            let database_id = config
                .database_id
                .clone()
                .ok_or_else(|| DirectoryError::NotConfigured("EMPLOYEES_DB_ID is not set".into()))?;
            Ok(Arc::new(NotionDirectory::new(&config.api_url, token, database_id)?))
        }
    }
}

/// Build the configured backend wrapped in a cache.
pub fn cache_from_config(
    config: &DirectoryConfig,
    audit: Arc<AuditLogger>,
) -> Result<DirectoryCache, DirectoryError> {
    let directory = build_from_config(config)?;
    Ok(DirectoryCache::new(directory, config.cache_ttl())
        .with_lookup_timeout(config.lookup_timeout())
        .with_audit(audit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_backend_builds_without_credentials() {
        let config = DirectoryConfig {
            backend: DirectoryBackend::Static,
            allowed_users: vec!["*".into()],
            ..DirectoryConfig::default()
        };
        let dir = build_from_config(&config).unwrap();
        assert_eq!(dir.name(), "static");
    }

    #[test]
    fn notion_backend_requires_token() {
        let config = DirectoryConfig::default();
        let err = build_from_config(&config).err().unwrap();
        assert!(matches!(err, DirectoryError::NotConfigured(ref m) if m.contains("NOTION_TOKEN")));
    }

    #[test]
    fn notion_backend_builds_with_credentials() {
        let config = DirectoryConfig {
            notion_token: Some("secret".into()),
            database_id: Some("db".into()),
            ..DirectoryConfig::default()
        };
        let cache = cache_from_config(&config, Arc::new(AuditLogger::new())).unwrap();
        assert_eq!(cache.backend(), "notion");
    }
}
