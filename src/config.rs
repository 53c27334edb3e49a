//! Configuration for the caregraph core
//!
//! Plain structs with defaults; the embedding application constructs these
//! directly. There is no CLI or environment surface here, all consumers are
//! in-process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resolver tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// TTL for cached resolutions. Kept short: roles and activation flags
    /// change underneath the cache.
    pub cache_ttl: Duration,
    /// Maximum cache entries before eviction
    pub max_cache_entries: usize,
    /// Read attempts against the store before a transient failure surfaces
    pub store_retry_attempts: usize,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            max_cache_entries: 1000,
            store_retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Linkage mutation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkageConfig {
    /// Mirror new edges into the legacy uid field for readers that have not
    /// migrated to the canonical list yet
    pub mirror_legacy_fields: bool,
    /// Conditional-write retries before giving up under contention
    pub max_cas_retries: usize,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            mirror_legacy_fields: true,
            max_cas_retries: 3,
        }
    }
}

/// MongoDB connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection URI
    pub uri: String,
    /// Database name
    pub db_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            db_name: "caregraph".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let resolver = ResolverConfig::default();
        assert!(resolver.store_retry_attempts >= 1);
        assert!(resolver.cache_ttl > Duration::ZERO);

        let linkage = LinkageConfig::default();
        assert!(linkage.max_cas_retries >= 1);
    }
}
