//! Identity resolution
//!
//! Turns a raw user-supplied identifier (an email in any formatting, or an
//! opaque account uid) into the canonical account record. Email lookups are
//! O(1) point reads by storage key; the scan fallback exists only because
//! callers historically pass either form interchangeably. Results are
//! cached with a short TTL, transient store failures are retried with
//! bounded backoff, and ambiguous matches are surfaced instead of silently
//! picking the first candidate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::db::schemas::AccountDoc;
use crate::db::store::AccountStore;
use crate::keys;
use crate::types::{CancelToken, CareGraphError, Result};

/// Cached resolution with expiration
struct CachedAccount {
    account: AccountDoc,
    expires_at: Instant,
}

/// Resolves raw identifiers to canonical account records
pub struct IdentityResolver<S: AccountStore> {
    store: Arc<S>,
    config: ResolverConfig,
    cache: RwLock<HashMap<String, CachedAccount>>,
}

impl<S: AccountStore> IdentityResolver<S> {
    /// Create a resolver with default configuration
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, ResolverConfig::default())
    }

    /// Create a resolver with custom configuration
    pub fn with_config(store: Arc<S>, config: ResolverConfig) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a raw identifier to its account record.
    ///
    /// An identifier containing `@` is treated as an email: normalized and
    /// point-looked-up by storage key. Anything else is treated as an
    /// opaque uid and matched against stored uids and emails by scan.
    ///
    /// Failure semantics distinguish structurally invalid input
    /// (`InvalidIdentifier`), a well-formed identifier with no matching
    /// account (`PartyNotFound`, carrying the original input), and more
    /// than one candidate (`AmbiguousMatch`).
    pub async fn resolve_account(
        &self,
        identifier: &str,
        cancel: &CancelToken,
    ) -> Result<AccountDoc> {
        cancel.checkpoint()?;

        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            return Err(CareGraphError::InvalidIdentifier(
                "empty identifier".to_string(),
            ));
        }

        if let Some(account) = self.get_cached(trimmed).await {
            debug!(identifier = %trimmed, "account resolved from cache");
            return Ok(account);
        }

        let account = if trimmed.contains('@') {
            self.resolve_email(trimmed, cancel).await?
        } else {
            self.resolve_opaque(trimmed, cancel).await?
        };

        self.cache_account(trimmed, account.clone()).await;
        Ok(account)
    }

    /// Point lookup by normalized storage key
    async fn resolve_email(&self, identifier: &str, cancel: &CancelToken) -> Result<AccountDoc> {
        let canonical = keys::canonical_email(identifier)?;
        let key = keys::normalize(identifier)?;

        let store = Arc::clone(&self.store);
        let lookup_key = key.clone();
        let found = self
            .with_retry(cancel, move || {
                let store = Arc::clone(&store);
                let key = lookup_key.clone();
                async move { store.get_account(&key).await }
            })
            .await?;

        match found {
            None => Err(CareGraphError::PartyNotFound(identifier.to_string())),
            Some(account) if account.email != canonical => {
                // The lossy key transform collided: the record under this
                // key belongs to a different email. Surface it rather than
                // returning the wrong account.
                warn!(
                    identifier = %identifier,
                    stored_email = %account.email,
                    key = %key,
                    "storage key collision between distinct emails"
                );
                Err(CareGraphError::AmbiguousMatch {
                    identifier: identifier.to_string(),
                    candidates: 2,
                })
            }
            Some(account) => Ok(account),
        }
    }

    /// Scan fallback for opaque uids (and uid-shaped legacy references)
    async fn resolve_opaque(&self, identifier: &str, cancel: &CancelToken) -> Result<AccountDoc> {
        let store = Arc::clone(&self.store);
        let scan_id = identifier.to_string();
        let mut matches = self
            .with_retry(cancel, move || {
                let store = Arc::clone(&store);
                let id = scan_id.clone();
                async move { store.find_accounts_by_identifier(&id).await }
            })
            .await?;

        match matches.len() {
            0 => Err(CareGraphError::PartyNotFound(identifier.to_string())),
            1 => Ok(matches.remove(0)),
            n => {
                warn!(identifier = %identifier, candidates = n, "identifier scan is ambiguous");
                Err(CareGraphError::AmbiguousMatch {
                    identifier: identifier.to_string(),
                    candidates: n,
                })
            }
        }
    }

    /// Run a store read, retrying transient failures with exponential
    /// backoff up to the configured bound. The cancellation token is
    /// honored before the call and after every round trip, so a cancelled
    /// caller never acts on a late result.
    async fn with_retry<T, F, Fut>(&self, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            cancel.checkpoint()?;
            match op().await {
                Ok(value) => {
                    cancel.checkpoint()?;
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.config.store_retry_attempts => {
                    attempt += 1;
                    let delay = self.config.retry_base_delay * 2u32.pow(attempt as u32 - 1);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get a cached account if still valid
    async fn get_cached(&self, identifier: &str) -> Option<AccountDoc> {
        let cache = self.cache.read().await;
        cache.get(identifier).and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.account.clone())
            } else {
                None
            }
        })
    }

    /// Cache a resolution
    async fn cache_account(&self, identifier: &str, account: AccountDoc) {
        let mut cache = self.cache.write().await;

        if cache.len() >= self.config.max_cache_entries {
            cache.retain(|_, v| v.expires_at > Instant::now());

            // Still full after dropping expired entries: shed half
            if cache.len() >= self.config.max_cache_entries {
                let to_remove: Vec<_> = cache.keys().take(cache.len() / 2).cloned().collect();
                for key in to_remove {
                    cache.remove(&key);
                }
            }
        }

        cache.insert(
            identifier.to_string(),
            CachedAccount {
                account,
                expires_at: Instant::now() + self.config.cache_ttl,
            },
        );
    }

    /// Drop the cached resolution for one identifier. Called after
    /// mutations (link, role assignment) so subsequent resolutions observe
    /// current state.
    pub async fn invalidate(&self, identifier: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(identifier.trim());
    }

    /// Drop every cached resolution
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }
}
