//! Caregiver-elderly linkage graph
//!
//! Mutates and queries the association edges stored on the caregiver's own
//! record. New edges are written as uids into the canonical list; the
//! legacy field names accumulated by earlier schema generations stay
//! readable, are optionally mirrored during migration, and are cleaned on
//! unlink. Every comparison between link entries goes through identity
//! resolution, never raw string equality.
//!
//! Link mutations are the one place in the system that must be atomic
//! against concurrent identical requests: each write is conditional on the
//! link version observed at read time, and conflicts re-read and retry.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::LinkageConfig;
use crate::db::schemas::{AccountDoc, Role};
use crate::db::store::{AccountStore, CasOutcome, LinkWrite};
use crate::keys::StorageKey;
use crate::resolver::IdentityResolver;
use crate::types::{CancelToken, CareGraphError, Result};

/// Mutating and querying access to caregiver-elderly edges
pub struct LinkageGraph<S: AccountStore> {
    store: Arc<S>,
    resolver: Arc<IdentityResolver<S>>,
    config: LinkageConfig,
}

impl<S: AccountStore> LinkageGraph<S> {
    /// Create a linkage graph with default configuration
    pub fn new(store: Arc<S>, resolver: Arc<IdentityResolver<S>>) -> Self {
        Self::with_config(store, resolver, LinkageConfig::default())
    }

    /// Create a linkage graph with custom configuration
    pub fn with_config(
        store: Arc<S>,
        resolver: Arc<IdentityResolver<S>>,
        config: LinkageConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    /// Linked elderly accounts for a caregiver, deduplicated by resolved
    /// uid.
    ///
    /// The same elderly referenced once by email and once by uid across the
    /// legacy fields comes back as one account. Entries that no longer
    /// resolve are logged and skipped; partial legacy state is recoverable,
    /// not corruption.
    pub async fn list_linked_elderly(
        &self,
        caregiver: &AccountDoc,
        cancel: &CancelToken,
    ) -> Result<Vec<AccountDoc>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();

        for raw in caregiver.link_identifier_union() {
            cancel.checkpoint()?;
            match self.resolver.resolve_account(&raw, cancel).await {
                Ok(account) => {
                    if seen.insert(account.uid.clone()) {
                        out.push(account);
                    }
                }
                Err(
                    e @ (CareGraphError::PartyNotFound(_)
                    | CareGraphError::AmbiguousMatch { .. }
                    | CareGraphError::InvalidIdentifier(_)),
                ) => {
                    warn!(
                        caregiver = %caregiver.uid,
                        entry = %raw,
                        error = %e,
                        "linked identifier does not resolve, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }

    /// Resolved uid set of a caregiver's linked elderly
    pub async fn list_linked_elderly_uids(
        &self,
        caregiver: &AccountDoc,
        cancel: &CancelToken,
    ) -> Result<BTreeSet<String>> {
        Ok(self
            .list_linked_elderly(caregiver, cancel)
            .await?
            .into_iter()
            .map(|a| a.uid)
            .collect())
    }

    /// Create a caregiver-elderly edge.
    ///
    /// Both parties are resolved first (`PartyNotFound` on a miss,
    /// `RoleMismatch` on the wrong role). The elderly's uid, never the
    /// email, is appended to the canonical list; `AlreadyLinked` if the uid
    /// is already present under resolved-identity comparison. Two
    /// concurrent identical calls produce exactly one edge, the loser
    /// observes `AlreadyLinked`.
    pub async fn link(
        &self,
        caregiver_identifier: &str,
        elderly_identifier: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let caregiver = self
            .resolver
            .resolve_account(caregiver_identifier, cancel)
            .await?;
        if caregiver.role != Role::Caregiver {
            return Err(CareGraphError::RoleMismatch {
                identifier: caregiver_identifier.to_string(),
                expected: Role::Caregiver.as_str().to_string(),
            });
        }

        let elderly = self
            .resolver
            .resolve_account(elderly_identifier, cancel)
            .await?;
        if elderly.role != Role::Elderly {
            return Err(CareGraphError::RoleMismatch {
                identifier: elderly_identifier.to_string(),
                expected: Role::Elderly.as_str().to_string(),
            });
        }

        let key = StorageKey::from_stored(caregiver.key.clone());
        let mut attempt = 0usize;

        loop {
            cancel.checkpoint()?;

            // Fresh read, never the cached copy: the version guard needs
            // the current record.
            let Some(current) = self.store.get_account(&key).await? else {
                return Err(CareGraphError::PartyNotFound(
                    caregiver_identifier.to_string(),
                ));
            };
            cancel.checkpoint()?;

            let linked = self.resolved_link_uids(&current, cancel).await?;
            if linked.contains(&elderly.uid) {
                return Err(CareGraphError::AlreadyLinked {
                    caregiver: current.uid,
                    elderly: elderly.uid.clone(),
                });
            }

            let mut write = LinkWrite::from_account(&current);
            write.linked_elderly.push(elderly.uid.clone());
            if self.config.mirror_legacy_fields
                && !write.linked_elder_uids.iter().any(|u| u == &elderly.uid)
            {
                write.linked_elder_uids.push(elderly.uid.clone());
            }

            match self
                .store
                .replace_links(&key, current.link_version, write)
                .await?
            {
                CasOutcome::Applied => {
                    info!(caregiver = %current.uid, elderly = %elderly.uid, "linkage created");
                    self.invalidate_caregiver(caregiver_identifier, &current)
                        .await;
                    return Ok(());
                }
                CasOutcome::Missing => {
                    return Err(CareGraphError::PartyNotFound(
                        caregiver_identifier.to_string(),
                    ));
                }
                CasOutcome::VersionConflict => {
                    attempt += 1;
                    if attempt >= self.config.max_cas_retries {
                        return Err(CareGraphError::TransientStore(format!(
                            "linkage write contention on caregiver '{}'",
                            current.uid
                        )));
                    }
                    debug!(attempt, "link version conflict, re-reading");
                }
            }
        }
    }

    /// Remove an edge. Idempotent: removing an absent edge is a successful
    /// no-op. Cleans the uid out of the canonical list and every legacy
    /// field, including legacy entries stored as emails that resolve to
    /// that uid.
    pub async fn unlink(
        &self,
        caregiver_identifier: &str,
        elderly_uid: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let caregiver = self
            .resolver
            .resolve_account(caregiver_identifier, cancel)
            .await?;
        let key = StorageKey::from_stored(caregiver.key.clone());
        let mut attempt = 0usize;

        loop {
            cancel.checkpoint()?;

            let Some(current) = self.store.get_account(&key).await? else {
                return Err(CareGraphError::PartyNotFound(
                    caregiver_identifier.to_string(),
                ));
            };
            cancel.checkpoint()?;

            let mut removed = false;
            let mut write = LinkWrite::from_account(&current);

            write.linked_elderly = self
                .retain_unrelated(write.linked_elderly, elderly_uid, &mut removed, cancel)
                .await?;
            write.elderly_ids = self
                .retain_unrelated(write.elderly_ids, elderly_uid, &mut removed, cancel)
                .await?;
            write.linked_elders = self
                .retain_unrelated(write.linked_elders, elderly_uid, &mut removed, cancel)
                .await?;
            write.linked_elder_uids = self
                .retain_unrelated(write.linked_elder_uids, elderly_uid, &mut removed, cancel)
                .await?;

            if let Some(entry) = write.elderly_id.clone() {
                if self.refers_to(&entry, elderly_uid, cancel).await? {
                    write.elderly_id = None;
                    removed = true;
                }
            }
            if let Some(entry) = write.uid_of_elder.clone() {
                if self.refers_to(&entry, elderly_uid, cancel).await? {
                    write.uid_of_elder = None;
                    removed = true;
                }
            }

            if !removed {
                debug!(caregiver = %current.uid, elderly = %elderly_uid, "unlink no-op, edge absent");
                return Ok(());
            }

            match self
                .store
                .replace_links(&key, current.link_version, write)
                .await?
            {
                CasOutcome::Applied => {
                    info!(caregiver = %current.uid, elderly = %elderly_uid, "linkage removed");
                    self.invalidate_caregiver(caregiver_identifier, &current)
                        .await;
                    return Ok(());
                }
                CasOutcome::Missing => {
                    return Err(CareGraphError::PartyNotFound(
                        caregiver_identifier.to_string(),
                    ));
                }
                CasOutcome::VersionConflict => {
                    attempt += 1;
                    if attempt >= self.config.max_cas_retries {
                        return Err(CareGraphError::TransientStore(format!(
                            "linkage write contention on caregiver '{}'",
                            current.uid
                        )));
                    }
                    debug!(attempt, "unlink version conflict, re-reading");
                }
            }
        }
    }

    /// Resolved uid set across every linkage field of a record
    async fn resolved_link_uids(
        &self,
        account: &AccountDoc,
        cancel: &CancelToken,
    ) -> Result<BTreeSet<String>> {
        self.list_linked_elderly_uids(account, cancel).await
    }

    /// Keep only the entries that do not reference the given uid
    async fn retain_unrelated(
        &self,
        entries: Vec<String>,
        elderly_uid: &str,
        removed: &mut bool,
        cancel: &CancelToken,
    ) -> Result<Vec<String>> {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.refers_to(&entry, elderly_uid, cancel).await? {
                *removed = true;
            } else {
                kept.push(entry);
            }
        }
        Ok(kept)
    }

    /// Whether a stored link entry references the given uid, either
    /// directly or as an email that resolves to it
    async fn refers_to(&self, entry: &str, elderly_uid: &str, cancel: &CancelToken) -> Result<bool> {
        if entry == elderly_uid {
            return Ok(true);
        }
        if !entry.contains('@') {
            return Ok(false);
        }
        match self.resolver.resolve_account(entry, cancel).await {
            Ok(account) => Ok(account.uid == elderly_uid),
            Err(
                CareGraphError::PartyNotFound(_)
                | CareGraphError::AmbiguousMatch { .. }
                | CareGraphError::InvalidIdentifier(_),
            ) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop stale cached resolutions of the mutated caregiver record
    async fn invalidate_caregiver(&self, queried_identifier: &str, record: &AccountDoc) {
        self.resolver.invalidate(queried_identifier).await;
        self.resolver.invalidate(&record.email).await;
        self.resolver.invalidate(&record.uid).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::db::memory::MemoryStore;
    use std::time::Duration;

    fn graph(store: Arc<MemoryStore>) -> LinkageGraph<MemoryStore> {
        let resolver = Arc::new(IdentityResolver::with_config(
            Arc::clone(&store),
            ResolverConfig {
                retry_base_delay: Duration::from_millis(1),
                ..ResolverConfig::default()
            },
        ));
        LinkageGraph::new(store, resolver)
    }

    #[tokio::test]
    async fn test_list_dedupes_by_resolved_identity() {
        let store = Arc::new(MemoryStore::new());
        let elder = AccountDoc::new("elder@example.com", "Elder", "One", Role::Elderly)
            .unwrap();

        // Legacy record referencing the same elderly by email and by uid
        // across three different fields
        let mut carer = AccountDoc::new("carer@example.com", "Care", "Giver", Role::Caregiver)
            .unwrap();
        carer.elderly_ids = vec!["elder@example.com".into()];
        carer.linked_elder_uids = vec![elder.uid.clone()];
        carer.uid_of_elder = Some(elder.uid.clone());

        store.insert_account(elder.clone()).await.unwrap();
        store.insert_account(carer.clone()).await.unwrap();

        let graph = graph(store);
        let cancel = CancelToken::new();

        let listed = graph.list_linked_elderly(&carer, &cancel).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].uid, elder.uid);
    }

    #[tokio::test]
    async fn test_list_skips_dangling_entries() {
        let store = Arc::new(MemoryStore::new());
        let mut carer = AccountDoc::new("carer@example.com", "Care", "Giver", Role::Caregiver)
            .unwrap();
        carer.linked_elders = vec!["gone@example.com".into(), "stale-uid".into()];
        store.insert_account(carer.clone()).await.unwrap();

        let graph = graph(store);
        let cancel = CancelToken::new();

        let listed = graph.list_linked_elderly(&carer, &cancel).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_unlink_cleans_email_form_legacy_entries() {
        let store = Arc::new(MemoryStore::new());
        let elder = AccountDoc::new("elder@example.com", "Elder", "One", Role::Elderly)
            .unwrap();
        let mut carer = AccountDoc::new("carer@example.com", "Care", "Giver", Role::Caregiver)
            .unwrap();
        carer.linked_elderly = vec![elder.uid.clone()];
        carer.elderly_ids = vec!["elder@example.com".into()];
        carer.elderly_id = Some("elder@example.com".into());

        store.insert_account(elder.clone()).await.unwrap();
        store.insert_account(carer.clone()).await.unwrap();

        let graph = graph(Arc::clone(&store));
        let cancel = CancelToken::new();

        graph
            .unlink("carer@example.com", &elder.uid, &cancel)
            .await
            .unwrap();

        let key = StorageKey::from_stored(carer.key.clone());
        let stored = store.get_account(&key).await.unwrap().unwrap();
        assert!(stored.linked_elderly.is_empty());
        assert!(stored.elderly_ids.is_empty());
        assert!(stored.elderly_id.is_none());
    }

    #[tokio::test]
    async fn test_link_requires_matching_roles() {
        let store = Arc::new(MemoryStore::new());
        let elder = AccountDoc::new("elder@example.com", "Elder", "One", Role::Elderly)
            .unwrap();
        let other_elder = AccountDoc::new("other@example.com", "Other", "Elder", Role::Elderly)
            .unwrap();
        store.insert_account(elder.clone()).await.unwrap();
        store.insert_account(other_elder.clone()).await.unwrap();

        let graph = graph(store);
        let cancel = CancelToken::new();

        // An elderly account cannot take the caregiver side of an edge
        assert!(matches!(
            graph
                .link("other@example.com", "elder@example.com", &cancel)
                .await,
            Err(CareGraphError::RoleMismatch { .. })
        ));
    }
}
