//! In-memory store for tests and single-node embedding
//!
//! Behavior-compatible with the Mongo implementation, including the
//! conditional link write and the unique storage-key constraint.
//! Configurable fault injection exercises the retry and partial-failure
//! paths without a real network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bson::DateTime;
use tokio::sync::RwLock;

use crate::db::schemas::{AccountDoc, FriendshipDoc, FriendshipStatus, Role};
use crate::db::store::{AccountStore, CasOutcome, LinkWrite};
use crate::keys::StorageKey;
use crate::types::{CareGraphError, Result};

/// In-memory implementation of [`AccountStore`]
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, AccountDoc>>,
    friendships: RwLock<Vec<FriendshipDoc>>,
    fail_next: AtomicUsize,
    op_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store operations fail with a transient error
    pub fn fail_next_ops(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of store operations attempted so far
    pub fn op_count(&self) -> usize {
        self.op_count.load(Ordering::SeqCst)
    }

    /// Count the operation and apply any pending injected failure
    fn gate(&self) -> Result<()> {
        self.op_count.fetch_add(1, Ordering::SeqCst);

        let mut remaining = self.fail_next.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.fail_next.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Err(CareGraphError::TransientStore(
                        "injected store failure".to_string(),
                    ))
                }
                Err(actual) => remaining = actual,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, key: &StorageKey) -> Result<Option<AccountDoc>> {
        self.gate()?;
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(key.as_str())
            .filter(|a| !a.metadata.is_deleted)
            .cloned())
    }

    async fn find_accounts_by_identifier(&self, identifier: &str) -> Result<Vec<AccountDoc>> {
        self.gate()?;
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .filter(|a| !a.metadata.is_deleted)
            .filter(|a| a.uid == identifier || a.email == identifier)
            .cloned()
            .collect())
    }

    async fn insert_account(&self, mut account: AccountDoc) -> Result<()> {
        self.gate()?;
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.key) {
            // Mirrors the unique index on the storage key
            return Err(CareGraphError::Database(format!(
                "duplicate storage key '{}'",
                account.key
            )));
        }
        account.metadata.is_deleted = false;
        account.metadata.created_at = Some(DateTime::now());
        account.metadata.updated_at = Some(DateTime::now());
        accounts.insert(account.key.clone(), account);
        Ok(())
    }

    async fn replace_links(
        &self,
        key: &StorageKey,
        expected_version: i64,
        write: LinkWrite,
    ) -> Result<CasOutcome> {
        self.gate()?;
        let mut accounts = self.accounts.write().await;

        let Some(account) = accounts
            .get_mut(key.as_str())
            .filter(|a| !a.metadata.is_deleted)
        else {
            return Ok(CasOutcome::Missing);
        };

        if account.link_version != expected_version {
            return Ok(CasOutcome::VersionConflict);
        }

        account.linked_elderly = write.linked_elderly;
        account.elderly_id = write.elderly_id;
        account.elderly_ids = write.elderly_ids;
        account.linked_elders = write.linked_elders;
        account.linked_elder_uids = write.linked_elder_uids;
        account.uid_of_elder = write.uid_of_elder;
        account.link_version = expected_version + 1;
        account.metadata.updated_at = Some(DateTime::now());

        Ok(CasOutcome::Applied)
    }

    async fn set_account_role(&self, key: &StorageKey, role: Role) -> Result<()> {
        self.gate()?;
        let mut accounts = self.accounts.write().await;
        match accounts
            .get_mut(key.as_str())
            .filter(|a| !a.metadata.is_deleted)
        {
            Some(account) => {
                account.role = role;
                account.metadata.updated_at = Some(DateTime::now());
                Ok(())
            }
            None => Err(CareGraphError::PartyNotFound(key.as_str().to_string())),
        }
    }

    async fn set_account_active(&self, key: &StorageKey, active: bool) -> Result<()> {
        self.gate()?;
        let mut accounts = self.accounts.write().await;
        match accounts
            .get_mut(key.as_str())
            .filter(|a| !a.metadata.is_deleted)
        {
            Some(account) => {
                account.is_active = active;
                account.metadata.updated_at = Some(DateTime::now());
                Ok(())
            }
            None => Err(CareGraphError::PartyNotFound(key.as_str().to_string())),
        }
    }

    async fn insert_friendship(&self, mut friendship: FriendshipDoc) -> Result<()> {
        self.gate()?;
        let mut friendships = self.friendships.write().await;
        if friendships
            .iter()
            .any(|f| f.connects(&friendship.uid_a, &friendship.uid_b))
        {
            return Err(CareGraphError::Database(format!(
                "duplicate friendship edge '{}'/'{}'",
                friendship.uid_a, friendship.uid_b
            )));
        }
        friendship.metadata.is_deleted = false;
        friendship.metadata.created_at = Some(DateTime::now());
        friendship.metadata.updated_at = Some(DateTime::now());
        friendships.push(friendship);
        Ok(())
    }

    async fn accepted_friendship_exists(&self, uid_a: &str, uid_b: &str) -> Result<bool> {
        self.gate()?;
        let friendships = self.friendships.read().await;
        Ok(friendships.iter().any(|f| {
            !f.metadata.is_deleted
                && f.status == FriendshipStatus::Accepted
                && f.connects(uid_a, uid_b)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(email: &str, role: Role) -> AccountDoc {
        AccountDoc::new(email, "Test", "Account", role).unwrap()
    }

    #[tokio::test]
    async fn test_point_lookup_and_duplicate_key() {
        let store = MemoryStore::new();
        let acc = account("elder@example.com", Role::Elderly);
        let key = StorageKey::from_stored(acc.key.clone());

        store.insert_account(acc.clone()).await.unwrap();
        let found = store.get_account(&key).await.unwrap().unwrap();
        assert_eq!(found.uid, acc.uid);

        // Second insert under the same key is rejected, as the unique
        // index would in Mongo
        let dup = account("elder@example.com", Role::Elderly);
        assert!(matches!(
            store.insert_account(dup).await,
            Err(CareGraphError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_links_is_conditional() {
        let store = MemoryStore::new();
        let acc = account("carer@example.com", Role::Caregiver);
        let key = StorageKey::from_stored(acc.key.clone());
        store.insert_account(acc).await.unwrap();

        let mut write = LinkWrite::default();
        write.linked_elderly = vec!["uid-1".into()];

        assert_eq!(
            store.replace_links(&key, 0, write.clone()).await.unwrap(),
            CasOutcome::Applied
        );
        // Stale version no longer matches
        assert_eq!(
            store.replace_links(&key, 0, write).await.unwrap(),
            CasOutcome::VersionConflict
        );
        let current = store.get_account(&key).await.unwrap().unwrap();
        assert_eq!(current.link_version, 1);
        assert_eq!(current.linked_elderly, vec!["uid-1".to_string()]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryStore::new();
        store.fail_next_ops(2);

        let key = StorageKey::from_stored("missing");
        assert!(store.get_account(&key).await.unwrap_err().is_retryable());
        assert!(store.get_account(&key).await.unwrap_err().is_retryable());
        assert!(store.get_account(&key).await.unwrap().is_none());
        assert_eq!(store.op_count(), 3);
    }

    #[tokio::test]
    async fn test_friendship_edges_are_order_insensitive() {
        let store = MemoryStore::new();
        store
            .insert_friendship(FriendshipDoc::new("b", "a", FriendshipStatus::Accepted))
            .await
            .unwrap();

        assert!(store.accepted_friendship_exists("a", "b").await.unwrap());
        assert!(store.accepted_friendship_exists("b", "a").await.unwrap());
        assert!(!store.accepted_friendship_exists("a", "c").await.unwrap());

        // Pending edges grant nothing
        store
            .insert_friendship(FriendshipDoc::new("a", "c", FriendshipStatus::Pending))
            .await
            .unwrap();
        assert!(!store.accepted_friendship_exists("a", "c").await.unwrap());
    }
}
