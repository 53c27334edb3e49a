//! Storage seam between the resolver core and the shared store
//!
//! The core talks to one narrow async trait. The Mongo implementation backs
//! production; the in-memory implementation backs tests and single-node
//! embedding. The store gives no cross-record transactions; the one
//! atomicity the trait does promise is the conditional link write.

use async_trait::async_trait;

use crate::db::schemas::{AccountDoc, FriendshipDoc, Role};
use crate::keys::StorageKey;
use crate::types::Result;

/// Outcome of a conditional link write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Write applied, version advanced
    Applied,
    /// The observed version is no longer current; re-read and retry
    VersionConflict,
    /// No record under that key
    Missing,
}

/// New values for every linkage field, applied in one conditional write.
///
/// Carrying all fields in one write keeps the canonical list and the legacy
/// mirror consistent with each other whenever the write lands; a write that
/// never lands leaves the previous consistent state in place.
#[derive(Debug, Clone, Default)]
pub struct LinkWrite {
    pub linked_elderly: Vec<String>,
    pub elderly_id: Option<String>,
    pub elderly_ids: Vec<String>,
    pub linked_elders: Vec<String>,
    pub linked_elder_uids: Vec<String>,
    pub uid_of_elder: Option<String>,
}

impl LinkWrite {
    /// Start from the linkage fields currently on a record
    pub fn from_account(account: &AccountDoc) -> Self {
        Self {
            linked_elderly: account.linked_elderly.clone(),
            elderly_id: account.elderly_id.clone(),
            elderly_ids: account.elderly_ids.clone(),
            linked_elders: account.linked_elders.clone(),
            linked_elder_uids: account.linked_elder_uids.clone(),
            uid_of_elder: account.uid_of_elder.clone(),
        }
    }
}

/// Async access to accounts and friendship edges
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Point lookup by storage key
    async fn get_account(&self, key: &StorageKey) -> Result<Option<AccountDoc>>;

    /// Every account whose stored uid or canonical email equals the raw
    /// identifier. Returns all matches so the resolver can surface
    /// ambiguity instead of silently picking the first.
    async fn find_accounts_by_identifier(&self, identifier: &str) -> Result<Vec<AccountDoc>>;

    /// Insert a new account record
    async fn insert_account(&self, account: AccountDoc) -> Result<()>;

    /// Conditionally replace the linkage fields of the record under `key`,
    /// guarded by the link version the caller observed
    async fn replace_links(
        &self,
        key: &StorageKey,
        expected_version: i64,
        write: LinkWrite,
    ) -> Result<CasOutcome>;

    /// Admin role assignment. Errors with `PartyNotFound` if no record
    /// exists under the key.
    async fn set_account_role(&self, key: &StorageKey, role: Role) -> Result<()>;

    /// Activate or deactivate an account
    async fn set_account_active(&self, key: &StorageKey, active: bool) -> Result<()>;

    /// Insert a friendship edge
    async fn insert_friendship(&self, friendship: FriendshipDoc) -> Result<()>;

    /// Whether an accepted friendship edge exists between the two uids,
    /// in either order
    async fn accepted_friendship_exists(&self, uid_a: &str, uid_b: &str) -> Result<bool>;
}
