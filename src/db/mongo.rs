//! MongoDB-backed account store
//!
//! Connects with a short server-selection timeout, verifies with a ping,
//! applies schema-declared indexes, and filters soft-deleted documents on
//! every read. Connectivity-shaped failures surface as transient errors so
//! callers can retry with backoff; everything else is a hard database
//! error.

use bson::{doc, DateTime, Document};
use mongodb::error::ErrorKind;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::StoreConfig;
use crate::db::schemas::{
    AccountDoc, FriendshipDoc, FriendshipStatus, Metadata, Role, ACCOUNT_COLLECTION,
    FRIENDSHIP_COLLECTION,
};
use crate::db::store::{AccountStore, CasOutcome, LinkWrite};
use crate::keys::StorageKey;
use crate::types::{CareGraphError, Result};

/// Trait for schemas that declare their own index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas carrying mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Map a driver error to the crate taxonomy. I/O and server-selection
/// failures are retryable; the rest are not.
fn store_err(context: &str, e: mongodb::error::Error) -> CareGraphError {
    match *e.kind {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => {
            CareGraphError::TransientStore(format!("{context}: {e}"))
        }
        _ => CareGraphError::Database(format!("{context}: {e}")),
    }
}

/// MongoDB implementation of [`AccountStore`]
#[derive(Clone)]
pub struct MongoStore {
    accounts: Collection<AccountDoc>,
    friendships: Collection<FriendshipDoc>,
}

impl MongoStore {
    /// Connect, verify the connection, and apply indexes
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!("Connecting to MongoDB at {}", config.uri);

        // Avoid hanging on an unreachable server
        let timeout_uri = if config.uri.contains('?') {
            format!(
                "{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000",
                config.uri
            )
        } else {
            format!(
                "{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000",
                config.uri
            )
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| store_err("failed to connect to MongoDB", e))?;

        client
            .database(&config.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| store_err("MongoDB ping failed", e))?;

        info!("Connected to MongoDB database '{}'", config.db_name);

        let db = client.database(&config.db_name);
        let accounts = db.collection::<AccountDoc>(ACCOUNT_COLLECTION);
        let friendships = db.collection::<FriendshipDoc>(FRIENDSHIP_COLLECTION);

        apply_indexes::<AccountDoc>(&accounts).await?;
        apply_indexes::<FriendshipDoc>(&friendships).await?;

        Ok(Self {
            accounts,
            friendships,
        })
    }
}

/// Apply the indexes a schema declares for itself
async fn apply_indexes<T>(collection: &Collection<T>) -> Result<()>
where
    T: Serialize + DeserializeOwned + Send + Sync + IntoIndexes,
{
    let schema_indices = T::into_indices();
    if schema_indices.is_empty() {
        return Ok(());
    }

    let indices: Vec<IndexModel> = schema_indices
        .into_iter()
        .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
        .collect();

    collection
        .create_indexes(indices)
        .await
        .map_err(|e| store_err("failed to create indexes", e))?;

    Ok(())
}

/// Filter clause matching the observed link version. Records written before
/// the version counter existed have no field at all; treat that as
/// version 0.
fn version_filter(expected_version: i64) -> Document {
    if expected_version == 0 {
        doc! { "$in": [0i64, bson::Bson::Null] }
    } else {
        doc! { "$eq": expected_version }
    }
}

#[async_trait]
impl AccountStore for MongoStore {
    async fn get_account(&self, key: &StorageKey) -> Result<Option<AccountDoc>> {
        self.accounts
            .find_one(doc! {
                "key": key.as_str(),
                "metadata.is_deleted": { "$ne": true },
            })
            .await
            .map_err(|e| store_err("account lookup failed", e))
    }

    async fn find_accounts_by_identifier(&self, identifier: &str) -> Result<Vec<AccountDoc>> {
        let cursor = self
            .accounts
            .find(doc! {
                "$or": [ { "uid": identifier }, { "email": identifier } ],
                "metadata.is_deleted": { "$ne": true },
            })
            .await
            .map_err(|e| store_err("account scan failed", e))?;

        let results: Vec<AccountDoc> = cursor
            .filter_map(|item| async {
                match item {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        error!("Error reading account document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    async fn insert_account(&self, mut account: AccountDoc) -> Result<()> {
        let metadata = account.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        self.accounts
            .insert_one(account)
            .await
            .map_err(|e| store_err("account insert failed", e))?;

        Ok(())
    }

    async fn replace_links(
        &self,
        key: &StorageKey,
        expected_version: i64,
        write: LinkWrite,
    ) -> Result<CasOutcome> {
        let mut set = doc! {
            "linkedElderly": write.linked_elderly,
            "elderlyIds": write.elderly_ids,
            "linkedElders": write.linked_elders,
            "linkedElderUids": write.linked_elder_uids,
            "linkVersion": expected_version + 1,
            "metadata.updated_at": DateTime::now(),
        };
        let mut unset = Document::new();

        match write.elderly_id {
            Some(v) => {
                set.insert("elderlyId", v);
            }
            None => {
                unset.insert("elderlyId", "");
            }
        }
        match write.uid_of_elder {
            Some(v) => {
                set.insert("uidOfElder", v);
            }
            None => {
                unset.insert("uidOfElder", "");
            }
        }

        let mut update = doc! { "$set": set };
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }

        let result = self
            .accounts
            .update_one(
                doc! {
                    "key": key.as_str(),
                    "linkVersion": version_filter(expected_version),
                    "metadata.is_deleted": { "$ne": true },
                },
                update,
            )
            .await
            .map_err(|e| store_err("link write failed", e))?;

        if result.matched_count == 1 {
            return Ok(CasOutcome::Applied);
        }

        // The conditional write missed: either the version moved or the
        // record is gone. Disambiguate with a plain read.
        match self.get_account(key).await? {
            Some(_) => Ok(CasOutcome::VersionConflict),
            None => Ok(CasOutcome::Missing),
        }
    }

    async fn set_account_role(&self, key: &StorageKey, role: Role) -> Result<()> {
        let result = self
            .accounts
            .update_one(
                doc! { "key": key.as_str(), "metadata.is_deleted": { "$ne": true } },
                doc! { "$set": {
                    "role": role.as_str(),
                    "metadata.updated_at": DateTime::now(),
                } },
            )
            .await
            .map_err(|e| store_err("role update failed", e))?;

        if result.matched_count == 0 {
            return Err(CareGraphError::PartyNotFound(key.as_str().to_string()));
        }
        Ok(())
    }

    async fn set_account_active(&self, key: &StorageKey, active: bool) -> Result<()> {
        let result = self
            .accounts
            .update_one(
                doc! { "key": key.as_str(), "metadata.is_deleted": { "$ne": true } },
                doc! { "$set": {
                    "is_active": active,
                    "metadata.updated_at": DateTime::now(),
                } },
            )
            .await
            .map_err(|e| store_err("activation update failed", e))?;

        if result.matched_count == 0 {
            return Err(CareGraphError::PartyNotFound(key.as_str().to_string()));
        }
        Ok(())
    }

    async fn insert_friendship(&self, mut friendship: FriendshipDoc) -> Result<()> {
        let metadata = friendship.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        self.friendships
            .insert_one(friendship)
            .await
            .map_err(|e| store_err("friendship insert failed", e))?;

        Ok(())
    }

    async fn accepted_friendship_exists(&self, uid_a: &str, uid_b: &str) -> Result<bool> {
        let (lo, hi) = if uid_a <= uid_b {
            (uid_a, uid_b)
        } else {
            (uid_b, uid_a)
        };

        let found = self
            .friendships
            .find_one(doc! {
                "uid_a": lo,
                "uid_b": hi,
                "status": FriendshipStatus::Accepted.as_str(),
                "metadata.is_deleted": { "$ne": true },
            })
            .await
            .map_err(|e| store_err("friendship lookup failed", e))?;

        Ok(found.is_some())
    }
}
