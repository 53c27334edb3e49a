//! Account document schema
//!
//! One record per registered user. The linkage fields carry both the
//! canonical ordered list written going forward and the legacy field names
//! accumulated by earlier schema generations; only this storage boundary
//! knows the legacy names, the core logic sees a single list.

use std::fmt;

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::keys;
use crate::types::Result;

/// Collection name for accounts
pub const ACCOUNT_COLLECTION: &str = "accounts";

/// Role tag on an account. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Receives care; may message linked caregivers and accepted friends
    #[default]
    Elderly,
    /// Acts on behalf of linked elderly accounts
    Caregiver,
    /// May act on behalf of any account
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Elderly => "elderly",
            Role::Caregiver => "caregiver",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account document stored in the shared store
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Storage key derived from the canonical email (see `keys::normalize`)
    pub key: String,

    /// Canonical email, lowercase
    pub email: String,

    /// Stable opaque identifier assigned at account creation
    pub uid: String,

    /// Role tag
    #[serde(default)]
    pub role: Role,

    pub first_name: String,
    pub last_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,

    /// Deactivation is a status flag, not removal
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Canonical linked-elderly list: uids only, in link order.
    /// Every new edge is written here.
    #[serde(rename = "linkedElderly", default)]
    pub linked_elderly: Vec<String>,

    /// Version counter guarding conditional writes on the linkage fields
    #[serde(rename = "linkVersion", default)]
    pub link_version: i64,

    // Legacy linkage fields, kept readable for records written before the
    // canonical list existed. Values may be emails or uids. Unlink cleans
    // them; nothing writes them except the optional migration mirror.
    #[serde(rename = "elderlyId", skip_serializing_if = "Option::is_none")]
    pub elderly_id: Option<String>,

    #[serde(rename = "elderlyIds", default, skip_serializing_if = "Vec::is_empty")]
    pub elderly_ids: Vec<String>,

    #[serde(rename = "linkedElders", default, skip_serializing_if = "Vec::is_empty")]
    pub linked_elders: Vec<String>,

    #[serde(
        rename = "linkedElderUids",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub linked_elder_uids: Vec<String>,

    #[serde(rename = "uidOfElder", skip_serializing_if = "Option::is_none")]
    pub uid_of_elder: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AccountDoc {
    /// Create a new account document. The storage key is derived from the
    /// email and the uid is freshly assigned.
    pub fn new(
        email: &str,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        role: Role,
    ) -> Result<Self> {
        let canonical = keys::canonical_email(email)?;
        let key = keys::normalize(email)?;

        Ok(Self {
            _id: None,
            metadata: Metadata::new(),
            key: key.into_inner(),
            email: canonical,
            uid: Uuid::new_v4().to_string(),
            role,
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            date_of_birth: None,
            is_active: true,
            linked_elderly: Vec::new(),
            link_version: 0,
            elderly_id: None,
            elderly_ids: Vec::new(),
            linked_elders: Vec::new(),
            linked_elder_uids: Vec::new(),
            uid_of_elder: None,
        })
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Order-preserving union of every linkage field, canonical list first,
    /// then the legacy fields in their historical order.
    ///
    /// Deduplication here is by raw string only; raw equality is not
    /// identity equality (the same elderly may appear once as an email and
    /// once as a uid), so callers resolve every entry before comparing.
    /// `LinkageGraph` does exactly that.
    pub fn link_identifier_union(&self) -> Vec<String> {
        let mut seen = Vec::new();

        let singles = [self.elderly_id.as_deref(), self.uid_of_elder.as_deref()];
        let lists = [
            &self.linked_elderly,
            &self.elderly_ids,
            &self.linked_elders,
            &self.linked_elder_uids,
        ];

        for entry in lists
            .iter()
            .flat_map(|l| l.iter().map(String::as_str))
            .chain(singles.into_iter().flatten())
        {
            if !entry.is_empty() && !seen.iter().any(|s| s == entry) {
                seen.push(entry.to_string());
            }
        }

        seen
    }
}

impl IntoIndexes for AccountDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on the storage key: the point-lookup path
            (
                doc! { "key": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("key_unique".to_string())
                        .build(),
                ),
            ),
            // Index on uid for the scan-fallback path
            (
                doc! { "uid": 1 },
                Some(
                    IndexOptions::builder()
                        .name("uid_index".to_string())
                        .build(),
                ),
            ),
            // Index on email for the scan-fallback path
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .name("email_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AccountDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
