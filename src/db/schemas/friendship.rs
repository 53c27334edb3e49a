//! Friendship edge schema
//!
//! Accepted friendships grant elderly accounts messaging access outside the
//! caregiver linkage. The pair is stored order-normalized so a single
//! unique index covers both directions.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for friendship edges
pub const FRIENDSHIP_COLLECTION: &str = "friendships";

/// State of a friendship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    /// Requested but not yet accepted; grants nothing
    #[default]
    Pending,
    /// Accepted by the counterpart
    Accepted,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
        }
    }
}

/// Friendship edge between two account uids
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FriendshipDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Lexicographically smaller uid of the pair
    pub uid_a: String,

    /// Lexicographically larger uid of the pair
    pub uid_b: String,

    /// Edge state
    #[serde(default)]
    pub status: FriendshipStatus,
}

impl FriendshipDoc {
    /// Create an edge between two uids, order-normalized
    pub fn new(a: &str, b: &str, status: FriendshipStatus) -> Self {
        let (uid_a, uid_b) = if a <= b { (a, b) } else { (b, a) };
        Self {
            _id: None,
            metadata: Metadata::new(),
            uid_a: uid_a.to_string(),
            uid_b: uid_b.to_string(),
            status,
        }
    }

    /// Whether this edge connects the two uids, in either order
    pub fn connects(&self, a: &str, b: &str) -> bool {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        self.uid_a == lo && self.uid_b == hi
    }
}

impl IntoIndexes for FriendshipDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One edge per pair
            (
                doc! { "uid_a": 1, "uid_b": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("pair_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for FriendshipDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
