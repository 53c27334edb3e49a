//! Document schemas for the shared store
//!
//! Defines the account record, the friendship edge, and the common
//! soft-delete metadata.

mod account;
mod friendship;
mod metadata;

pub use account::{AccountDoc, Role, ACCOUNT_COLLECTION};
pub use friendship::{FriendshipDoc, FriendshipStatus, FRIENDSHIP_COLLECTION};
pub use metadata::Metadata;
