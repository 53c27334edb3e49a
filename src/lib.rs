//! CareGraph - identity resolution and caregiver linkage core
//!
//! The elder-care platform's shared account store accumulated several
//! generations of identifier handling: emails and opaque uids used
//! interchangeably, divergent email-to-key transforms, and five
//! differently named linkage fields on the caregiver record. This crate
//! consolidates that into one resolver core that every feature consumes.
//!
//! ## Components
//!
//! - **Keys**: the single email-to-storage-key transform, used by linkage,
//!   notifications, and admin tooling alike
//! - **Resolver**: raw identifier to canonical account record, with TTL
//!   caching, bounded retry, and explicit ambiguity surfacing
//! - **Linkage**: caregiver-elderly edges with resolved-identity
//!   deduplication and optimistic-concurrency mutation
//! - **Auth**: the one `can_act` gate for messaging, consultations, and
//!   reports
//! - **Db**: the store seam, its MongoDB implementation, and an in-memory
//!   implementation for tests and single-node embedding

pub mod auth;
pub mod config;
pub mod db;
pub mod keys;
pub mod linkage;
pub mod resolver;
pub mod types;

pub use auth::{AccessDecision, AccessGate, DenialReason};
pub use config::{LinkageConfig, ResolverConfig, StoreConfig};
pub use db::memory::MemoryStore;
pub use db::mongo::MongoStore;
pub use db::schemas::{AccountDoc, FriendshipDoc, FriendshipStatus, Metadata, Role};
pub use db::store::{AccountStore, CasOutcome, LinkWrite};
pub use keys::{delivery_key, normalize, StorageKey};
pub use linkage::LinkageGraph;
pub use resolver::IdentityResolver;
pub use types::{CancelToken, CareGraphError, Result};
