//! Storage layer: document schemas, the store seam, and its two
//! implementations

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use store::{AccountStore, CasOutcome, LinkWrite};
