//! Shared types: the crate error taxonomy and cancellation token

pub mod cancel;
pub mod error;

pub use cancel::CancelToken;
pub use error::{CareGraphError, Result};
