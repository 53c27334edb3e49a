//! Cooperative cancellation for in-flight store round trips
//!
//! The shared store offers no way to abort a request that is already on the
//! wire. A caller that goes away mid-request (a view unmounting, a lookup
//! superseded by newer input) cancels its token instead; every resolver and
//! linkage operation checks the token after each round trip and discards
//! late results rather than acting on them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::error::{CareGraphError, Result};

/// Cheap-to-clone cancellation token shared between a caller and the
/// operations it issued
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Bail out with [`CareGraphError::Cancelled`] if the token has been
    /// cancelled. Called between suspension points so a cancelled operation
    /// never acts on a late result.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CareGraphError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_passes_checkpoint() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn test_cancel_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        token.cancel();

        assert!(clone.is_cancelled());
        assert!(matches!(
            clone.checkpoint(),
            Err(CareGraphError::Cancelled)
        ));
    }
}
