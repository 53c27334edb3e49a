//! Error types for the caregraph core
//!
//! Resolution and authorization failures are returned as typed results to
//! the calling feature, which decides user-facing messaging. "Not
//! authorized" and "lookup failed" are distinct variants; nothing in this
//! crate collapses them into a bare boolean.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CareGraphError>;

/// Errors produced by the resolver, linkage, and authorization layers
#[derive(Debug, Error)]
pub enum CareGraphError {
    /// Raw input was malformed: empty, or with no resolvable structure
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Input was well-formed but no matching account exists.
    /// Carries the original identifier for diagnostics.
    #[error("No account found for '{0}'")]
    PartyNotFound(String),

    /// A link request for an edge that already exists under
    /// resolved-identity comparison
    #[error("Caregiver '{caregiver}' is already linked to elderly '{elderly}'")]
    AlreadyLinked { caregiver: String, elderly: String },

    /// A link party resolved to an account with the wrong role
    #[error("Account '{identifier}' does not have the {expected} role")]
    RoleMismatch {
        identifier: String,
        expected: String,
    },

    /// A scan, or a colliding normalized key, yielded more than one
    /// candidate account
    #[error("Identifier '{identifier}' matched {candidates} accounts")]
    AmbiguousMatch {
        identifier: String,
        candidates: usize,
    },

    /// Network or availability failure against the shared store.
    /// Safe to retry with backoff.
    #[error("Transient store failure: {0}")]
    TransientStore(String),

    /// Non-retryable store failure
    #[error("Database error: {0}")]
    Database(String),

    /// The caller abandoned the operation; the late result was discarded
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CareGraphError {
    /// Whether a retry with backoff may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CareGraphError::TransientStore(_))
    }

    /// Message suitable for showing to an end user.
    ///
    /// Authorization denial surfaces through [`PartyNotFound`] (see
    /// `AccessGate::authorize`), so denial and non-existence read the same
    /// here and account existence never leaks to unauthorized actors.
    ///
    /// [`PartyNotFound`]: CareGraphError::PartyNotFound
    pub fn user_message(&self) -> &'static str {
        match self {
            CareGraphError::InvalidIdentifier(_) => {
                "That does not look like a valid email or account id."
            }
            CareGraphError::PartyNotFound(_) => "This account is not available.",
            CareGraphError::AlreadyLinked { .. } => "This account is already linked.",
            CareGraphError::TransientStore(_) => "Something went wrong, please try again.",
            CareGraphError::Cancelled => "The request was cancelled.",
            _ => "The request could not be completed.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(CareGraphError::TransientStore("timeout".into()).is_retryable());
        assert!(!CareGraphError::Database("bad write".into()).is_retryable());
        assert!(!CareGraphError::PartyNotFound("x".into()).is_retryable());
        assert!(!CareGraphError::Cancelled.is_retryable());
    }

    #[test]
    fn test_user_message_hides_detail() {
        let err = CareGraphError::PartyNotFound("grandma@example.com".into());
        assert!(!err.user_message().contains("grandma"));
    }
}
