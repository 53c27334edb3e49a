//! Storage key normalization
//!
//! The shared store addresses account records by a key derived from the
//! owner's email. This module is the single implementation of that
//! transform; linkage, notifications, and admin tooling all go through it.
//! Earlier generations of the platform carried several divergent copies that
//! silently disagreed on the key for the same email, so lookups failed
//! depending on which code path ran.

use std::fmt;

use crate::types::{CareGraphError, Result};

/// Characters the store rejects in hierarchical key paths
const ILLEGAL_KEY_CHARS: &[char] = &['.', '#', '$', '/', '[', ']'];

/// Replacement for illegal key characters
const FILLER: char = '_';

/// A key under which an account record is stored
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap a key string that was previously produced by [`normalize`] and
    /// read back from a stored record
    pub fn from_stored(key: impl Into<String>) -> Self {
        StorageKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical form of an email: trimmed and lowercased.
///
/// This is the form stored on the account record and compared against at
/// resolution time. Empty input is an explicit error, never an empty string.
pub fn canonical_email(raw: &str) -> Result<String> {
    let canonical = raw.trim().to_lowercase();
    if canonical.is_empty() {
        return Err(CareGraphError::InvalidIdentifier(
            "empty identifier".to_string(),
        ));
    }
    Ok(canonical)
}

/// Produce the deterministic storage key for a raw email.
///
/// Lowercases and trims the input, then replaces each character the store
/// rejects in key paths with `_`. The transform is deliberately lossy:
/// distinct emails that differ only in replaced characters collide on one
/// key. Collisions are detected at resolution time by comparing the stored
/// canonical email against the queried one (see the resolver module); they
/// are never silently resolved here.
pub fn normalize(raw: &str) -> Result<StorageKey> {
    let canonical = canonical_email(raw)?;

    let key: String = canonical
        .chars()
        .map(|c| if ILLEGAL_KEY_CHARS.contains(&c) { FILLER } else { c })
        .collect();

    // An identifier made entirely of replaced characters carries no
    // resolvable structure.
    if key.chars().all(|c| c == FILLER) {
        return Err(CareGraphError::InvalidIdentifier(format!(
            "identifier '{}' has no resolvable structure",
            raw.trim()
        )));
    }

    Ok(StorageKey(key))
}

/// Delivery key for the notification feature.
///
/// Notifications are filed under the recipient's storage key; the
/// notification layer performs no authorization of its own and assumes the
/// caller already went through the access gate.
pub fn delivery_key(recipient_email: &str) -> Result<String> {
    Ok(format!("notify:{}", normalize(recipient_email)?))
}
