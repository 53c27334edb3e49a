//! Authorization for acting on behalf of another account
//!
//! Provides the single `can_act` gate consumed by messaging, consultation,
//! and reporting features.

pub mod gate;

pub use gate::{AccessDecision, AccessGate, DenialReason};
