//! The `can_act` predicate
//!
//! Answers "may actor act on behalf of subject" for messaging, consultation
//! invitations, and report access. Every feature gates through this one
//! predicate; none re-derives authorization from raw stored fields.
//!
//! Denial reasons stay internal. Features that render a user-visible
//! outcome call [`AccessGate::authorize`], which collapses denial and
//! non-existence so account existence never leaks to unauthorized actors.

use std::sync::Arc;

use tracing::debug;

use crate::db::schemas::{AccountDoc, Role};
use crate::db::store::AccountStore;
use crate::linkage::LinkageGraph;
use crate::resolver::IdentityResolver;
use crate::types::{CancelToken, CareGraphError, Result};

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied(DenialReason),
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }
}

/// Why access was denied. Internal only; never shown to the requesting
/// user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Actor account is deactivated
    ActorInactive,
    /// Caregiver actor holds no linkage edge to the subject
    NotLinked,
    /// Caregiver actor, but the subject is not an elderly account
    SubjectNotElderly,
    /// Elderly actor, counterpart is neither a linked caregiver nor an
    /// accepted friend
    NoRelationship,
}

/// The single authorization gate
pub struct AccessGate<S: AccountStore> {
    store: Arc<S>,
    resolver: Arc<IdentityResolver<S>>,
    linkage: Arc<LinkageGraph<S>>,
}

impl<S: AccountStore> AccessGate<S> {
    pub fn new(
        store: Arc<S>,
        resolver: Arc<IdentityResolver<S>>,
        linkage: Arc<LinkageGraph<S>>,
    ) -> Self {
        Self {
            store,
            resolver,
            linkage,
        }
    }

    /// May `actor` act on behalf of the account `subject_identifier`
    /// resolves to?
    ///
    /// Resolution failures propagate as typed errors; a denial is a
    /// successful answer, not an error. Callers that must not distinguish
    /// the two use [`authorize`].
    ///
    /// [`authorize`]: AccessGate::authorize
    pub async fn can_act(
        &self,
        actor: &AccountDoc,
        subject_identifier: &str,
        cancel: &CancelToken,
    ) -> Result<AccessDecision> {
        let subject = self
            .resolver
            .resolve_account(subject_identifier, cancel)
            .await?;
        self.decide(actor, &subject, cancel).await
    }

    /// User-facing gate: resolves the subject and returns it when access is
    /// granted. A denied actor and a missing subject get the same
    /// `PartyNotFound`, so existence cannot be probed; transient failures
    /// keep their retryable identity.
    pub async fn authorize(
        &self,
        actor: &AccountDoc,
        subject_identifier: &str,
        cancel: &CancelToken,
    ) -> Result<AccountDoc> {
        let subject = self
            .resolver
            .resolve_account(subject_identifier, cancel)
            .await?;

        match self.decide(actor, &subject, cancel).await? {
            AccessDecision::Granted => Ok(subject),
            AccessDecision::Denied(reason) => {
                debug!(
                    actor = %actor.uid,
                    subject = %subject.uid,
                    ?reason,
                    "access denied"
                );
                Err(CareGraphError::PartyNotFound(
                    subject_identifier.to_string(),
                ))
            }
        }
    }

    async fn decide(
        &self,
        actor: &AccountDoc,
        subject: &AccountDoc,
        cancel: &CancelToken,
    ) -> Result<AccessDecision> {
        cancel.checkpoint()?;

        if !actor.is_active {
            return Ok(AccessDecision::Denied(DenialReason::ActorInactive));
        }

        match actor.role {
            Role::Admin => Ok(AccessDecision::Granted),

            Role::Caregiver => {
                if subject.role != Role::Elderly {
                    return Ok(AccessDecision::Denied(DenialReason::SubjectNotElderly));
                }
                // Decide on current stored state, not the caller's possibly
                // stale copy of the actor record.
                let actor_fresh = self.resolver.resolve_account(&actor.uid, cancel).await?;
                let linked = self
                    .linkage
                    .list_linked_elderly_uids(&actor_fresh, cancel)
                    .await?;
                if linked.contains(&subject.uid) {
                    Ok(AccessDecision::Granted)
                } else {
                    Ok(AccessDecision::Denied(DenialReason::NotLinked))
                }
            }

            Role::Elderly => {
                // The symmetric edge lives on the caregiver's record
                if subject.role == Role::Caregiver {
                    let linked = self
                        .linkage
                        .list_linked_elderly_uids(subject, cancel)
                        .await?;
                    if linked.contains(&actor.uid) {
                        return Ok(AccessDecision::Granted);
                    }
                }

                cancel.checkpoint()?;
                if self
                    .store
                    .accepted_friendship_exists(&actor.uid, &subject.uid)
                    .await?
                {
                    Ok(AccessDecision::Granted)
                } else {
                    Ok(AccessDecision::Denied(DenialReason::NoRelationship))
                }
            }
        }
    }
}
