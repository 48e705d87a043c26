// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State transition helpers extracted from the connection loop.
//!
//! Each function takes the shared [`BrokerState`] plus the minimal set of
//! arguments it needs, so transitions are independently testable.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::container::DestroyReason;
use crate::credential::{constant_time_eq, ClientFingerprint, CredentialHash};
use crate::error::ErrorCode;
use crate::state::BrokerState;

use super::{Session, SessionState};

/// Transition attempt against the state machine's edge set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid transition {} -> {}", self.from.as_str(), self.to.as_str())
    }
}

impl std::error::Error for InvalidTransition {}

/// Whether `from -> to` is an edge of the session state machine.
pub fn allowed(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    // Any non-final state may fail.
    if to == Failed && !from.is_final() {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Authenticated)
            | (Pending, Rejected)
            | (Authenticated, Provisioning)
            | (Authenticated, Rejected)
            | (Provisioning, Attached)
            | (Attached, Orphaned)
            | (Attached, Terminal)
            | (Orphaned, Attached)
            | (Orphaned, Terminal)
    )
}

/// Apply a transition, updating orphan bookkeeping.
pub fn apply(session: &Session, to: SessionState) -> Result<(), InvalidTransition> {
    let from = session.state();
    if !allowed(from, to) {
        return Err(InvalidTransition { from, to });
    }
    session.set_state(to);

    match to {
        SessionState::Orphaned => {
            *session.orphaned_at.lock() = Some(Instant::now());
        }
        SessionState::Attached => {
            *session.orphaned_at.lock() = None;
        }
        _ => {}
    }

    debug!(session = %session.id, from = from.as_str(), to = to.as_str(), "session transition");
    Ok(())
}

/// Authorise a resume attempt against an orphaned session.
///
/// The hash comparison is constant-time and the error does not reveal which
/// field differed. The fingerprint is advisory: a change is logged, never
/// rejected (mobile clients change IPs).
pub fn authorize_resume(
    session: &Session,
    hash: &CredentialHash,
    fingerprint: ClientFingerprint,
) -> Result<(), ErrorCode> {
    session.resume_count.fetch_add(1, Ordering::Relaxed);

    if !constant_time_eq(&session.credential_hash, hash) {
        return Err(ErrorCode::ResumeDenied);
    }

    if let Some(prev) = session.swap_fingerprint(fingerprint) {
        warn!(
            session = %session.id,
            prev = %hex(&prev),
            next = %hex(&fingerprint),
            "client fingerprint changed on resume"
        );
    }
    Ok(())
}

/// Tear a session down to `Terminal`: destroy the container, release the
/// registry slot, drop the resume throttle entry, cancel any reaper.
///
/// Idempotent: a session already in a final state is left untouched apart
/// from a redundant (no-op) container destroy.
pub async fn terminate(state: &Arc<BrokerState>, session: &Arc<Session>, reason: DestroyReason) {
    session.cancel_reaper();

    let already_final = session.state().is_final();
    if !already_final {
        if let Err(err) = apply(session, SessionState::Terminal) {
            debug!(session = %session.id, %err, "terminate on non-terminable state");
            session.set_state(SessionState::Failed);
        }
    }

    if let Some(container) = session.container_ref() {
        if let Err(err) = state.supervisor.destroy(&container, reason).await {
            warn!(session = %session.id, container = %container.id, %err, "container destroy failed");
        }
    }

    if !already_final {
        state.registry.unregister(&session.id);
        state.limiter.forget_session(&session.id);
        info!(session = %session.id, reason = reason.as_str(), "session terminated");
    }
}

/// Mark a session failed after an unexpected error; best-effort cleanup.
pub async fn fail(state: &Arc<BrokerState>, session: &Arc<Session>, detail: &str) {
    warn!(session = %session.id, detail, "session failed");
    session.cancel_reaper();
    if !session.state().is_final() {
        session.set_state(SessionState::Failed);
        state.registry.unregister(&session.id);
        state.limiter.forget_session(&session.id);
    }
    if let Some(container) = session.container_ref() {
        let _ = state.supervisor.destroy(&container, DestroyReason::ProvisionFailed).await;
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[path = "transition_tests.rs"]
mod tests;
