// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session record and state machine.

pub mod reaper;
pub mod transition;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::container::ContainerRef;
use crate::credential::{ClientFingerprint, CredentialHash, SessionClass};
use crate::replay::ReplayBuffer;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Authenticated,
    Provisioning,
    Attached,
    Orphaned,
    Terminal,
    Rejected,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authenticated => "authenticated",
            Self::Provisioning => "provisioning",
            Self::Attached => "attached",
            Self::Orphaned => "orphaned",
            Self::Terminal => "terminal",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    /// No transitions leave these states.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminal | Self::Rejected | Self::Failed)
    }
}

/// One brokered session: identity, container, replay buffer, timers.
///
/// Only the per-session connection task mutates the record; external
/// observers (reapers, metrics) read through the registry.
pub struct Session {
    pub id: String,
    pub credential_hash: CredentialHash,
    class: Mutex<SessionClass>,
    state: Mutex<SessionState>,
    fingerprint: Mutex<ClientFingerprint>,
    pub container: Mutex<Option<ContainerRef>>,
    pub replay: Mutex<ReplayBuffer>,
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
    pub orphaned_at: Mutex<Option<Instant>>,
    pub resume_count: AtomicU32,
    /// Guard against concurrent attach/detach races: set for the duration
    /// of any attach or re-attach sequence.
    attaching: AtomicBool,
    /// Cancel handle for the orphan-grace reaper, present only while orphaned.
    pub reaper: Mutex<Option<CancellationToken>>,
}

impl Session {
    pub fn new(
        credential_hash: CredentialHash,
        class: SessionClass,
        fingerprint: ClientFingerprint,
        max_chunks: usize,
        max_bytes: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            credential_hash,
            class: Mutex::new(class),
            state: Mutex::new(SessionState::Pending),
            fingerprint: Mutex::new(fingerprint),
            container: Mutex::new(None),
            replay: Mutex::new(ReplayBuffer::new(max_chunks, max_bytes)),
            created_at: now,
            last_activity: Mutex::new(now),
            orphaned_at: Mutex::new(None),
            resume_count: AtomicU32::new(0),
            attaching: AtomicBool::new(false),
            reaper: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        *self.state.lock() = next;
    }

    pub fn class(&self) -> SessionClass {
        *self.class.lock()
    }

    pub(crate) fn set_class(&self, class: SessionClass) {
        *self.class.lock() = class;
    }

    pub fn fingerprint(&self) -> ClientFingerprint {
        *self.fingerprint.lock()
    }

    /// Record the fingerprint of a resuming client, returning the previous
    /// value when it changed (advisory: logged, never rejected).
    pub fn swap_fingerprint(&self, next: ClientFingerprint) -> Option<ClientFingerprint> {
        let mut current = self.fingerprint.lock();
        if *current == next {
            return None;
        }
        let prev = *current;
        *current = next;
        Some(prev)
    }

    /// Refresh the activity clock. Every inbound transport message counts,
    /// control frames included.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Try to enter an attach/detach critical section.
    pub fn begin_attach(&self) -> bool {
        self.attaching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_attach(&self) {
        self.attaching.store(false, Ordering::Release);
    }

    pub fn container_ref(&self) -> Option<ContainerRef> {
        self.container.lock().clone()
    }

    /// Cancel and clear the orphan reaper, if one is pending.
    pub fn cancel_reaper(&self) {
        if let Some(token) = self.reaper.lock().take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("class", &self.class().as_str())
            .field("state", &self.state().as_str())
            .finish()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
