// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory session registry with class-aware admission caps.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::Config;
use crate::credential::SessionClass;
use crate::error::ErrorCode;
use crate::session::Session;

/// Session map plus per-class counters, guarded by one mutex so reads of the
/// counts are always consistent with membership.
pub struct SessionRegistry {
    max_sessions: usize,
    max_anonymous: usize,
    max_authenticated: usize,
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Arc<Session>>,
    anonymous: usize,
    authenticated: usize,
}

/// Point-in-time registry counts.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryMetrics {
    pub total: usize,
    pub anonymous: usize,
    pub authenticated: usize,
    pub max_sessions: usize,
    pub max_anonymous: usize,
    pub max_authenticated: usize,
    pub utilisation: f64,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            max_sessions: config.max_sessions,
            max_anonymous: config.max_anonymous_sessions,
            max_authenticated: config.max_authenticated_sessions,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Admission pre-check: does `class` have headroom right now?
    ///
    /// Advisory only; [`register`](Self::register) re-checks under the same
    /// lock that inserts, so a race between two admissions cannot overshoot.
    pub fn admit(&self, class: SessionClass) -> Result<(), ErrorCode> {
        let inner = self.inner.lock();
        self.check_headroom(&inner, class)
    }

    /// Insert a session, enforcing the caps and id uniqueness.
    pub fn register(&self, session: Arc<Session>) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        self.check_headroom(&inner, session.class())?;
        if inner.sessions.contains_key(&session.id) {
            return Err(ErrorCode::Internal);
        }
        match session.class() {
            SessionClass::Anonymous => inner.anonymous += 1,
            SessionClass::Authenticated => inner.authenticated += 1,
        }
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Remove a session and release its class slot. Safe to call twice.
    pub fn unregister(&self, id: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.remove(id)?;
        match session.class() {
            SessionClass::Anonymous => inner.anonymous = inner.anonymous.saturating_sub(1),
            SessionClass::Authenticated => {
                inner.authenticated = inner.authenticated.saturating_sub(1)
            }
        }
        Some(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().sessions.get(id).cloned()
    }

    /// Move a session to the other class; allowed only with destination
    /// headroom.
    pub fn reclassify(&self, id: &str, to: SessionClass) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.get(id).cloned().ok_or(ErrorCode::SessionNotFound)?;
        let from = session.class();
        if from == to {
            return Ok(());
        }
        match to {
            SessionClass::Anonymous if inner.anonymous >= self.max_anonymous => {
                return Err(ErrorCode::AdmissionDenied)
            }
            SessionClass::Authenticated if inner.authenticated >= self.max_authenticated => {
                return Err(ErrorCode::AdmissionDenied)
            }
            _ => {}
        }
        match from {
            SessionClass::Anonymous => inner.anonymous -= 1,
            SessionClass::Authenticated => inner.authenticated -= 1,
        }
        match to {
            SessionClass::Anonymous => inner.anonymous += 1,
            SessionClass::Authenticated => inner.authenticated += 1,
        }
        session.set_class(to);
        Ok(())
    }

    pub fn metrics(&self) -> RegistryMetrics {
        let inner = self.inner.lock();
        RegistryMetrics {
            total: inner.sessions.len(),
            anonymous: inner.anonymous,
            authenticated: inner.authenticated,
            max_sessions: self.max_sessions,
            max_anonymous: self.max_anonymous,
            max_authenticated: self.max_authenticated,
            utilisation: inner.sessions.len() as f64 / self.max_sessions.max(1) as f64,
        }
    }

    /// Check counter coherence against membership. Used by tests and the
    /// health endpoint's debug path.
    pub fn validate_invariants(&self) -> anyhow::Result<()> {
        let inner = self.inner.lock();
        let anonymous =
            inner.sessions.values().filter(|s| s.class() == SessionClass::Anonymous).count();
        let authenticated = inner.sessions.len() - anonymous;
        if anonymous != inner.anonymous || authenticated != inner.authenticated {
            anyhow::bail!(
                "counter drift: counted {anonymous}/{authenticated}, recorded {}/{}",
                inner.anonymous,
                inner.authenticated
            );
        }
        if inner.anonymous > self.max_anonymous
            || inner.authenticated > self.max_authenticated
            || inner.sessions.len() > self.max_sessions
        {
            anyhow::bail!("cap exceeded: {}", inner.sessions.len());
        }
        Ok(())
    }

    /// Snapshot all sessions (shutdown teardown).
    pub fn drain(&self) -> Vec<Arc<Session>> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    fn check_headroom(&self, inner: &RegistryInner, class: SessionClass) -> Result<(), ErrorCode> {
        if inner.sessions.len() >= self.max_sessions {
            return Err(ErrorCode::AdmissionDenied);
        }
        let at_cap = match class {
            SessionClass::Anonymous => inner.anonymous >= self.max_anonymous,
            SessionClass::Authenticated => inner.authenticated >= self.max_authenticated,
        };
        if at_cap {
            return Err(ErrorCode::AdmissionDenied);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
