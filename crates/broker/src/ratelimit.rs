// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-window throttles: per-IP connection admission and per-session
//! resume attempts, plus the output-buffer byte guard.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;

/// Resume attempts use a fixed one-minute window regardless of the
/// connection-throttle window.
const RESUME_WINDOW: Duration = Duration::from_secs(60);

/// Block applied to a session once its resume cap is exceeded.
const RESUME_BLOCK: Duration = Duration::from_secs(300);

/// Sweep interval for expired window entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Throttle decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Blocked,
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

/// Per-IP and per-session fixed-window throttles.
///
/// Both maps are swept periodically; an entry idle for two windows is
/// forgotten. Session entries are also dropped eagerly on clean termination.
pub struct RateLimiter {
    enabled: bool,
    connection_cap: u32,
    connection_window: Duration,
    resume_cap: u32,
    connections: Mutex<HashMap<IpAddr, WindowEntry>>,
    resumes: Mutex<HashMap<String, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.enable_connection_throttle,
            connection_cap: config.max_connections_per_ip_per_minute,
            connection_window: config.connection_throttle_window(),
            resume_cap: config.max_resume_attempts_per_minute,
            connections: Mutex::new(HashMap::new()),
            resumes: Mutex::new(HashMap::new()),
        }
    }

    /// Count a connection attempt from `ip` against its window.
    pub fn check_connection(&self, ip: IpAddr) -> Decision {
        self.check_connection_at(ip, Instant::now())
    }

    pub fn check_connection_at(&self, ip: IpAddr, now: Instant) -> Decision {
        if !self.enabled {
            return Decision::Allowed;
        }
        let ip = ip.to_canonical();
        let mut map = self.connections.lock();
        let entry = map.entry(ip).or_insert(WindowEntry {
            count: 0,
            window_start: now,
            blocked_until: None,
        });
        tick(entry, now, self.connection_window, self.connection_cap, BlockPolicy::FromWindowStart)
    }

    /// Count a resume attempt for `session_id` against its window.
    pub fn check_resume(&self, session_id: &str) -> Decision {
        self.check_resume_at(session_id, Instant::now())
    }

    pub fn check_resume_at(&self, session_id: &str, now: Instant) -> Decision {
        let mut map = self.resumes.lock();
        let entry = map.entry(session_id.to_owned()).or_insert(WindowEntry {
            count: 0,
            window_start: now,
            blocked_until: None,
        });
        tick(entry, now, RESUME_WINDOW, self.resume_cap, BlockPolicy::FromNow(RESUME_BLOCK))
    }

    /// Drop the resume counter for a cleanly terminated session.
    pub fn forget_session(&self, session_id: &str) {
        self.resumes.lock().remove(session_id);
    }

    /// Remove entries idle for two windows.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    pub fn sweep_at(&self, now: Instant) {
        let conn_idle = self.connection_window * 2;
        self.connections
            .lock()
            .retain(|_, entry| !expired(entry, now, conn_idle));
        self.resumes
            .lock()
            .retain(|_, entry| !expired(entry, now, RESUME_WINDOW * 2));
    }

    /// Spawn the periodic sweep task; stops when `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        limiter.sweep();
                        debug!("rate-limit sweep complete");
                    }
                }
            }
        });
    }
}

/// Where the block deadline is anchored once the cap is exceeded.
enum BlockPolicy {
    /// `window_start + 2·window` (per-IP connections).
    FromWindowStart,
    /// `now + fixed` (per-session resumes).
    FromNow(Duration),
}

/// Advance a fixed-window entry by one event and decide.
fn tick(
    entry: &mut WindowEntry,
    now: Instant,
    window: Duration,
    cap: u32,
    policy: BlockPolicy,
) -> Decision {
    if let Some(until) = entry.blocked_until {
        if now < until {
            return Decision::Blocked;
        }
        entry.blocked_until = None;
        entry.window_start = now;
        entry.count = 0;
    }

    if now.duration_since(entry.window_start) >= window {
        entry.window_start = now;
        entry.count = 0;
    }

    entry.count += 1;
    if entry.count > cap {
        entry.blocked_until = Some(match policy {
            BlockPolicy::FromWindowStart => entry.window_start + window * 2,
            BlockPolicy::FromNow(fixed) => now + fixed,
        });
        return Decision::Blocked;
    }
    Decision::Allowed
}

fn expired(entry: &WindowEntry, now: Instant, idle: Duration) -> bool {
    if let Some(until) = entry.blocked_until {
        if now < until {
            return false;
        }
    }
    now.duration_since(entry.window_start) >= idle
}

/// Buffer guard: true when appending `additional` bytes to `observed` stays
/// within `cap`. Consulted before any output-buffer append or oversized
/// inbound message.
pub fn within_cap(observed: usize, additional: usize, cap: usize) -> bool {
    observed.saturating_add(additional) <= cap
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
