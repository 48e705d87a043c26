// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::container::{Shared, Supervisor};
use crate::ratelimit::RateLimiter;
use crate::registry::SessionRegistry;
use crate::security::SecurityStatus;

/// Shared broker state passed to every connection task via axum `State`.
///
/// Constructed once at startup; no process-wide singletons, so tests can run
/// several brokers in one process.
pub struct BrokerState {
    pub config: Config,
    pub registry: SessionRegistry,
    pub limiter: Arc<RateLimiter>,
    pub supervisor: Arc<dyn Supervisor>,
    pub security: SecurityStatus,
    pub shutdown: CancellationToken,
}

impl BrokerState {
    pub fn new(
        config: Config,
        supervisor: impl Shared,
        security: SecurityStatus,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(&config),
            limiter: Arc::new(RateLimiter::new(&config)),
            config,
            supervisor: supervisor.shared(),
            security,
            shutdown,
        }
    }
}

impl std::fmt::Debug for BrokerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerState")
            .field("sessions", &self.registry.metrics().total)
            .field("degraded", &self.security.degraded)
            .finish()
    }
}
