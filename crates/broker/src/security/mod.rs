// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup security posture: restricted network, seccomp, AppArmor.
//!
//! The strict/permissive split lives behind [`SecurityPolicy`] so no
//! conditional sprinkled through the codebase alters posture: production
//! aborts on any verification failure, development/ci degrades with a
//! structured warning and a `degraded` flag.

pub mod apparmor;
pub mod network;
pub mod seccomp;

use std::path::Path;
use std::sync::Arc;

use bollard::Docker;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::config::{Config, EnvProfile};

/// How verification failures are handled.
pub trait SecurityPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called for each failed verification step. `Err` aborts startup.
    fn on_failure(&self, step: &'static str, err: anyhow::Error) -> anyhow::Result<()>;
}

/// Production: verification failures are fatal.
pub struct StrictPolicy;

impl SecurityPolicy for StrictPolicy {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn on_failure(&self, step: &'static str, err: anyhow::Error) -> anyhow::Result<()> {
        Err(err.context(format!("security verification failed: {step}")))
    }
}

/// Development/ci: failures degrade with a warning.
pub struct PermissivePolicy;

impl SecurityPolicy for PermissivePolicy {
    fn name(&self) -> &'static str {
        "permissive"
    }

    fn on_failure(&self, step: &'static str, err: anyhow::Error) -> anyhow::Result<()> {
        warn!(step, err = format!("{err:#}"), "security degraded");
        Ok(())
    }
}

/// Select the policy for the configured environment.
pub fn policy_for(config: &Config) -> Box<dyn SecurityPolicy> {
    if config.require_hardened_security || config.env_profile == EnvProfile::Production {
        Box::new(StrictPolicy)
    } else {
        Box::new(PermissivePolicy)
    }
}

/// Verified security posture, shared with the supervisor and `/healthz`.
#[derive(Clone)]
pub struct SecurityStatus {
    pub initialized: bool,
    pub degraded: bool,
    /// Network mode containers attach to: the restricted network when it
    /// verified, otherwise the default bridge.
    pub network: String,
    pub apparmor_profile: Option<String>,
    /// Materialised seccomp profile; removing the temp file is tied to this
    /// handle's drop at shutdown.
    seccomp: Option<Arc<NamedTempFile>>,
}

impl SecurityStatus {
    pub fn seccomp_path(&self) -> Option<&Path> {
        self.seccomp.as_deref().map(NamedTempFile::path)
    }

    /// Posture for tests and scripted supervisors: initialised, nothing
    /// verified, default bridge.
    pub fn unverified(network: &str) -> Self {
        Self {
            initialized: true,
            degraded: true,
            network: network.to_owned(),
            apparmor_profile: None,
            seccomp: None,
        }
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "initialized": self.initialized,
            "degraded": self.degraded,
            "network": self.network,
            "seccomp": self.seccomp.is_some(),
            "apparmor": self.apparmor_profile.is_some(),
        })
    }
}

impl std::fmt::Debug for SecurityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityStatus")
            .field("initialized", &self.initialized)
            .field("degraded", &self.degraded)
            .field("network", &self.network)
            .finish()
    }
}

/// Run the startup sequence: network, seccomp, AppArmor.
///
/// Under the strict policy any failure aborts; under the permissive policy
/// the affected layer is skipped and `degraded` set.
pub async fn init(config: &Config, docker: &Docker) -> anyhow::Result<SecurityStatus> {
    let policy = policy_for(config);
    let mut degraded = false;

    let network = match network::ensure_restricted(docker, &config.container_network).await {
        Ok(name) => name,
        Err(err) => {
            policy.on_failure("restricted network", err)?;
            degraded = true;
            "bridge".to_owned()
        }
    };

    let status = verify_profiles(config, policy.as_ref())?;
    degraded |= status.degraded;

    info!(
        policy = policy.name(),
        network = %network,
        degraded,
        "security initialised"
    );

    Ok(SecurityStatus {
        initialized: true,
        degraded,
        network,
        apparmor_profile: status.apparmor_profile,
        seccomp: status.seccomp,
    })
}

/// Profile verification half of [`init`], independent of the container
/// runtime so the production fail-fast path is unit-testable.
pub fn verify_profiles(
    config: &Config,
    policy: &dyn SecurityPolicy,
) -> anyhow::Result<ProfileStatus> {
    let mut degraded = false;

    let seccomp = match &config.seccomp_profile {
        Some(path) => match seccomp::materialise(path) {
            Ok(file) => Some(Arc::new(file)),
            Err(err) => {
                policy.on_failure("seccomp profile", err)?;
                degraded = true;
                None
            }
        },
        None => {
            policy.on_failure("seccomp profile", anyhow::anyhow!("no profile configured"))?;
            degraded = true;
            None
        }
    };

    let apparmor_profile = match &config.apparmor_profile {
        Some(profile) => match apparmor::verify(profile) {
            Ok(()) => Some(profile.clone()),
            Err(err) => {
                policy.on_failure("apparmor profile", err)?;
                degraded = true;
                None
            }
        },
        None => {
            policy.on_failure("apparmor profile", anyhow::anyhow!("no profile configured"))?;
            degraded = true;
            None
        }
    };

    Ok(ProfileStatus { degraded, seccomp, apparmor_profile })
}

/// Outcome of profile verification.
pub struct ProfileStatus {
    pub degraded: bool,
    pub seccomp: Option<Arc<NamedTempFile>>,
    pub apparmor_profile: Option<String>,
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;
