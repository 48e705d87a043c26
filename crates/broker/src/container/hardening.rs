// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security posture of the sandbox container, assembled as pure data.

use std::collections::HashMap;

use bollard::models::HostConfig;

use crate::config::Config;
use crate::security::SecurityStatus;

/// Label marking containers owned by this broker.
pub const MANAGED_LABEL: &str = "termbroker.managed";

/// Label carrying the owning session id.
pub const SESSION_LABEL: &str = "termbroker.session";

/// Writable tmpfs mount options: size-bounded, no exec, no setuid.
const TMPFS_OPTS: &str = "rw,noexec,nosuid,size=16m";

/// Build the hardened host configuration for one sandbox.
///
/// Every container runs with a read-only root, all capabilities dropped,
/// `no-new-privileges`, and the memory/PID/CPU caps from config. Seccomp and
/// AppArmor options are attached only when their profiles verified at
/// startup.
pub fn host_config(config: &Config, security: &SecurityStatus) -> HostConfig {
    let mut security_opt = vec!["no-new-privileges:true".to_owned()];
    if let Some(path) = security.seccomp_path() {
        security_opt.push(format!("seccomp={}", path.display()));
    }
    if let Some(profile) = &security.apparmor_profile {
        security_opt.push(format!("apparmor={profile}"));
    }

    let mut tmpfs = HashMap::new();
    tmpfs.insert("/tmp".to_owned(), TMPFS_OPTS.to_owned());
    tmpfs.insert("/run".to_owned(), TMPFS_OPTS.to_owned());
    tmpfs.insert(config.container_workdir.clone(), TMPFS_OPTS.to_owned());

    HostConfig {
        memory: Some(config.container_memory_bytes),
        // No swap headroom beyond the memory cap.
        memory_swap: Some(config.container_memory_bytes),
        nano_cpus: Some(config.container_nano_cpus()),
        pids_limit: Some(config.container_pids_limit),
        cap_drop: Some(vec!["ALL".to_owned()]),
        security_opt: Some(security_opt),
        readonly_rootfs: Some(true),
        tmpfs: Some(tmpfs),
        network_mode: Some(security.network.clone()),
        auto_remove: Some(false),
        ..Default::default()
    }
}

/// Labels applied to every managed container.
pub fn labels(session_id: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_owned(), "true".to_owned());
    labels.insert(SESSION_LABEL.to_owned(), session_id.to_owned());
    labels
}

#[cfg(test)]
#[path = "hardening_tests.rs"]
mod tests;
