// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::{host_config, labels, MANAGED_LABEL, SESSION_LABEL};
use crate::config::Config;
use crate::security::SecurityStatus;

fn config() -> Config {
    Config::parse_from([
        "termbroker",
        "--container-memory-bytes",
        "134217728",
        "--container-pids-limit",
        "32",
        "--container-cpus",
        "0.25",
    ])
}

#[test]
fn baseline_hardening_always_applied() {
    let hc = host_config(&config(), &SecurityStatus::unverified("bridge"));

    assert_eq!(hc.readonly_rootfs, Some(true));
    assert_eq!(hc.cap_drop.as_deref(), Some(&["ALL".to_owned()][..]));
    let opts = hc.security_opt.unwrap_or_default();
    assert!(opts.iter().any(|o| o == "no-new-privileges:true"));
    // Nothing verified: no seccomp/apparmor options attached.
    assert!(!opts.iter().any(|o| o.starts_with("seccomp=")));
    assert!(!opts.iter().any(|o| o.starts_with("apparmor=")));
}

#[test]
fn resource_caps_from_config() {
    let hc = host_config(&config(), &SecurityStatus::unverified("bridge"));
    assert_eq!(hc.memory, Some(134_217_728));
    assert_eq!(hc.memory_swap, Some(134_217_728));
    assert_eq!(hc.pids_limit, Some(32));
    assert_eq!(hc.nano_cpus, Some(250_000_000));
}

#[test]
fn tmpfs_mounts_are_noexec_nosuid() {
    let hc = host_config(&config(), &SecurityStatus::unverified("bridge"));
    let tmpfs = hc.tmpfs.unwrap_or_default();
    for path in ["/tmp", "/run", "/home/sandbox"] {
        let opts = tmpfs.get(path).map(String::as_str).unwrap_or_default();
        assert!(opts.contains("noexec"), "{path}: {opts}");
        assert!(opts.contains("nosuid"), "{path}: {opts}");
        assert!(opts.contains("size="), "{path}: {opts}");
    }
}

#[test]
fn network_mode_follows_security_status() {
    let hc = host_config(&config(), &SecurityStatus::unverified("termbroker-restricted"));
    assert_eq!(hc.network_mode.as_deref(), Some("termbroker-restricted"));
}

#[test]
fn session_labels() {
    let labels = labels("sess-42");
    assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
    assert_eq!(labels.get(SESSION_LABEL).map(String::as_str), Some("sess-42"));
}
