// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AppArmor host probe: is the LSM enabled, is the profile loaded, and is it
//! in enforce mode.

use std::path::Path;

use anyhow::Context;

const APPARMOR_SYSFS: &str = "/sys/kernel/security/apparmor";
const APPARMOR_ENABLED: &str = "/sys/module/apparmor/parameters/enabled";

/// Verify the named profile against the live host.
pub fn verify(profile: &str) -> anyhow::Result<()> {
    verify_at(Path::new(APPARMOR_ENABLED), Path::new(APPARMOR_SYSFS), profile)
}

/// Testable core: `enabled_path` holds `Y`/`N`, `sysfs/profiles` lists
/// `name (mode)` lines.
pub fn verify_at(enabled_path: &Path, sysfs: &Path, profile: &str) -> anyhow::Result<()> {
    let enabled = std::fs::read_to_string(enabled_path)
        .context("apparmor not available on this host")?;
    if enabled.trim() != "Y" {
        anyhow::bail!("apparmor is disabled on this host");
    }

    let profiles = std::fs::read_to_string(sysfs.join("profiles"))
        .context("cannot read loaded apparmor profiles")?;
    let mode = profiles
        .lines()
        .find_map(|line| {
            let (name, mode) = line.rsplit_once(' ')?;
            (name == profile).then(|| mode.trim_matches(&['(', ')'][..]).to_owned())
        })
        .ok_or_else(|| anyhow::anyhow!("apparmor profile {profile} is not loaded"))?;

    if mode != "enforce" {
        anyhow::bail!("apparmor profile {profile} is loaded but in {mode} mode");
    }
    Ok(())
}
