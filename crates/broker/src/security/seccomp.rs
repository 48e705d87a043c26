// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seccomp profile verification and materialisation.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use tempfile::NamedTempFile;

/// Verify the profile file and materialise it to a private temp file.
///
/// The temp file (0600, removed when the handle drops at shutdown) is what
/// gets passed to the runtime, so a later edit of the source file cannot
/// change the profile of running containers.
pub fn materialise(path: &Path) -> anyhow::Result<NamedTempFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read seccomp profile {}", path.display()))?;
    verify(&raw)?;

    let mut file = tempfile::Builder::new()
        .prefix("termbroker-seccomp-")
        .suffix(".json")
        .tempfile()
        .context("create seccomp temp file")?;
    file.write_all(raw.as_bytes()).context("write seccomp temp file")?;
    file.flush().context("flush seccomp temp file")?;
    Ok(file)
}

/// Structural checks: valid JSON with a `defaultAction` and a non-empty
/// `syscalls` rule list.
pub fn verify(raw: &str) -> anyhow::Result<()> {
    let profile: serde_json::Value =
        serde_json::from_str(raw).context("seccomp profile is not valid JSON")?;

    if profile.get("defaultAction").and_then(|v| v.as_str()).is_none() {
        anyhow::bail!("seccomp profile has no defaultAction");
    }

    match profile.get("syscalls").and_then(|v| v.as_array()) {
        Some(rules) if !rules.is_empty() => Ok(()),
        _ => anyhow::bail!("seccomp profile has no syscall rules"),
    }
}
