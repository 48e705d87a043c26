// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Terminal session broker for browser-hosted CLI sandboxes.
#[derive(Debug, Clone, Parser)]
#[command(name = "termbroker", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "BROKER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "BROKER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Total session cap across both classes.
    #[arg(long, env = "BROKER_MAX_SESSIONS", default_value_t = 50)]
    pub max_sessions: usize,

    /// Cap on sessions opened without credentials.
    #[arg(long, env = "BROKER_MAX_ANONYMOUS_SESSIONS", default_value_t = 10)]
    pub max_anonymous_sessions: usize,

    /// Cap on credentialed sessions.
    #[arg(long, env = "BROKER_MAX_AUTHENTICATED_SESSIONS", default_value_t = 40)]
    pub max_authenticated_sessions: usize,

    /// How long an orphaned session stays resumable, in milliseconds.
    #[arg(long, env = "BROKER_ORPHAN_GRACE_MS", default_value_t = 300_000)]
    pub orphan_grace_ms: u64,

    /// Idle timeout for attached sessions in milliseconds (0 = disabled).
    #[arg(long, env = "BROKER_MAX_IDLE_MS", default_value_t = 1_800_000)]
    pub max_idle_ms: u64,

    /// Replay buffer cap in retained output chunks.
    #[arg(long, env = "BROKER_OUTPUT_BUFFER_MAX_CHUNKS", default_value_t = 1000)]
    pub output_buffer_max_chunks: usize,

    /// Replay buffer cap in bytes.
    #[arg(long, env = "BROKER_OUTPUT_BUFFER_MAX_BYTES", default_value_t = 1_048_576)]
    pub output_buffer_max_bytes: usize,

    /// Enable the per-IP connection throttle.
    #[arg(
        long,
        env = "BROKER_ENABLE_CONNECTION_THROTTLE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_connection_throttle: bool,

    /// Connection admissions allowed per source IP per window.
    #[arg(long, env = "BROKER_MAX_CONNECTIONS_PER_IP_PER_MINUTE", default_value_t = 10)]
    pub max_connections_per_ip_per_minute: u32,

    /// Connection throttle window in milliseconds.
    #[arg(long, env = "BROKER_CONNECTION_THROTTLE_WINDOW_MS", default_value_t = 60_000)]
    pub connection_throttle_window_ms: u64,

    /// Resume attempts allowed per session per minute.
    #[arg(long, env = "BROKER_MAX_RESUME_ATTEMPTS_PER_MINUTE", default_value_t = 5)]
    pub max_resume_attempts_per_minute: u32,

    /// Hardened sandbox image to run.
    #[arg(long, env = "BROKER_CONTAINER_IMAGE", default_value = "termbroker-sandbox:latest")]
    pub container_image: String,

    /// Name of the restricted bridge network.
    #[arg(long, env = "BROKER_CONTAINER_NETWORK", default_value = "termbroker-restricted")]
    pub container_network: String,

    /// Per-container memory cap in bytes.
    #[arg(long, env = "BROKER_CONTAINER_MEMORY_BYTES", default_value_t = 268_435_456)]
    pub container_memory_bytes: i64,

    /// Per-container PID cap.
    #[arg(long, env = "BROKER_CONTAINER_PIDS_LIMIT", default_value_t = 64)]
    pub container_pids_limit: i64,

    /// Per-container CPU cap (fractional cores).
    #[arg(long, env = "BROKER_CONTAINER_CPUS", default_value_t = 0.5)]
    pub container_cpus: f64,

    /// Non-root user the sandbox process runs as.
    #[arg(long, env = "BROKER_CONTAINER_USER", default_value = "sandbox")]
    pub container_user: String,

    /// Working directory inside the sandbox.
    #[arg(long, env = "BROKER_CONTAINER_WORKDIR", default_value = "/home/sandbox")]
    pub container_workdir: String,

    /// Path to the seccomp profile JSON.
    #[arg(long, env = "BROKER_SECCOMP_PROFILE")]
    pub seccomp_profile: Option<PathBuf>,

    /// Name of the AppArmor profile expected to be loaded on the host.
    #[arg(long, env = "BROKER_APPARMOR_PROFILE")]
    pub apparmor_profile: Option<String>,

    /// Abort startup when any security profile cannot be verified.
    #[arg(long, env = "BROKER_REQUIRE_HARDENED_SECURITY")]
    pub require_hardened_security: bool,

    /// Environment profile (development, ci, production).
    #[arg(long, env = "BROKER_ENV_PROFILE", default_value = "development")]
    pub env_profile: EnvProfile,

    /// Docker socket override (defaults to the platform socket).
    #[arg(long, env = "BROKER_DOCKER_SOCKET")]
    pub docker_socket: Option<String>,

    /// Deadline for the first (auth) message on a new transport, in milliseconds.
    #[arg(long, env = "BROKER_AUTH_READ_TIMEOUT_MS", default_value_t = 5_000)]
    pub auth_read_timeout_ms: u64,

    /// Graceful container stop wait before force-kill, in seconds.
    #[arg(long, env = "BROKER_CONTAINER_STOP_TIMEOUT_SECS", default_value_t = 5)]
    pub container_stop_timeout_secs: i64,

    /// Flush window between the hello frame and replay, in milliseconds.
    #[arg(long, env = "BROKER_REPLAY_ACK_TIMEOUT_MS", default_value_t = 250)]
    pub replay_ack_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "BROKER_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "BROKER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Deployment environment, controls whether missing security profiles
/// fail startup or degrade with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EnvProfile {
    Development,
    Ci,
    Production,
}

impl EnvProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Ci => "ci",
            Self::Production => "production",
        }
    }
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_sessions == 0 {
            anyhow::bail!("--max-sessions must be positive");
        }
        if self.max_anonymous_sessions + self.max_authenticated_sessions < self.max_sessions {
            anyhow::bail!(
                "class caps ({} anonymous + {} authenticated) cannot cover --max-sessions {}",
                self.max_anonymous_sessions,
                self.max_authenticated_sessions,
                self.max_sessions
            );
        }
        if self.output_buffer_max_bytes < 4096 {
            anyhow::bail!("--output-buffer-max-bytes must be at least 4096");
        }
        if self.output_buffer_max_chunks == 0 {
            anyhow::bail!("--output-buffer-max-chunks must be positive");
        }
        if self.enable_connection_throttle && self.connection_throttle_window_ms == 0 {
            anyhow::bail!("--connection-throttle-window-ms must be positive when throttling");
        }
        if self.container_cpus <= 0.0 {
            anyhow::bail!("--container-cpus must be positive");
        }
        if self.env_profile == EnvProfile::Production && !self.require_hardened_security {
            tracing::warn!("production profile without --require-hardened-security");
        }
        Ok(())
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_millis(self.orphan_grace_ms)
    }

    /// `None` when idle reaping is disabled.
    pub fn max_idle(&self) -> Option<Duration> {
        (self.max_idle_ms > 0).then(|| Duration::from_millis(self.max_idle_ms))
    }

    pub fn connection_throttle_window(&self) -> Duration {
        Duration::from_millis(self.connection_throttle_window_ms)
    }

    pub fn auth_read_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_read_timeout_ms)
    }

    pub fn replay_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_ack_timeout_ms)
    }

    /// NanoCPUs value for the container runtime.
    pub fn container_nano_cpus(&self) -> i64 {
        (self.container_cpus * 1e9) as i64
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
