// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox container supervision.
//!
//! The broker talks to the runtime through the object-safe [`Supervisor`]
//! trait; [`docker::DockerSupervisor`] is the production implementation.
//! Attach I/O is channel-based so the pump never depends on the runtime.

pub mod docker;
pub mod hardening;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

/// Handle to a provisioned container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
}

/// How the attached output stream is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// TTY attach: raw bytes, possibly prefixed by the runtime's attach
    /// handshake JSON.
    RawTty,
    /// Exec-style attach without a TTY: stdout/stderr multiplexed with
    /// 8-byte frame headers.
    Framed,
}

/// Channel ends of one attach.
///
/// Dropping `input` detaches cleanly; the supervisor closes `output` when the
/// container stream ends.
pub struct AttachedIo {
    pub output: mpsc::Receiver<Bytes>,
    pub input: mpsc::Sender<Bytes>,
    pub mode: StreamMode,
}

/// Why a container is being destroyed (propagated into labels/logs only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    ClientDisconnect,
    OrphanExpired,
    IdleTimeout,
    UserExit,
    Shutdown,
    ProvisionFailed,
}

impl DestroyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientDisconnect => "client_disconnect",
            Self::OrphanExpired => "orphan_expired",
            Self::IdleTimeout => "idle_timeout",
            Self::UserExit => "user_exit",
            Self::Shutdown => "shutdown",
            Self::ProvisionFailed => "provision_failed",
        }
    }
}

/// Container-level event served to session tasks.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    Exited { container_id: String, exit_code: Option<i64> },
}

/// Runtime abstraction for the sandbox lifecycle.
///
/// Object-safe for use as `Arc<dyn Supervisor>`; methods return boxed
/// futures. All operations are idempotent at this layer: destroying a
/// destroyed container is a no-op.
pub trait Supervisor: Send + Sync + 'static {
    /// Create and start a hardened container for `session_id`.
    fn create<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ContainerRef>> + Send + 'a>>;

    /// Attach to the container's TTY. Successive attaches are supported;
    /// any previous attach is detached first.
    fn attach<'a>(
        &'a self,
        container: &'a ContainerRef,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AttachedIo>> + Send + 'a>>;

    fn resize<'a>(
        &'a self,
        container: &'a ContainerRef,
        cols: u16,
        rows: u16,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    fn destroy<'a>(
        &'a self,
        container: &'a ContainerRef,
        reason: DestroyReason,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    /// Subscribe to container exit events.
    fn events(&self) -> broadcast::Receiver<ContainerEvent>;

    /// True when the container is currently running (registry invariant
    /// checks and tests).
    fn is_running<'a>(
        &'a self,
        container: &'a ContainerRef,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Conversion so concrete supervisors and `Arc<dyn Supervisor>` both flow
/// into broker construction without explicit casting.
pub trait Shared {
    fn shared(self) -> Arc<dyn Supervisor>;
}

impl<T: Supervisor> Shared for T {
    fn shared(self) -> Arc<dyn Supervisor> {
        Arc::new(self)
    }
}

impl Shared for Arc<dyn Supervisor> {
    fn shared(self) -> Arc<dyn Supervisor> {
        self
    }
}
