// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker-backed [`Supervisor`].
//!
//! One `bollard::Docker` client is shared by all sessions; bollard handles
//! concurrent use. Attach streams are bridged onto mpsc channels so the pump
//! stays runtime-agnostic, and a per-container cancellation token lets a
//! re-attach detach the previous bridge without the old stream's end being
//! mistaken for a container exit.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use bollard::container::{
    AttachContainerOptions, Config as ContainerConfig, CreateContainerOptions,
    RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::system::EventsOptions;
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::security::SecurityStatus;

use super::{
    hardening, AttachedIo, ContainerEvent, ContainerRef, DestroyReason, StreamMode, Supervisor,
};

/// Channel depth for attach bridges; backpressure beyond this blocks the
/// bridge task, not the Docker socket reader.
const ATTACH_CHANNEL_DEPTH: usize = 64;

const EVENT_CHANNEL_DEPTH: usize = 256;

pub struct DockerSupervisor {
    docker: Docker,
    config: Config,
    security: SecurityStatus,
    events_tx: broadcast::Sender<ContainerEvent>,
    /// Cancellation token of the live attach bridge per container id.
    attaches: Mutex<HashMap<String, CancellationToken>>,
}

/// Build the runtime client from config (platform default socket unless
/// overridden).
pub fn client(config: &Config) -> anyhow::Result<Docker> {
    match &config.docker_socket {
        Some(socket) => Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
            .context("connect to configured docker socket"),
        None => Docker::connect_with_local_defaults().context("connect to docker"),
    }
}

impl DockerSupervisor {
    /// Wrap an established client, verifying the runtime responds.
    pub async fn new(
        docker: Docker,
        config: &Config,
        security: &SecurityStatus,
    ) -> anyhow::Result<Self> {
        docker.ping().await.context("container runtime unreachable")?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        Ok(Self {
            docker,
            config: config.clone(),
            security: security.clone(),
            events_tx,
            attaches: Mutex::new(HashMap::new()),
        })
    }

    /// Stream container `die` events for managed containers into the
    /// broadcast channel until shutdown.
    pub fn spawn_event_stream(self: &Arc<Self>, shutdown: CancellationToken) {
        let docker = self.docker.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut filters = HashMap::new();
            filters.insert("type".to_owned(), vec!["container".to_owned()]);
            filters.insert("event".to_owned(), vec!["die".to_owned()]);
            filters.insert(
                "label".to_owned(),
                vec![format!("{}=true", hardening::MANAGED_LABEL)],
            );
            let mut stream =
                docker.events(Some(EventsOptions::<String> { filters, ..Default::default() }));

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(message)) => {
                            let Some(actor) = message.actor else { continue };
                            let Some(container_id) = actor.id else { continue };
                            let exit_code = actor
                                .attributes
                                .unwrap_or_default()
                                .get("exitCode")
                                .and_then(|code| code.parse::<i64>().ok());
                            debug!(container = %container_id, ?exit_code, "container exited");
                            let _ = events_tx
                                .send(ContainerEvent::Exited { container_id, exit_code });
                        }
                        Some(Err(err)) => {
                            warn!(%err, "container event stream error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        });
    }

    /// Detach the live bridge for a container, if any. The bridge tasks exit
    /// on cancellation without closing observable state, so the caller can
    /// attach again immediately.
    fn detach_bridge(&self, container_id: &str) {
        if let Some(token) = self.attaches.lock().remove(container_id) {
            token.cancel();
        }
    }
}

impl Supervisor for DockerSupervisor {
    fn create<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ContainerRef>> + Send + 'a>> {
        Box::pin(async move {
            let name = format!("termbroker-{session_id}");
            let body = ContainerConfig {
                image: Some(self.config.container_image.clone()),
                user: Some(self.config.container_user.clone()),
                working_dir: Some(self.config.container_workdir.clone()),
                tty: Some(true),
                open_stdin: Some(true),
                attach_stdin: Some(true),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                env: Some(vec!["TERM=xterm-256color".to_owned()]),
                labels: Some(hardening::labels(session_id)),
                host_config: Some(hardening::host_config(&self.config, &self.security)),
                ..Default::default()
            };

            let created = self
                .docker
                .create_container(
                    Some(CreateContainerOptions { name: name.clone(), ..Default::default() }),
                    body,
                )
                .await
                .context("create sandbox container")?;
            self.docker
                .start_container(&created.id, None::<StartContainerOptions<String>>)
                .await
                .context("start sandbox container")?;

            info!(session = session_id, container = %created.id, "sandbox provisioned");
            Ok(ContainerRef { id: created.id })
        })
    }

    fn attach<'a>(
        &'a self,
        container: &'a ContainerRef,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AttachedIo>> + Send + 'a>> {
        Box::pin(async move {
            self.detach_bridge(&container.id);
            let token = CancellationToken::new();
            self.attaches.lock().insert(container.id.clone(), token.clone());

            let options = AttachContainerOptions::<String> {
                stdin: Some(true),
                stdout: Some(true),
                stderr: Some(true),
                stream: Some(true),
                logs: Some(false),
                ..Default::default()
            };
            let results = self
                .docker
                .attach_container(&container.id, Some(options))
                .await
                .context("attach sandbox container")?;
            let mut output = results.output;
            let mut input = results.input;

            let (out_tx, out_rx) = mpsc::channel(ATTACH_CHANNEL_DEPTH);
            let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(ATTACH_CHANNEL_DEPTH);

            // Container -> pump. Closing out_tx signals stream end; on
            // detach-for-resume the token fires first and the drop is silent.
            let out_token = token.clone();
            let out_container = container.id.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = out_token.cancelled() => break,
                        chunk = output.next() => match chunk {
                            Some(Ok(log)) => {
                                if out_tx.send(log.into_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                debug!(container = %out_container, %err, "attach read error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            });

            // Pump -> container stdin.
            let in_token = token.clone();
            let in_container = container.id.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = in_token.cancelled() => break,
                        msg = in_rx.recv() => match msg {
                            Some(bytes) => {
                                if let Err(err) = input.write_all(&bytes).await {
                                    debug!(container = %in_container, %err, "attach write error");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            });

            Ok(AttachedIo { output: out_rx, input: in_tx, mode: StreamMode::RawTty })
        })
    }

    fn resize<'a>(
        &'a self,
        container: &'a ContainerRef,
        cols: u16,
        rows: u16,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.docker
                .resize_container_tty(
                    &container.id,
                    ResizeContainerTtyOptions { width: cols, height: rows },
                )
                .await
                .context("resize sandbox tty")?;
            Ok(())
        })
    }

    fn destroy<'a>(
        &'a self,
        container: &'a ContainerRef,
        reason: DestroyReason,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.detach_bridge(&container.id);

            let stop = self
                .docker
                .stop_container(
                    &container.id,
                    Some(StopContainerOptions { t: self.config.container_stop_timeout_secs }),
                )
                .await;
            if let Err(err) = stop {
                if !is_gone(&err) {
                    debug!(container = %container.id, %err, "graceful stop failed, forcing");
                }
            }

            let removed = self
                .docker
                .remove_container(
                    &container.id,
                    Some(RemoveContainerOptions { force: true, v: true, ..Default::default() }),
                )
                .await;
            match removed {
                Ok(()) => {
                    info!(container = %container.id, reason = reason.as_str(), "sandbox destroyed");
                    Ok(())
                }
                Err(err) if is_gone(&err) => Ok(()),
                Err(err) => Err(err).context("remove sandbox container"),
            }
        })
    }

    fn events(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events_tx.subscribe()
    }

    fn is_running<'a>(
        &'a self,
        container: &'a ContainerRef,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match self.docker.inspect_container(&container.id, None).await {
                Ok(inspect) => inspect
                    .state
                    .and_then(|state| state.running)
                    .unwrap_or(false),
                Err(_) => false,
            }
        })
    }
}

/// 404/409 from the runtime mean the container is already gone or already
/// stopping; destroy treats both as success (idempotence).
fn is_gone(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404 | 409, .. }
    )
}

