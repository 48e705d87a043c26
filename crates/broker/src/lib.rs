// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Termbroker: WebSocket session broker for hardened CLI sandboxes.

pub mod config;
pub mod container;
pub mod credential;
pub mod error;
pub mod logging;
pub mod pump;
pub mod ratelimit;
pub mod registry;
pub mod replay;
pub mod security;
pub mod session;
pub mod state;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::container::docker::DockerSupervisor;
use crate::container::{DestroyReason, Supervisor};
use crate::state::BrokerState;

/// Run the broker until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let docker = container::docker::client(&config)?;
    let security = security::init(&config, &docker).await?;

    let supervisor = Arc::new(DockerSupervisor::new(docker, &config, &security).await?);
    supervisor.spawn_event_stream(shutdown.clone());

    let state = Arc::new(BrokerState::new(
        config.clone(),
        Arc::clone(&supervisor) as Arc<dyn Supervisor>,
        security,
        shutdown.clone(),
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        profile = config.env_profile.as_str(),
        degraded = state.security.degraded,
        "termbroker listening"
    );

    serve(Arc::clone(&state), listener).await
}

/// Serve an already-bound listener with the given state. Split from [`run`]
/// so tests can drive a broker with a scripted supervisor on an ephemeral
/// port.
pub async fn serve(state: Arc<BrokerState>, listener: TcpListener) -> anyhow::Result<()> {
    state.limiter.spawn_sweeper(state.shutdown.clone());
    let router = transport::build_router(Arc::clone(&state));
    let shutdown = state.shutdown.clone();

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // Reap everything still registered; destroy is idempotent.
    for session in state.registry.drain() {
        session::transition::terminate(&state, &session, DestroyReason::Shutdown).await;
    }
    info!("termbroker stopped");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("ctrl-c handler unavailable");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
}
