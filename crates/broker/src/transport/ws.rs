// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection session driver.
//!
//! One task per accepted transport: read the auth envelope under a deadline,
//! throttle, admit, provision or resume, then hand the socket to the pump
//! and translate its exit back into state-machine transitions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::container::DestroyReason;
use crate::credential::{self, AuthEnvelope, Admission, ClientFingerprint, SessionClass};
use crate::error::{CloseCode, ErrorCode};
use crate::pump::{self, PumpExit};
use crate::session::{reaper, transition, Session, SessionState};
use crate::state::BrokerState;

use super::ws_msg::{close_message, ServerFrame, StatusPayload};

/// Bound on container create + attach during provisioning.
const PROVISION_TIMEOUT: Duration = Duration::from_secs(30);

/// `GET /ws`: transport upgrade for a new or resumed session.
pub async fn ws_handler(
    State(state): State<Arc<BrokerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    ws.on_upgrade(move |socket| handle_connection(state, socket, peer, user_agent))
}

/// Per-connection task.
async fn handle_connection(
    state: Arc<BrokerState>,
    socket: WebSocket,
    peer: SocketAddr,
    user_agent: String,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // First message is the auth envelope, under a short deadline.
    let first = tokio::time::timeout(state.config.auth_read_timeout(), ws_rx.next()).await;
    let payload = match first {
        Ok(Some(Ok(Message::Text(text)))) => Bytes::copy_from_slice(text.as_bytes()),
        Ok(Some(Ok(Message::Binary(data)))) => data,
        Ok(_) => {
            debug!(%peer, "transport closed before auth");
            return;
        }
        Err(_) => {
            debug!(%peer, "auth deadline expired");
            reject(&mut ws_tx, ErrorCode::BadRequest, "auth timeout").await;
            return;
        }
    };

    // Per-IP connection throttle.
    if state.limiter.check_connection(peer.ip()).is_blocked() {
        warn!(ip = %peer.ip(), "connection throttled");
        reject(&mut ws_tx, ErrorCode::RateLimited, "").await;
        return;
    }

    let mut envelope: AuthEnvelope = match serde_json::from_slice(&payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%peer, %err, "malformed auth envelope");
            reject(&mut ws_tx, ErrorCode::InvalidCredentials, "").await;
            return;
        }
    };

    if tracing::enabled!(tracing::Level::DEBUG) {
        // Credential-shaped fields are scrubbed before the envelope is logged.
        if let Ok(raw) = serde_json::from_slice::<serde_json::Value>(&payload) {
            debug!(%peer, envelope = %crate::logging::redacted(&raw), "auth envelope");
        }
    }

    let admission = match credential::validate(&envelope) {
        Ok(admission) => admission,
        Err(err) => {
            debug!(%peer, ?err, "credential validation failed");
            envelope.wipe();
            reject(&mut ws_tx, ErrorCode::InvalidCredentials, "").await;
            return;
        }
    };

    // The hash is computed; the plaintext is done.
    let session_id = envelope.session_id.clone();
    let client_context = envelope.client_context.clone();
    envelope.wipe();

    let fingerprint = credential::client_fingerprint(peer.ip(), &user_agent);

    match session_id {
        Some(session_id) => {
            run_resume(&state, session_id, admission, fingerprint, &mut ws_tx, &mut ws_rx).await
        }
        None => {
            run_new_session(
                &state,
                admission,
                fingerprint,
                client_context,
                &mut ws_tx,
                &mut ws_rx,
            )
            .await
        }
    }
}

/// New-session branch: admit, provision, attach, pump.
async fn run_new_session(
    state: &Arc<BrokerState>,
    admission: Admission,
    fingerprint: ClientFingerprint,
    client_context: Option<credential::ClientContext>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) {
    if let Err(code) = state.registry.admit(admission.class) {
        reject(ws_tx, code, "").await;
        return;
    }

    let session = Arc::new(Session::new(
        admission.hash,
        admission.class,
        fingerprint,
        state.config.output_buffer_max_chunks,
        state.config.output_buffer_max_bytes,
    ));

    if transition::apply(&session, SessionState::Authenticated).is_err() {
        reject(ws_tx, ErrorCode::Internal, "").await;
        return;
    }
    if let Err(code) = state.registry.register(Arc::clone(&session)) {
        session.set_state(SessionState::Rejected);
        reject(ws_tx, code, "").await;
        return;
    }

    let _ = ws_tx.send(ServerFrame::status(StatusPayload::Connecting).to_message()).await;

    if transition::apply(&session, SessionState::Provisioning).is_err() {
        transition::fail(state, &session, "provisioning transition rejected").await;
        reject(ws_tx, ErrorCode::Internal, "").await;
        return;
    }

    let io = match provision(state, &session).await {
        Ok(io) => io,
        Err(err) => {
            warn!(session = %session.id, err = format!("{err:#}"), "provisioning failed");
            transition::fail(state, &session, "container create/attach failed").await;
            reject(ws_tx, ErrorCode::ContainerUnavailable, "").await;
            return;
        }
    };

    if transition::apply(&session, SessionState::Attached).is_err() {
        transition::fail(state, &session, "attach transition rejected").await;
        reject(ws_tx, ErrorCode::Internal, "").await;
        return;
    }

    info!(session = %session.id, class = session.class().as_str(), "session attached");

    // Initial terminal geometry from the connect envelope.
    if let Some(context) = client_context {
        if let (Some(cols), Some(rows)) = (context.cols, context.rows) {
            if let Some(container) = session.container_ref() {
                let _ = state.supervisor.resize(&container, cols, rows).await;
            }
        }
    }

    let events = state.supervisor.events();
    let exit = pump::run(state, &session, io, events, false, ws_tx, ws_rx).await;
    settle(state, &session, exit, ws_tx).await;
}

/// Resume branch: throttle, locate, authorise, re-attach, replay.
async fn run_resume(
    state: &Arc<BrokerState>,
    session_id: String,
    admission: Admission,
    fingerprint: ClientFingerprint,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) {
    // A resume without credentials can never match a stored hash; refuse it
    // before touching the registry.
    if admission.class == SessionClass::Anonymous {
        reject(ws_tx, ErrorCode::InvalidCredentials, "").await;
        return;
    }

    if state.limiter.check_resume(&session_id).is_blocked() {
        warn!(session = %session_id, "resume throttled");
        reject(ws_tx, ErrorCode::RateLimited, "").await;
        return;
    }

    let Some(session) = state.registry.get(&session_id) else {
        reject(ws_tx, ErrorCode::SessionNotFound, "").await;
        return;
    };

    match session.state() {
        SessionState::Orphaned => {}
        current if current.is_final() => {
            reject(ws_tx, ErrorCode::SessionNotFound, "").await;
            return;
        }
        _ => {
            // Still attached elsewhere (or mid-attach).
            reject(ws_tx, ErrorCode::ResumeDenied, "").await;
            return;
        }
    }

    if let Err(code) = transition::authorize_resume(&session, &admission.hash, fingerprint) {
        reject(ws_tx, code, "").await;
        return;
    }

    if !session.begin_attach() {
        reject(ws_tx, ErrorCode::ResumeDenied, "").await;
        return;
    }

    session.cancel_reaper();

    let container = match session.container_ref() {
        Some(container) => container,
        None => {
            session.end_attach();
            transition::fail(state, &session, "orphaned session has no container").await;
            reject(ws_tx, ErrorCode::SessionNotFound, "").await;
            return;
        }
    };

    let io = match tokio::time::timeout(PROVISION_TIMEOUT, state.supervisor.attach(&container))
        .await
    {
        Ok(Ok(io)) => io,
        Ok(Err(err)) => {
            warn!(session = %session.id, err = format!("{err:#}"), "re-attach failed");
            session.end_attach();
            transition::terminate(state, &session, DestroyReason::ProvisionFailed).await;
            reject(ws_tx, ErrorCode::ContainerUnavailable, "").await;
            return;
        }
        Err(_) => {
            session.end_attach();
            transition::terminate(state, &session, DestroyReason::ProvisionFailed).await;
            reject(ws_tx, ErrorCode::ContainerUnavailable, "").await;
            return;
        }
    };

    if transition::apply(&session, SessionState::Attached).is_err() {
        session.end_attach();
        transition::fail(state, &session, "resume transition rejected").await;
        reject(ws_tx, ErrorCode::Internal, "").await;
        return;
    }
    session.touch();
    session.end_attach();

    let resumes = session.resume_count.load(std::sync::atomic::Ordering::Relaxed);
    info!(session = %session.id, resumes, "session resumed");

    let events = state.supervisor.events();
    let exit = pump::run(state, &session, io, events, true, ws_tx, ws_rx).await;
    settle(state, &session, exit, ws_tx).await;
}

/// Create and attach the container, both bounded.
async fn provision(
    state: &Arc<BrokerState>,
    session: &Arc<Session>,
) -> anyhow::Result<crate::container::AttachedIo> {
    let container =
        tokio::time::timeout(PROVISION_TIMEOUT, state.supervisor.create(&session.id))
            .await
            .map_err(|_| anyhow::anyhow!("container create timed out"))??;
    *session.container.lock() = Some(container.clone());

    let io = tokio::time::timeout(PROVISION_TIMEOUT, state.supervisor.attach(&container))
        .await
        .map_err(|_| anyhow::anyhow!("container attach timed out"))??;
    Ok(io)
}

/// Translate a pump exit into the session's next state and the close frame.
async fn settle(
    state: &Arc<BrokerState>,
    session: &Arc<Session>,
    exit: PumpExit,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) {
    match exit {
        PumpExit::ClientClosed => match session.class() {
            SessionClass::Authenticated => {
                if transition::apply(session, SessionState::Orphaned).is_ok() {
                    reaper::spawn(Arc::clone(state), Arc::clone(session));
                    info!(session = %session.id, "session orphaned");
                } else {
                    transition::terminate(state, session, DestroyReason::ClientDisconnect).await;
                }
            }
            SessionClass::Anonymous => {
                transition::terminate(state, session, DestroyReason::ClientDisconnect).await;
            }
        },
        PumpExit::ContainerExited => {
            // The pump already sent the `disconnected` status; the close code
            // tells the client not to reconnect.
            transition::terminate(state, session, DestroyReason::UserExit).await;
            let _ = ws_tx.send(close_message(CloseCode::UserExit, pump::USER_EXIT_REASON)).await;
        }
        PumpExit::IdleTimeout => {
            let _ = ws_tx
                .send(ServerFrame::disconnected("Session idle timeout").to_message())
                .await;
            transition::terminate(state, session, DestroyReason::IdleTimeout).await;
            let _ = ws_tx.send(close_message(CloseCode::Policy, "idle timeout")).await;
        }
        PumpExit::Shutdown => {
            let _ = ws_tx
                .send(ServerFrame::disconnected("Broker shutting down").to_message())
                .await;
            transition::terminate(state, session, DestroyReason::Shutdown).await;
            let _ = ws_tx.send(close_message(CloseCode::Normal, "shutdown")).await;
        }
    }
}

/// Send an error status frame and close with the matching code.
async fn reject(ws_tx: &mut SplitSink<WebSocket, Message>, code: ErrorCode, detail: &str) {
    let _ = ws_tx.send(ServerFrame::error(code).to_message()).await;
    let reason =
        if detail.is_empty() { code.client_reason().to_owned() } else { detail.to_owned() };
    let _ = ws_tx.send(close_message(code.close_code(), &reason)).await;
}
