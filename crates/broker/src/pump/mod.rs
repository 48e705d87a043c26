// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pump: the single place where bytes cross between the transport and
//! the container.
//!
//! Outbound chunks pass through the attach-handshake swallow (TTY mode) or
//! the frame demultiplexer (exec mode), land in the session's replay buffer,
//! and go out as binary messages. Inbound messages are classified as control
//! frames or raw keystrokes. Frame ordering on resume is fixed: `connected`,
//! `hello`, replayed buffer, live bytes.
//!
//! Detach-for-resume never runs through the pump: when a client vanishes the
//! pump returns [`PumpExit::ClientClosed`] and the supervisor's bridge token
//! detaches the container stream silently, so a later re-attach is not
//! mistaken for a container exit.

pub mod control;
pub mod frame;
pub mod handshake;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::container::{AttachedIo, ContainerEvent, StreamMode};
use crate::ratelimit::within_cap;
use crate::session::Session;
use crate::state::BrokerState;
use crate::transport::ws_msg::{ServerFrame, StatusPayload};

/// Short wait after the `disconnected` status so the client reads it before
/// the transport closes.
const FLUSH_WINDOW: Duration = Duration::from_millis(100);

/// Reason string sent when the container stream ends.
pub const USER_EXIT_REASON: &str = "Session ended by user";

/// Why the pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Transport closed or errored; orphanable for authenticated sessions.
    ClientClosed,
    /// Container stream ended; the `disconnected` status has been sent.
    ContainerExited,
    /// No inbound activity for the configured idle window.
    IdleTimeout,
    /// Broker shutdown.
    Shutdown,
}

/// Outbound decode stage, fixed per attach.
enum Decoder {
    Tty(handshake::HandshakeSwallow),
    Framed(frame::FrameDecoder),
}

impl Decoder {
    fn new(mode: StreamMode) -> Self {
        match mode {
            StreamMode::RawTty => Self::Tty(handshake::HandshakeSwallow::new()),
            StreamMode::Framed => Self::Framed(frame::FrameDecoder::new()),
        }
    }

    /// Decode one container chunk into forwardable payloads. `None` means
    /// the stream is corrupt and the session must end.
    fn decode(&mut self, chunk: Bytes) -> Option<Vec<Bytes>> {
        match self {
            Self::Tty(swallow) => {
                let out = swallow.feed(chunk);
                Some(if out.is_empty() { Vec::new() } else { vec![out] })
            }
            Self::Framed(decoder) => match decoder.feed(&chunk) {
                Ok(payloads) => Some(payloads),
                Err(err) => {
                    warn!(%err, "framed stream corrupt");
                    None
                }
            },
        }
    }

    fn flush(&mut self) -> Option<Bytes> {
        match self {
            Self::Tty(swallow) => {
                let held = swallow.flush();
                (!held.is_empty()).then_some(held)
            }
            Self::Framed(_) => None,
        }
    }
}

/// Drive one attached session until either side goes away.
///
/// Emits `connected` and `hello` before anything else; with `replay` set the
/// buffered output follows after a short acknowledgement window, then live
/// bytes.
pub async fn run(
    state: &Arc<BrokerState>,
    session: &Arc<Session>,
    mut io: AttachedIo,
    mut events: broadcast::Receiver<ContainerEvent>,
    replay: bool,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> PumpExit {
    let mut decoder = Decoder::new(io.mode);

    if send(ws_tx, ServerFrame::status(StatusPayload::Connected)).await.is_err() {
        return PumpExit::ClientClosed;
    }
    if send(ws_tx, ServerFrame::hello(&session.id)).await.is_err() {
        return PumpExit::ClientClosed;
    }

    if replay {
        // Brief acknowledgement window so a slow client terminal is mounted
        // before history arrives.
        tokio::time::sleep(state.config.replay_ack_timeout()).await;
        let chunks = { session.replay.lock().snapshot() };
        for chunk in chunks {
            if ws_tx.send(Message::Binary(chunk)).await.is_err() {
                return PumpExit::ClientClosed;
            }
        }
    }

    let container_id = session.container_ref().map(|c| c.id).unwrap_or_default();

    loop {
        let idle = idle_deadline(state, session);

        tokio::select! {
            _ = state.shutdown.cancelled() => return PumpExit::Shutdown,

            _ = idle => {
                debug!(session = %session.id, "idle timeout");
                return PumpExit::IdleTimeout;
            }

            chunk = io.output.recv() => match chunk {
                Some(chunk) => {
                    let Some(payloads) = decoder.decode(chunk) else {
                        return container_exited(session, &mut decoder, ws_tx).await;
                    };
                    for payload in payloads {
                        { session.replay.lock().push(payload.clone()); }
                        if ws_tx.send(Message::Binary(payload)).await.is_err() {
                            return PumpExit::ClientClosed;
                        }
                    }
                }
                None => return container_exited(session, &mut decoder, ws_tx).await,
            },

            event = events.recv() => {
                if let Ok(ContainerEvent::Exited { container_id: exited, .. }) = event {
                    if exited == container_id {
                        drain_output(session, &mut decoder, &mut io, ws_tx).await;
                        return container_exited(session, &mut decoder, ws_tx).await;
                    }
                }
            }

            msg = ws_rx.next() => {
                let data = match msg {
                    Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_bytes()),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => return PumpExit::ClientClosed,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => return PumpExit::ClientClosed,
                };

                session.touch();
                if !within_cap(0, data.len(), state.config.output_buffer_max_bytes) {
                    warn!(session = %session.id, len = data.len(), "oversized inbound message dropped");
                    continue;
                }

                match control::classify(data) {
                    control::Inbound::Raw(bytes) | control::Inbound::Data(bytes) => {
                        if io.input.send(bytes).await.is_err() {
                            drain_output(session, &mut decoder, &mut io, ws_tx).await;
                            return container_exited(session, &mut decoder, ws_tx).await;
                        }
                    }
                    control::Inbound::Resize { cols, rows } => {
                        if let Some(container) = session.container_ref() {
                            if let Err(err) =
                                state.supervisor.resize(&container, cols, rows).await
                            {
                                debug!(session = %session.id, %err, "resize failed");
                            }
                        }
                    }
                    control::Inbound::Ping => {
                        if send(ws_tx, ServerFrame::Pong).await.is_err() {
                            return PumpExit::ClientClosed;
                        }
                    }
                }
            }
        }
    }
}

/// Sleep until the idle deadline, or forever when idle reaping is disabled.
async fn idle_deadline(state: &Arc<BrokerState>, session: &Arc<Session>) {
    match state.config.max_idle() {
        Some(max_idle) => {
            let remaining = max_idle.saturating_sub(session.idle_for());
            tokio::time::sleep(remaining).await;
        }
        None => std::future::pending().await,
    }
}

/// Forward whatever the container managed to write before exiting.
async fn drain_output(
    session: &Arc<Session>,
    decoder: &mut Decoder,
    io: &mut AttachedIo,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) {
    while let Ok(chunk) = io.output.try_recv() {
        let Some(payloads) = decoder.decode(chunk) else { return };
        for payload in payloads {
            { session.replay.lock().push(payload.clone()); }
            if ws_tx.send(Message::Binary(payload)).await.is_err() {
                return;
            }
        }
    }
}

/// Container stream ended: release held bytes, tell the client, give it a
/// moment to render, and report the exit.
async fn container_exited(
    session: &Arc<Session>,
    decoder: &mut Decoder,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> PumpExit {
    if let Some(held) = decoder.flush() {
        { session.replay.lock().push(held.clone()); }
        let _ = ws_tx.send(Message::Binary(held)).await;
    }
    let _ = send(ws_tx, ServerFrame::disconnected(USER_EXIT_REASON)).await;
    tokio::time::sleep(FLUSH_WINDOW).await;
    PumpExit::ContainerExited
}

async fn send(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: ServerFrame,
) -> Result<(), ()> {
    ws_tx.send(frame.to_message()).await.map_err(|_| ())
}
