// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end broker specs.
//!
//! Runs a real broker (listener, registry, pump) in-process against a
//! scripted [`EchoSupervisor`] instead of Docker: every "container" is a
//! task that prints a prompt, echoes input, and exits on `exit\r`.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use termbroker::config::Config;
use termbroker::container::{
    AttachedIo, ContainerEvent, ContainerRef, DestroyReason, StreamMode, Supervisor,
};
use termbroker::security::SecurityStatus;
use termbroker::state::BrokerState;

/// Attach handshake the runtime injects at the head of a TTY stream.
pub const HANDSHAKE: &str =
    r#"{"stream":true,"stdin":true,"stdout":true,"stderr":true,"hijack":true}"#;

pub const PROMPT: &str = "$ ";

/// Scripted sandbox runtime: deterministic echo containers, no Docker.
pub struct EchoSupervisor {
    containers: Arc<Mutex<HashMap<String, EchoContainer>>>,
    destroyed: Mutex<Vec<(String, DestroyReason)>>,
    resizes: Mutex<Vec<(String, u16, u16)>>,
    events_tx: broadcast::Sender<ContainerEvent>,
    next_id: AtomicU64,
}

#[derive(Clone)]
struct EchoContainer {
    running: bool,
}

impl Default for EchoSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoSupervisor {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            destroyed: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            events_tx,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn destroyed(&self) -> Vec<(String, DestroyReason)> {
        self.destroyed.lock().clone()
    }

    pub fn resizes(&self) -> Vec<(String, u16, u16)> {
        self.resizes.lock().clone()
    }

    pub fn running_count(&self) -> usize {
        self.containers.lock().values().filter(|c| c.running).count()
    }
}

impl Supervisor for EchoSupervisor {
    fn create<'a>(
        &'a self,
        _session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ContainerRef>> + Send + 'a>> {
        Box::pin(async move {
            let id = format!("echo-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            self.containers.lock().insert(id.clone(), EchoContainer { running: true });
            Ok(ContainerRef { id })
        })
    }

    fn attach<'a>(
        &'a self,
        container: &'a ContainerRef,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AttachedIo>> + Send + 'a>> {
        Box::pin(async move {
            {
                let containers = self.containers.lock();
                let entry = containers
                    .get(&container.id)
                    .ok_or_else(|| anyhow::anyhow!("no such container"))?;
                if !entry.running {
                    anyhow::bail!("container not running");
                }
            }

            let (out_tx, out_rx) = mpsc::channel::<Bytes>(64);
            let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(64);

            let container_id = container.id.clone();
            let events_tx = self.events_tx.clone();
            let containers = Arc::clone(&self.containers);
            tokio::spawn(async move {
                // The runtime injects its handshake at the head of every
                // hijacked stream, then the shell prompt appears.
                let head = format!("{HANDSHAKE}{PROMPT}");
                if out_tx.send(Bytes::from(head)).await.is_err() {
                    return;
                }

                while let Some(input) = in_rx.recv().await {
                    if input.as_ref() == b"exit\r" {
                        let _ = out_tx.send(Bytes::from_static(b"exit\r\n")).await;
                        if let Some(c) = containers.lock().get_mut(&container_id) {
                            c.running = false;
                        }
                        let _ = events_tx.send(ContainerEvent::Exited {
                            container_id: container_id.clone(),
                            exit_code: Some(0),
                        });
                        return;
                    }
                    let mut echoed = Vec::with_capacity(input.len() + 4);
                    for &byte in input.iter() {
                        if byte == b'\r' {
                            echoed.extend_from_slice(b"\r\n");
                            echoed.extend_from_slice(PROMPT.as_bytes());
                        } else {
                            echoed.push(byte);
                        }
                    }
                    if out_tx.send(Bytes::from(echoed)).await.is_err() {
                        return;
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
            self.resizes.lock().push((container.id.clone(), cols, rows));
            Ok(())
        })
    }

    fn destroy<'a>(
        &'a self,
        container: &'a ContainerRef,
        reason: DestroyReason,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let removed = self.containers.lock().remove(&container.id);
            if removed.is_some() {
                self.destroyed.lock().push((container.id.clone(), reason));
            }
            Ok(())
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
            self.containers.lock().get(&container.id).map(|c| c.running).unwrap_or(false)
        })
    }
}

/// An in-process broker bound to an ephemeral port.
pub struct TestBroker {
    pub addr: SocketAddr,
    pub state: Arc<BrokerState>,
    pub supervisor: Arc<EchoSupervisor>,
    shutdown: CancellationToken,
}

impl TestBroker {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(&[]).await
    }

    /// Start with extra config flags on top of the fast test defaults.
    pub async fn start_with(extra_args: &[&str]) -> anyhow::Result<Self> {
        let mut args = vec![
            "termbroker",
            "--host",
            "127.0.0.1",
            "--replay-ack-timeout-ms",
            "10",
            "--auth-read-timeout-ms",
            "2000",
        ];
        args.extend_from_slice(extra_args);
        let config = Config::parse_from(args);

        let supervisor = Arc::new(EchoSupervisor::new());
        let shutdown = CancellationToken::new();
        let state = Arc::new(BrokerState::new(
            config,
            Arc::clone(&supervisor) as Arc<dyn Supervisor>,
            SecurityStatus::unverified("bridge"),
            shutdown.clone(),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let serve_state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(err) = termbroker::serve(serve_state, listener).await {
                tracing::error!(%err, "test broker exited");
            }
        });

        Ok(Self { addr, state, supervisor, shutdown })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn connect(&self) -> anyhow::Result<Client> {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url()).await?;
        Ok(Client { ws })
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Thin WebSocket client for the session protocol.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

impl Client {
    pub async fn send_json(&mut self, value: serde_json::Value) -> anyhow::Result<()> {
        self.ws.send(Message::Text(value.to_string().into())).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    /// Next message of any kind.
    pub async fn next_message(&mut self) -> anyhow::Result<Message> {
        let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for message"))?
            .ok_or_else(|| anyhow::anyhow!("transport closed"))??;
        Ok(msg)
    }

    /// Next JSON frame, skipping binary output.
    pub async fn next_json(&mut self) -> anyhow::Result<serde_json::Value> {
        loop {
            match self.next_message().await? {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Binary(_) => continue,
                Message::Close(frame) => {
                    anyhow::bail!("closed while waiting for json: {frame:?}")
                }
                _ => continue,
            }
        }
    }

    /// Accumulate binary output until `needle` has been seen, returning
    /// everything collected.
    pub async fn read_output_until(&mut self, needle: &str) -> anyhow::Result<String> {
        let mut collected = String::new();
        loop {
            match self.next_message().await? {
                Message::Binary(data) => {
                    collected.push_str(&String::from_utf8_lossy(&data));
                    if collected.contains(needle) {
                        return Ok(collected);
                    }
                }
                Message::Text(_) => continue,
                Message::Close(frame) => anyhow::bail!(
                    "closed while waiting for {needle:?}; got {collected:?} ({frame:?})"
                ),
                _ => continue,
            }
        }
    }

    /// Expect `{type:"status"}` with the given payload.
    pub async fn expect_status(&mut self, payload: &str) -> anyhow::Result<serde_json::Value> {
        let frame = self.next_json().await?;
        anyhow::ensure!(frame["type"] == "status", "expected status, got {frame}");
        anyhow::ensure!(
            frame["payload"] == payload,
            "expected status {payload}, got {frame}"
        );
        Ok(frame)
    }

    /// Expect the hello frame; returns the session id.
    pub async fn expect_hello(&mut self) -> anyhow::Result<String> {
        let frame = self.next_json().await?;
        anyhow::ensure!(frame["type"] == "hello", "expected hello, got {frame}");
        frame["sessionId"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("hello without sessionId"))
    }

    /// Wait for the close frame, returning its code.
    pub async fn expect_close(&mut self) -> anyhow::Result<u16> {
        loop {
            match self.next_message().await {
                Ok(Message::Close(Some(frame))) => return Ok(frame.code.into()),
                Ok(Message::Close(None)) => anyhow::bail!("close without code"),
                Ok(_) => continue,
                // Server already tore the connection down.
                Err(_) => anyhow::bail!("transport dropped before close frame"),
            }
        }
    }

    /// Sever the TCP connection without a close handshake.
    pub fn abort(self) {
        drop(self.ws);
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_for(
    what: &str,
    mut predicate: impl FnMut() -> bool,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("timed out waiting for {what}")
}
