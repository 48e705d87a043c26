// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: an in-process broker with scripted sandboxes,
//! exercised over a real WebSocket transport.

use serde_json::json;

use termbroker::container::{ContainerRef, DestroyReason, Supervisor};
use termbroker_specs::{wait_for, TestBroker, PROMPT};

#[tokio::test]
async fn healthz_reports_counts_and_security() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/healthz", broker.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert_eq!(resp["sessions"]["total"], 0);
    assert_eq!(resp["security"]["initialized"], true);
    assert_eq!(resp["security"]["degraded"], true);
    Ok(())
}

#[tokio::test]
async fn anonymous_session_echo_roundtrip() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let mut client = broker.connect().await?;

    client.send_json(json!({})).await?;
    client.expect_status("connected").await?;
    let session_id = client.expect_hello().await?;
    assert!(!session_id.is_empty());

    // The attach handshake never reaches the client.
    let prompt = client.read_output_until(PROMPT).await?;
    assert!(!prompt.contains("hijack"), "handshake leaked: {prompt:?}");

    client.send_text("a\r").await?;
    let echoed = client.read_output_until("a\r\n").await?;
    assert!(echoed.contains("a\r\n"), "echo missing: {echoed:?}");

    client.close().await?;

    // Anonymous disconnect is terminal: container destroyed, slot released.
    wait_for("container destroyed", || !broker.supervisor.destroyed().is_empty()).await?;
    let destroyed = broker.supervisor.destroyed();
    assert_eq!(destroyed[0].1, DestroyReason::ClientDisconnect);
    wait_for("registry empty", || broker.state.registry.metrics().total == 0).await?;
    Ok(())
}

#[tokio::test]
async fn data_and_resize_controls_dispatched() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let mut client = broker.connect().await?;

    client.send_json(json!({"clientContext": {"cols": 120, "rows": 40}})).await?;
    client.expect_status("connected").await?;
    client.expect_hello().await?;
    client.read_output_until(PROMPT).await?;

    // Initial geometry from the connect envelope.
    wait_for("initial resize", || !broker.supervisor.resizes().is_empty()).await?;
    assert_eq!(broker.supervisor.resizes()[0].1, 120);

    client.send_json(json!({"type": "resize", "cols": 81, "rows": 25})).await?;
    wait_for("resize dispatched", || {
        broker.supervisor.resizes().iter().any(|&(_, c, r)| c == 81 && r == 25)
    })
    .await?;

    client.send_json(json!({"type": "data", "data": "pwd\r"})).await?;
    let echoed = client.read_output_until("pwd\r\n").await?;
    assert!(echoed.contains("pwd\r\n"));

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn container_exit_is_user_exit() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let mut client = broker.connect().await?;

    client.send_json(json!({})).await?;
    client.expect_status("connected").await?;
    client.expect_hello().await?;
    client.read_output_until(PROMPT).await?;

    client.send_text("exit\r").await?;

    let status = client.expect_status("disconnected").await?;
    assert_eq!(status["reason"], "Session ended by user");
    let code = client.expect_close().await?;
    assert_eq!(code, 4000, "user-exit close code");

    wait_for("session terminal", || broker.state.registry.metrics().total == 0).await?;
    wait_for("container destroyed", || !broker.supervisor.destroyed().is_empty()).await?;

    // Destroying an already-destroyed sandbox is a no-op.
    let destroyed = broker.supervisor.destroyed();
    let container = ContainerRef { id: destroyed[0].0.clone() };
    broker.supervisor.destroy(&container, DestroyReason::Shutdown).await?;
    assert_eq!(broker.supervisor.destroyed().len(), destroyed.len());
    Ok(())
}

#[tokio::test]
async fn anonymous_cap_rejects_with_policy_close() -> anyhow::Result<()> {
    let broker = TestBroker::start_with(&["--max-anonymous-sessions", "1"]).await?;

    let mut first = broker.connect().await?;
    first.send_json(json!({})).await?;
    first.expect_status("connected").await?;
    first.expect_hello().await?;

    let mut second = broker.connect().await?;
    second.send_json(json!({})).await?;
    let frame = second.expect_status("error").await?;
    assert_eq!(frame["reason"], "ADMISSION_DENIED");
    assert_eq!(second.expect_close().await?, 4001);

    // The authenticated class still has headroom.
    let mut authed = broker.connect().await?;
    authed.send_json(json!({"apiKey": "K"})).await?;
    authed.expect_status("connected").await?;

    Ok(())
}

#[tokio::test]
async fn expired_token_rejected() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let mut client = broker.connect().await?;

    // exp far in the past; claims segment is valid base64url JSON.
    let claims = "eyJleHAiOjEwMDAwMDB9";
    client
        .send_json(json!({"accessToken": format!("aGVhZGVy.{claims}.c2ln")}))
        .await?;
    let frame = client.expect_status("error").await?;
    assert_eq!(frame["reason"], "INVALID_CREDENTIALS");
    assert_eq!(client.expect_close().await?, 4002);
    Ok(())
}

#[tokio::test]
async fn auth_deadline_enforced() -> anyhow::Result<()> {
    let broker = TestBroker::start_with(&["--auth-read-timeout-ms", "100"]).await?;
    let mut client = broker.connect().await?;

    // Say nothing; the broker gives up first.
    let frame = client.expect_status("error").await?;
    assert_eq!(frame["reason"], "BAD_REQUEST");
    client.expect_close().await?;
    Ok(())
}

#[tokio::test]
async fn ip_throttle_blocks_excess_connections() -> anyhow::Result<()> {
    let broker =
        TestBroker::start_with(&["--max-connections-per-ip-per-minute", "2"]).await?;

    for _ in 0..2 {
        let mut client = broker.connect().await?;
        client.send_json(json!({})).await?;
        client.expect_status("connected").await?;
        client.expect_hello().await?;
        client.close().await?;
    }

    let mut third = broker.connect().await?;
    third.send_json(json!({})).await?;
    let frame = third.expect_status("error").await?;
    assert_eq!(frame["reason"], "RATE_LIMITED");
    assert_eq!(third.expect_close().await?, 4001);
    Ok(())
}

#[tokio::test]
async fn idle_session_reaped() -> anyhow::Result<()> {
    let broker = TestBroker::start_with(&["--max-idle-ms", "200"]).await?;
    let mut client = broker.connect().await?;

    client.send_json(json!({})).await?;
    client.expect_status("connected").await?;
    client.expect_hello().await?;
    client.read_output_until(PROMPT).await?;

    // No input: the broker disconnects us and destroys the sandbox.
    let status = client.expect_status("disconnected").await?;
    assert_eq!(status["reason"], "Session idle timeout");

    wait_for("idle destroy", || {
        broker
            .supervisor
            .destroyed()
            .iter()
            .any(|(_, reason)| *reason == DestroyReason::IdleTimeout)
    })
    .await?;
    Ok(())
}
