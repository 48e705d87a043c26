// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphan and resume scenarios: grace periods, replay, credential checks.

use serde_json::json;

use termbroker::container::{DestroyReason, Supervisor};
use termbroker::session::SessionState;
use termbroker_specs::{wait_for, TestBroker, PROMPT};

/// Open an authenticated session, run one command, and sever the transport.
async fn orphaned_session(broker: &TestBroker, api_key: &str) -> anyhow::Result<String> {
    let mut client = broker.connect().await?;
    client.send_json(json!({"apiKey": api_key})).await?;
    client.expect_status("connected").await?;
    let session_id = client.expect_hello().await?;
    client.read_output_until(PROMPT).await?;

    client.send_text("foo\r").await?;
    client.read_output_until("foo\r\n").await?;

    client.abort();
    let registry_session = session_id.clone();
    wait_for("session orphaned", move || {
        broker
            .state
            .registry
            .get(&registry_session)
            .is_some_and(|s| s.state() == SessionState::Orphaned)
    })
    .await?;
    Ok(session_id)
}

#[tokio::test]
async fn orphan_resume_replays_history() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let session_id = orphaned_session(&broker, "K").await?;

    // Container survives the orphan window.
    assert!(broker.supervisor.destroyed().is_empty());
    assert_eq!(broker.supervisor.running_count(), 1);
    let container = broker
        .state
        .registry
        .get(&session_id)
        .and_then(|s| s.container_ref())
        .ok_or_else(|| anyhow::anyhow!("orphan lost its container"))?;
    assert!(broker.supervisor.is_running(&container).await);

    let mut resumed = broker.connect().await?;
    resumed.send_json(json!({"apiKey": "K", "sessionId": session_id.clone()})).await?;
    resumed.expect_status("connected").await?;
    assert_eq!(resumed.expect_hello().await?, session_id);

    // Replay covers the pre-disconnect output, then the session is live.
    let replayed = resumed.read_output_until("foo\r\n").await?;
    assert!(replayed.contains("foo\r\n"), "missing replay: {replayed:?}");

    resumed.send_text("bar\r").await?;
    let live = resumed.read_output_until("bar\r\n").await?;
    assert!(live.contains("bar\r\n"));

    resumed.close().await?;
    Ok(())
}

#[tokio::test]
async fn resume_with_wrong_credentials_denied() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let session_id = orphaned_session(&broker, "K").await?;

    let mut attacker = broker.connect().await?;
    attacker
        .send_json(json!({"apiKey": "WRONG", "sessionId": session_id.clone()}))
        .await?;
    let frame = attacker.expect_status("error").await?;
    assert_eq!(frame["reason"], "RESUME_DENIED");
    assert_eq!(attacker.expect_close().await?, 4004);

    // The session is untouched and still resumable by the right key.
    let session = broker
        .state
        .registry
        .get(&session_id)
        .ok_or_else(|| anyhow::anyhow!("session gone"))?;
    assert_eq!(session.state(), SessionState::Orphaned);
    assert_eq!(session.resume_count.load(std::sync::atomic::Ordering::Relaxed), 1);

    let mut owner = broker.connect().await?;
    owner.send_json(json!({"apiKey": "K", "sessionId": session_id})).await?;
    owner.expect_status("connected").await?;
    Ok(())
}

#[tokio::test]
async fn resume_unknown_session_not_found() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let mut client = broker.connect().await?;
    client
        .send_json(json!({"apiKey": "K", "sessionId": "no-such-session"}))
        .await?;
    let frame = client.expect_status("error").await?;
    assert_eq!(frame["reason"], "SESSION_NOT_FOUND");
    assert_eq!(client.expect_close().await?, 4003);
    Ok(())
}

#[tokio::test]
async fn resume_without_credentials_rejected() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;
    let session_id = orphaned_session(&broker, "K").await?;

    let mut client = broker.connect().await?;
    client.send_json(json!({"sessionId": session_id})).await?;
    let frame = client.expect_status("error").await?;
    assert_eq!(frame["reason"], "INVALID_CREDENTIALS");
    Ok(())
}

#[tokio::test]
async fn orphan_grace_expiry_destroys_container() -> anyhow::Result<()> {
    let broker = TestBroker::start_with(&["--orphan-grace-ms", "150"]).await?;
    let session_id = orphaned_session(&broker, "K").await?;

    wait_for("grace reap", || {
        broker
            .supervisor
            .destroyed()
            .iter()
            .any(|(_, reason)| *reason == DestroyReason::OrphanExpired)
    })
    .await?;
    wait_for("registry empty", || broker.state.registry.metrics().total == 0).await?;

    // Too late to resume.
    let mut client = broker.connect().await?;
    client.send_json(json!({"apiKey": "K", "sessionId": session_id})).await?;
    let frame = client.expect_status("error").await?;
    assert_eq!(frame["reason"], "SESSION_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn resume_throttle_blocks_bruteforce() -> anyhow::Result<()> {
    let broker = TestBroker::start_with(&["--max-resume-attempts-per-minute", "2"]).await?;
    let session_id = orphaned_session(&broker, "K").await?;

    for _ in 0..2 {
        let mut guesser = broker.connect().await?;
        guesser
            .send_json(json!({"apiKey": "WRONG", "sessionId": session_id.clone()}))
            .await?;
        let frame = guesser.expect_status("error").await?;
        assert_eq!(frame["reason"], "RESUME_DENIED");
    }

    // Third attempt trips the per-session window, even with the right key.
    let mut late = broker.connect().await?;
    late.send_json(json!({"apiKey": "K", "sessionId": session_id})).await?;
    let frame = late.expect_status("error").await?;
    assert_eq!(frame["reason"], "RATE_LIMITED");
    assert_eq!(late.expect_close().await?, 4001);
    Ok(())
}

#[tokio::test]
async fn session_id_survives_only_within_class_caps() -> anyhow::Result<()> {
    // An orphaned session still occupies its authenticated slot.
    let broker = TestBroker::start_with(&["--max-authenticated-sessions", "1"]).await?;
    let _orphan = orphaned_session(&broker, "K").await?;

    let mut second = broker.connect().await?;
    second.send_json(json!({"apiKey": "OTHER"})).await?;
    let frame = second.expect_status("error").await?;
    assert_eq!(frame["reason"], "ADMISSION_DENIED");
    Ok(())
}
