// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport surface: the session WebSocket and the health probe.

pub mod ws;
pub mod ws_msg;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::BrokerState;

/// Assemble the broker router.
pub fn build_router(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe with session counts and security posture.
async fn healthz(State(state): State<Arc<BrokerState>>) -> Json<serde_json::Value> {
    let metrics = state.registry.metrics();
    Json(serde_json::json!({
        "status": "running",
        "sessions": metrics,
        "security": state.security.summary(),
    }))
}
