// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphan-grace reaper: destroys an orphaned session's container once the
//! resume window elapses.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::container::DestroyReason;
use crate::state::BrokerState;

use super::{transition, Session, SessionState};

/// Schedule the grace-period reaper for a freshly orphaned session.
///
/// The returned token is stored on the session; a successful resume cancels
/// it. Broker shutdown cancels it too (the shutdown path destroys containers
/// itself).
pub fn spawn(state: Arc<BrokerState>, session: Arc<Session>) -> CancellationToken {
    let token = state.shutdown.child_token();
    let grace = state.config.orphan_grace();
    *session.reaper.lock() = Some(token.clone());

    let reaper_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = reaper_token.cancelled() => {}
            _ = tokio::time::sleep(grace) => {
                // Re-check under the attach guard: a resume that won the race
                // has already cancelled us, but guard against the window
                // between its check and ours.
                if session.state() == SessionState::Orphaned {
                    info!(session = %session.id, "orphan grace elapsed");
                    transition::terminate(&state, &session, DestroyReason::OrphanExpired).await;
                }
            }
        }
    });

    token
}
