// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-to-client frames for the session transport.
//!
//! Internally-tagged JSON enums; raw container output travels as binary
//! messages and never through these types.

use axum::extract::ws::{CloseFrame, Message};
use serde::{Deserialize, Serialize};

use crate::error::{CloseCode, ErrorCode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Status {
        payload: StatusPayload,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Hello {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusPayload {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ServerFrame {
    pub fn status(payload: StatusPayload) -> Self {
        Self::Status { payload, reason: None }
    }

    pub fn disconnected(reason: &str) -> Self {
        Self::Status { payload: StatusPayload::Disconnected, reason: Some(reason.to_owned()) }
    }

    pub fn error(code: ErrorCode) -> Self {
        Self::Status {
            payload: StatusPayload::Error,
            reason: Some(code.as_str().to_owned()),
        }
    }

    pub fn hello(session_id: &str) -> Self {
        Self::Hello { session_id: session_id.to_owned() }
    }

    /// Serialise into a transport text message.
    pub fn to_message(&self) -> Message {
        let text = serde_json::to_string(self).unwrap_or_default();
        Message::Text(text.into())
    }
}

/// Close frame carrying one of the named application codes.
pub fn close_message(code: CloseCode, reason: &str) -> Message {
    Message::Close(Some(CloseFrame { code: code.code(), reason: reason.to_owned().into() }))
}

#[cfg(test)]
#[path = "ws_msg_tests.rs"]
mod tests;
