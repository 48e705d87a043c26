// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound message classification: JSON control frames vs. raw keystrokes.
//!
//! Control-key bytes (ETX, escape sequences) must never be misparsed as
//! JSON, so anything at or below [`RAW_THRESHOLD`] bytes is forwarded
//! verbatim, and longer messages get exactly one JSON decode attempt with a
//! raw fallback.

use bytes::Bytes;
use serde::Deserialize;

/// Messages this short are always raw keystrokes.
pub const RAW_THRESHOLD: usize = 3;

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Raw bytes for container stdin.
    Raw(Bytes),
    /// Explicit data payload for container stdin.
    Data(Bytes),
    Resize { cols: u16, rows: u16 },
    Ping,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlMessage {
    Resize {
        cols: Option<u16>,
        rows: Option<u16>,
        data: Option<ResizeDims>,
    },
    Data {
        data: DataPayload,
    },
    Ping,
}

#[derive(Debug, Deserialize)]
struct ResizeDims {
    cols: u16,
    rows: u16,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataPayload {
    Text(String),
    Bytes(Vec<u8>),
}

/// Classify one transport message.
pub fn classify(message: Bytes) -> Inbound {
    if message.len() <= RAW_THRESHOLD {
        return Inbound::Raw(message);
    }

    match serde_json::from_slice::<ControlMessage>(&message) {
        Ok(ControlMessage::Resize { cols, rows, data }) => {
            // Both shapes: {cols, rows} at the top level or nested in data.
            let dims = match (cols, rows, data) {
                (Some(cols), Some(rows), _) => Some((cols, rows)),
                (_, _, Some(dims)) => Some((dims.cols, dims.rows)),
                _ => None,
            };
            match dims {
                Some((cols, rows)) if cols > 0 && rows > 0 => Inbound::Resize { cols, rows },
                _ => Inbound::Raw(message),
            }
        }
        Ok(ControlMessage::Data { data }) => match data {
            DataPayload::Text(text) => Inbound::Data(Bytes::from(text)),
            DataPayload::Bytes(bytes) => Inbound::Data(Bytes::from(bytes)),
        },
        Ok(ControlMessage::Ping) => Inbound::Ping,
        Err(_) => Inbound::Raw(message),
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
