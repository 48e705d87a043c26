// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Demultiplexer for exec-style (no-TTY) attach streams.
//!
//! Each frame is `[stream:u8, 0, 0, 0, len:u32be]` followed by `len` payload
//! bytes. Streams 1 (stdout) and 2 (stderr) are forwarded; incomplete frames
//! are buffered until the next read.

use bytes::{Buf, Bytes, BytesMut};

const HEADER_LEN: usize = 8;

pub const STREAM_STDOUT: u8 = 1;
pub const STREAM_STDERR: u8 = 2;

/// A declared payload larger than this is treated as stream corruption.
const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameError {
    pub declared_len: usize,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame header declares {} bytes", self.declared_len)
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the stdout/stderr payloads completed by it,
    /// in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while self.buf.len() >= HEADER_LEN {
            let stream = self.buf[0];
            let declared = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
                as usize;
            if declared > MAX_FRAME_LEN {
                return Err(FrameError { declared_len: declared });
            }
            if self.buf.len() < HEADER_LEN + declared {
                break;
            }
            self.buf.advance(HEADER_LEN);
            let payload = self.buf.split_to(declared).freeze();
            if matches!(stream, STREAM_STDOUT | STREAM_STDERR) && !payload.is_empty() {
                payloads.push(payload);
            }
        }
        Ok(payloads)
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
