// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-time swallow of the runtime's attach handshake.
//!
//! The first chunk(s) of a TTY attach may carry a JSON object injected by
//! the runtime (keys like `stream`, `stdin`, `hijack`). A small state machine
//! strips it at most once, tolerates it spanning two reads, and preserves any
//! application bytes before and after it.

use bytes::{Bytes, BytesMut};

/// The handshake object starts within this many bytes of the stream head or
/// not at all.
const HEAD_WINDOW: usize = 64;

/// Give up scanning once this much is buffered without a complete handshake.
const MAX_SCAN: usize = 1024;

#[derive(Debug)]
enum State {
    Scanning(BytesMut),
    Done,
}

#[derive(Debug)]
pub struct HandshakeSwallow {
    state: State,
}

impl Default for HandshakeSwallow {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeSwallow {
    pub fn new() -> Self {
        Self { state: State::Scanning(BytesMut::new()) }
    }

    /// Feed one chunk from the container; returns the bytes safe to forward
    /// now. While a potential handshake spans reads, bytes are withheld
    /// until it completes or the scan window overflows.
    pub fn feed(&mut self, chunk: Bytes) -> Bytes {
        let buffered = match &mut self.state {
            State::Done => return chunk,
            State::Scanning(buffered) => buffered,
        };
        buffered.extend_from_slice(&chunk);

        match scan(buffered) {
            Scan::Stripped(output) => {
                self.state = State::Done;
                output
            }
            Scan::NoHandshake => {
                let output = buffered.split().freeze();
                self.state = State::Done;
                output
            }
            Scan::NeedMore => {
                if buffered.len() >= MAX_SCAN {
                    let output = buffered.split().freeze();
                    self.state = State::Done;
                    output
                } else {
                    Bytes::new()
                }
            }
        }
    }

    /// Release anything withheld (stream ended mid-scan).
    pub fn flush(&mut self) -> Bytes {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Scanning(mut buffered) => buffered.split().freeze(),
            State::Done => Bytes::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }
}

enum Scan {
    /// Handshake found and removed; payload is everything around it.
    Stripped(Bytes),
    /// Proven absent.
    NoHandshake,
    /// A candidate object is still open at the end of the buffer.
    NeedMore,
}

fn scan(buffered: &mut BytesMut) -> Scan {
    let head = buffered.len().min(HEAD_WINDOW);
    let mut saw_open_candidate = false;

    for start in 0..head {
        if buffered[start] != b'{' {
            continue;
        }
        match balanced_end(&buffered[start..]) {
            Some(end) => {
                let candidate = &buffered[start..start + end];
                if is_handshake(candidate) {
                    let mut output = BytesMut::with_capacity(buffered.len() - end);
                    output.extend_from_slice(&buffered[..start]);
                    output.extend_from_slice(&buffered[start + end..]);
                    buffered.clear();
                    return Scan::Stripped(output.freeze());
                }
            }
            None => {
                saw_open_candidate = true;
                break;
            }
        }
    }

    if saw_open_candidate {
        Scan::NeedMore
    } else {
        Scan::NoHandshake
    }
}

/// Length of the balanced JSON object starting at `bytes[0]` (which must be
/// `{`), respecting string literals and escapes. `None` while incomplete.
fn balanced_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// A candidate is the attach handshake when it parses as an object carrying
/// the runtime's stream descriptor keys.
fn is_handshake(candidate: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(candidate) else {
        return false;
    };
    let Some(object) = value.as_object() else {
        return false;
    };
    object.contains_key("hijack")
        && object.contains_key("stream")
        && ["stdin", "stdout", "stderr"].iter().any(|key| object.contains_key(*key))
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
