// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded FIFO of recent container output chunks.
//!
//! Retained to replay to a resuming client. Both a chunk-count cap and a
//! byte cap apply; when either is exceeded the oldest chunks are discarded.
//! The replayed suffix is always contiguous: chunks are only ever dropped
//! from the front, never from the middle.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::ratelimit::within_cap;

#[derive(Debug)]
pub struct ReplayBuffer {
    chunks: VecDeque<Bytes>,
    max_chunks: usize,
    max_bytes: usize,
    bytes: usize,
    /// Chunks discarded from the front since session start.
    dropped: u64,
    /// Chunks ever appended.
    total: u64,
}

impl ReplayBuffer {
    pub fn new(max_chunks: usize, max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            max_chunks,
            max_bytes,
            bytes: 0,
            dropped: 0,
            total: 0,
        }
    }

    /// Append one output chunk, evicting from the front to respect both caps.
    ///
    /// A single chunk larger than the byte cap is truncated to its tail: the
    /// most recent output is the part a resuming client needs.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let chunk = if chunk.len() > self.max_bytes {
            chunk.slice(chunk.len() - self.max_bytes..)
        } else {
            chunk
        };

        while !self.chunks.is_empty()
            && (!within_cap(self.bytes, chunk.len(), self.max_bytes)
                || self.chunks.len() >= self.max_chunks)
        {
            if let Some(evicted) = self.chunks.pop_front() {
                self.bytes -= evicted.len();
                self.dropped += 1;
            }
        }

        self.bytes += chunk.len();
        self.total += 1;
        self.chunks.push_back(chunk);
    }

    /// Chunks currently retained, oldest first.
    pub fn snapshot(&self) -> Vec<Bytes> {
        self.chunks.iter().cloned().collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// True while no chunk has been tail-dropped, i.e. the snapshot covers
    /// everything since session creation.
    pub fn complete_since_start(&self) -> bool {
        self.dropped == 0
    }

    pub fn total_appended(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
