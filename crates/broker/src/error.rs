// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-visible error kinds, surfaced as `{type:"status", payload:"error"}`
/// reasons and as WebSocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidCredentials,
    AdmissionDenied,
    RateLimited,
    SessionNotFound,
    ResumeDenied,
    ContainerUnavailable,
    BadRequest,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AdmissionDenied => "ADMISSION_DENIED",
            Self::RateLimited => "RATE_LIMITED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ResumeDenied => "RESUME_DENIED",
            Self::ContainerUnavailable => "CONTAINER_UNAVAILABLE",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }

    /// Close code used when the transport is torn down for this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidCredentials => CloseCode::InvalidCredentials,
            Self::AdmissionDenied | Self::RateLimited => CloseCode::Policy,
            Self::SessionNotFound => CloseCode::InvalidSession,
            Self::ResumeDenied => CloseCode::ResumeDenied,
            Self::ContainerUnavailable | Self::BadRequest | Self::Internal => CloseCode::Error,
        }
    }

    /// Reason text safe to transmit to the client. Never contains credential
    /// material or container internals; detail stays in server logs.
    pub fn client_reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid credentials",
            Self::AdmissionDenied => "session limit reached",
            Self::RateLimited => "rate limited",
            Self::SessionNotFound => "session not found",
            Self::ResumeDenied => "resume denied",
            Self::ContainerUnavailable => "sandbox unavailable",
            Self::BadRequest => "bad request",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application WebSocket close codes, externalised from the magic numbers the
/// browser client reacts to. Clients must not auto-reconnect on any 4xxx code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal close (ambiguous: orphanable for authenticated sessions).
    Normal = 1000,
    /// Container stream ended; non-recoverable.
    UserExit = 4000,
    /// Admission rejected or rate-limited.
    Policy = 4001,
    InvalidCredentials = 4002,
    InvalidSession = 4003,
    ResumeDenied = 4004,
    /// Unexpected server-side failure.
    Error = 4005,
}

impl CloseCode {
    pub fn code(&self) -> u16 {
        *self as u16
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
