// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber setup and credential redaction.
//!
//! Client-supplied structures may carry credential material under a handful of
//! well-known key shapes. Anything that gets serialised into a log line goes
//! through [`redact_fields`] first.

use serde_json::Value;

use crate::config::Config;

/// Key fragments whose values are scrubbed before logging (case-insensitive
/// substring match).
const SENSITIVE_KEYS: &[&str] =
    &["apikey", "api_key", "accesstoken", "access_token", "token", "authorization", "secret", "password", "credential"];

pub const REDACTED: &str = "[redacted]";

/// Initialise the global tracing subscriber from config.
///
/// `BROKER_LOG_LEVEL` sets the default; `RUST_LOG` still overrides per-target.
pub fn init(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    if config.log_format == "text" {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
}

/// Return true when a JSON key looks credential-shaped.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|frag| lower.contains(frag))
}

/// Recursively replace values under credential-shaped keys with
/// [`REDACTED`]. Arrays and nested objects are walked; scalar values under a
/// sensitive key are overwritten regardless of type.
pub fn redact_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *entry = Value::String(REDACTED.to_owned());
                } else {
                    redact_fields(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_fields(item);
            }
        }
        _ => {}
    }
}

/// Convenience: clone + redact, for logging borrowed client payloads.
pub fn redacted(value: &Value) -> Value {
    let mut out = value.clone();
    redact_fields(&mut out);
    out
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
