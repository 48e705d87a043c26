// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential validation and hashing.
//!
//! The broker never keeps plaintext credentials: the auth envelope is
//! validated, hashed, and wiped. Resume authorisation compares hashes only.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SHA-256 digest over `apiKey|accessToken`.
pub type CredentialHash = [u8; 32];

/// Truncated digest over client IP + user agent. Advisory only.
pub type ClientFingerprint = [u8; 16];

/// First client message on a new transport.
///
/// Secret fields are wiped on drop; [`AuthEnvelope::wipe`] is called
/// explicitly as soon as the hash has been computed.
#[derive(Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct AuthEnvelope {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    #[zeroize(skip)]
    pub session_id: Option<String>,
    #[serde(default)]
    #[zeroize(skip)]
    pub client_context: Option<ClientContext>,
}

/// Advisory client metadata sent alongside credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// Session class decided at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClass {
    Anonymous,
    Authenticated,
}

impl SessionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticated => "authenticated",
        }
    }
}

/// Outcome of a successful [`validate`] call.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub hash: CredentialHash,
    pub class: SessionClass,
}

/// Validation failures. All map to `InvalidCredentials` on the wire; the
/// variant only drives server-side logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    MalformedToken,
    Expired,
}

/// Validate an auth envelope and compute the credential hash.
///
/// An envelope with neither `apiKey` nor `accessToken` is an anonymous
/// admission, not an error; whether anonymous sessions are accepted is the
/// broker's decision. A three-segment `accessToken` is treated as a JWT and
/// its `exp` claim checked (no signature verification; the broker is not
/// the token issuer). Any other token shape is accepted opaquely.
pub fn validate(envelope: &AuthEnvelope) -> Result<Admission, CredentialError> {
    let api_key = envelope.api_key.as_deref();
    let access_token = envelope.access_token.as_deref();

    if let Some(token) = access_token {
        if looks_like_jwt(token) {
            check_jwt_expiry(token)?;
        }
    }

    let class = if api_key.is_some() || access_token.is_some() {
        SessionClass::Authenticated
    } else {
        SessionClass::Anonymous
    };

    Ok(Admission { hash: credential_hash(api_key, access_token), class })
}

/// Deterministic SHA-256 over `apiKey|accessToken` (absent fields hash as
/// empty strings).
pub fn credential_hash(api_key: Option<&str>, access_token: Option<&str>) -> CredentialHash {
    let mut hasher = Sha256::new();
    hasher.update(api_key.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(access_token.unwrap_or_default().as_bytes());
    hasher.finalize().into()
}

/// Advisory fingerprint over the canonical client IP and user agent.
pub fn client_fingerprint(ip: IpAddr, user_agent: &str) -> ClientFingerprint {
    let canonical = ip.to_canonical();
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

impl AuthEnvelope {
    /// Overwrite the raw credential fields. The hash is the only form that
    /// survives admission.
    pub fn wipe(&mut self) {
        self.api_key.zeroize();
        self.access_token.zeroize();
        self.api_key = None;
        self.access_token = None;
    }

    pub fn is_resume(&self) -> bool {
        self.session_id.is_some()
    }
}

impl std::fmt::Debug for AuthEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthEnvelope")
            .field("api_key", &self.api_key.is_some())
            .field("access_token", &self.access_token.is_some())
            .field("session_id", &self.session_id)
            .finish()
    }
}

fn looks_like_jwt(token: &str) -> bool {
    let mut segments = token.split('.');
    matches!(
        (segments.next(), segments.next(), segments.next(), segments.next()),
        (Some(h), Some(c), Some(s), None) if !h.is_empty() && !c.is_empty() && !s.is_empty()
    )
}

/// Decode the claims segment and reject an expired token. Absent `exp` is
/// allowed with a warning (some issuers mint non-expiring CLI tokens).
fn check_jwt_expiry(token: &str) -> Result<(), CredentialError> {
    let claims_segment = token.split('.').nth(1).ok_or(CredentialError::MalformedToken)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(claims_segment)
        .map_err(|_| CredentialError::MalformedToken)?;
    let claims: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|_| CredentialError::MalformedToken)?;

    match claims.get("exp").and_then(|v| v.as_i64()) {
        Some(exp) if exp <= now_epoch_secs() => Err(CredentialError::Expired),
        Some(_) => Ok(()),
        None => {
            warn!("access token has no exp claim, accepting");
            Ok(())
        }
    }
}

fn now_epoch_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
