// ABOUTME: Slack request signature verification with a replay window
// ABOUTME: HMAC-SHA256 over "v0:timestamp:body" compared in constant time
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::time::Duration;

use ring::hmac;

use crate::errors::{AppError, AppResult};

/// Header carrying the request timestamp
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
/// Header carrying the `v0=` signature
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

const VERSION: &str = "v0";

/// Checks webhook signatures for one signing secret
pub struct SignatureVerifier {
    key: hmac::Key,
    tolerance: Duration,
}

impl SignatureVerifier {
    /// Verifier for `signing_secret` accepting requests up to `tolerance` old
    #[must_use]
    pub fn new(signing_secret: &str, tolerance: Duration) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, signing_secret.as_bytes()),
            tolerance,
        }
    }

    /// Signature Slack would send for `body` at `timestamp`
    #[must_use]
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        let tag = hmac::sign(&self.key, &base_string(timestamp, body));
        format!("{VERSION}={}", hex::encode(tag.as_ref()))
    }

    /// Verify a request against the current unix time `now`
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for a malformed, stale or mismatched signature
    pub fn verify(&self, timestamp: &str, signature: &str, body: &[u8], now: i64) -> AppResult<()> {
        let timestamp: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AppError::auth_invalid("Malformed Slack timestamp"))?;

        let age = now.abs_diff(timestamp);
        if age > self.tolerance.as_secs() {
            return Err(AppError::auth_invalid("Slack request timestamp outside replay window"));
        }

        let expected = signature
            .strip_prefix("v0=")
            .and_then(|digest| hex::decode(digest).ok())
            .ok_or_else(|| AppError::auth_invalid("Malformed Slack signature"))?;

        hmac::verify(&self.key, &base_string(timestamp, body), &expected)
            .map_err(|_| AppError::auth_invalid("Slack signature mismatch"))
    }
}

fn base_string(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let prefix = format!("{VERSION}:{timestamp}:");
    let mut base = Vec::with_capacity(prefix.len() + body.len());
    base.extend_from_slice(prefix.as_bytes());
    base.extend_from_slice(body);
    base
}
