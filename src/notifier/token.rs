//! Opaque status tokens
//!
//! A token is `<payload>.<signature>`, where payload is the URL-safe base64 of
//! `{"rid","v","iat"}` and the signature is SHA-256 over the secret followed by
//! the encoded payload. Callers must treat the string as opaque.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::errors::{IntakeError, IntakeResult};

/// Decoded status token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusToken {
    pub record_id: Uuid,
    pub version: u64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    rid: Uuid,
    v: u64,
    iat: i64,
}

/// Signs and verifies status tokens
pub struct StatusTokenCodec {
    secret: Vec<u8>,
    max_age_secs: u64,
}

impl fmt::Debug for StatusTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTokenCodec")
            .field("secret", &"<redacted>")
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

impl StatusTokenCodec {
    pub fn new(secret: &[u8], max_age_secs: u64) -> Self {
        Self {
            secret: secret.to_vec(),
            max_age_secs,
        }
    }

    /// Codec with a fresh random 32-byte secret; tokens die with the process
    pub fn generate(max_age_secs: u64) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(&secret, max_age_secs)
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    /// Issue a token for `record_id` at `version`, stamped now
    pub fn issue(&self, record_id: Uuid, version: u64) -> String {
        self.encode(&StatusToken {
            record_id,
            version,
            issued_at: Utc::now(),
        })
    }

    pub fn encode(&self, token: &StatusToken) -> String {
        let payload = TokenPayload {
            rid: token.record_id,
            v: token.version,
            iat: token.issued_at.timestamp(),
        };
        // Serializing a struct of plain fields cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(&encoded);
        format!("{}.{}", encoded, signature)
    }

    /// Verify `raw` for `expected_id` against the current time
    pub fn decode(&self, raw: &str, expected_id: Uuid) -> IntakeResult<StatusToken> {
        self.decode_at(raw, expected_id, Utc::now())
    }

    pub fn decode_at(
        &self,
        raw: &str,
        expected_id: Uuid,
        now: DateTime<Utc>,
    ) -> IntakeResult<StatusToken> {
        let (encoded, signature) = raw
            .split_once('.')
            .ok_or_else(|| IntakeError::InvalidToken("malformed token".into()))?;

        let expected_sig = self.sign(encoded);
        if !bool::from(expected_sig.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(IntakeError::InvalidToken("signature mismatch".into()));
        }

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| IntakeError::InvalidToken("malformed payload encoding".into()))?;
        let payload: TokenPayload = serde_json::from_slice(&json)
            .map_err(|_| IntakeError::InvalidToken("malformed payload".into()))?;

        if payload.rid != expected_id {
            return Err(IntakeError::InvalidToken(format!(
                "token issued for a different petition than {}",
                expected_id
            )));
        }

        let issued_at = Utc
            .timestamp_opt(payload.iat, 0)
            .single()
            .ok_or_else(|| IntakeError::InvalidToken("issue time out of range".into()))?;

        let age_secs = now.timestamp().saturating_sub(payload.iat);
        if age_secs > i64::try_from(self.max_age_secs).unwrap_or(i64::MAX) {
            return Err(IntakeError::ExpiredToken {
                age_secs,
                max_age_secs: self.max_age_secs,
            });
        }

        Ok(StatusToken {
            record_id: payload.rid,
            version: payload.v,
            issued_at,
        })
    }

    fn sign(&self, message: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(message.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}
