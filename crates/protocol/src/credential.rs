//! Channel credential decoding.
//!
//! The realtime channel authenticates with a rotating JWT-style token. The
//! expiry is read from the `exp` claim of the token's payload segment; no
//! signature verification happens client-side.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::envelope::ProtocolError;

/// The current channel credential.
///
/// Exactly one credential is current at a time; a successful refresh
/// replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    /// Raw token as supplied to `connect()` or returned by a refresh.
    pub token: String,
    /// Expiry from the token's `exp` claim, seconds since the Unix epoch.
    pub expiry_epoch: i64,
}

impl Credential {
    /// Decodes a raw token into a credential.
    ///
    /// Expects the standard three-segment form; only the payload segment is
    /// inspected. Fails on malformed base64, malformed JSON, or a missing
    /// `exp` claim.
    pub fn decode(token: &str) -> Result<Self, ProtocolError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| ProtocolError::MalformedToken("missing payload segment".into()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| ProtocolError::MalformedToken(format!("payload base64: {e}")))?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| ProtocolError::MalformedToken(format!("payload JSON: {e}")))?;
        let expiry_epoch = claims
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| ProtocolError::MalformedToken("missing exp claim".into()))?;

        Ok(Self {
            token: token.to_string(),
            expiry_epoch,
        })
    }
}
