//! The canonical wire envelope.
//!
//! Every message crossing the realtime channel, in either direction, is a
//! JSON object of the shape `{"type": "<event-name>", "data": { ... }}`.
//! Control messages (ping/pong, token refresh) use the same shape.

use serde::{Deserialize, Serialize};

use crate::constants::MessageKind;

/// Errors from protocol-level parsing and construction.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message type must not be empty")]
    EmptyKind,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed credential: {0}")]
    MalformedToken(String),
}

/// Envelope for all realtime communication.
///
/// `data` is omitted from the wire when absent, so control messages
/// serialize as the bare `{"type":"ping"}` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Creates an envelope with a serialized payload.
    ///
    /// Fails if `kind` is empty or the payload does not serialize.
    pub fn new<T: Serialize>(kind: impl Into<String>, data: &T) -> Result<Self, ProtocolError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(ProtocolError::EmptyKind);
        }
        Ok(Self {
            kind,
            data: Some(serde_json::to_value(data)?),
        })
    }

    /// Creates a payload-less control envelope such as `{"type":"ping"}`.
    pub fn control(kind: MessageKind) -> Self {
        Self {
            kind: kind.as_wire().to_string(),
            data: None,
        }
    }

    /// Parses an envelope from raw wire text.
    ///
    /// An envelope with an empty `type` is rejected even when the JSON
    /// itself is well-formed.
    pub fn from_wire(text: &str) -> Result<Self, ProtocolError> {
        let env: Self = serde_json::from_str(text)?;
        if env.kind.is_empty() {
            return Err(ProtocolError::EmptyKind);
        }
        Ok(env)
    }

    /// Serializes the envelope to wire text.
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the message kind for dispatch.
    pub fn message_kind(&self) -> MessageKind {
        MessageKind::from_wire(&self.kind)
    }

    /// Deserializes the payload into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, ProtocolError> {
        match &self.data {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RefreshTokenRequest;

    #[test]
    fn new_rejects_empty_kind() {
        let result = Envelope::new("", &serde_json::json!({}));
        assert!(matches!(result, Err(ProtocolError::EmptyKind)));
    }

    #[test]
    fn control_omits_data() {
        let ping = Envelope::control(MessageKind::Ping);
        assert_eq!(ping.to_wire().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn from_wire_rejects_empty_kind() {
        let result = Envelope::from_wire(r#"{"type":"","data":{}}"#);
        assert!(matches!(result, Err(ProtocolError::EmptyKind)));
    }

    #[test]
    fn from_wire_rejects_malformed_json() {
        let result = Envelope::from_wire("not json {{{");
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn wire_roundtrip_preserves_payload() {
        let env = Envelope::new(
            "notification",
            &serde_json::json!({"title": "Interview scheduled"}),
        )
        .unwrap();
        let text = env.to_wire().unwrap();
        let parsed = Envelope::from_wire(&text).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.data.unwrap()["title"], "Interview scheduled");
    }

    #[test]
    fn parse_data_into_typed_payload() {
        let env = Envelope::new(
            "refreshToken",
            &RefreshTokenRequest {
                token: "tok-1".into(),
            },
        )
        .unwrap();
        let parsed: Option<RefreshTokenRequest> = env.parse_data().unwrap();
        assert_eq!(parsed.unwrap().token, "tok-1");
    }

    #[test]
    fn message_kind_of_unknown_type() {
        let env = Envelope::from_wire(r#"{"type":"jobSaved","data":{"id":3}}"#).unwrap();
        assert_eq!(env.message_kind(), MessageKind::Other("jobSaved".into()));
    }
}
