//! Message kinds and reserved subscription keys.

use serde::{Deserialize, Serialize};

/// Reserved subscription key matching every inbound message kind.
pub const WILDCARD: &str = "*";

/// The closed set of message kinds the realtime channel understands.
///
/// The wire carries a plain string; [`MessageKind::from_wire`] maps it into
/// this enum so dispatch sites can match exhaustively. Kinds the core does
/// not know about land in [`MessageKind::Other`] and are forwarded to
/// wildcard subscribers only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "refreshToken")]
    RefreshToken,
    #[serde(rename = "refreshedToken")]
    RefreshedToken,
    #[serde(untagged)]
    Other(String),
}

impl MessageKind {
    /// Maps a wire `type` string into a message kind.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "refreshToken" => Self::RefreshToken,
            "refreshedToken" => Self::RefreshedToken,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire `type` string for this kind.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::RefreshToken => "refreshToken",
            Self::RefreshedToken => "refreshedToken",
            Self::Other(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_roundtrip() {
        for kind in ["ping", "pong", "refreshToken", "refreshedToken"] {
            let parsed = MessageKind::from_wire(kind);
            assert!(!matches!(parsed, MessageKind::Other(_)), "{kind} is known");
            assert_eq!(parsed.as_wire(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_other() {
        let parsed = MessageKind::from_wire("applicationUpdated");
        assert_eq!(parsed, MessageKind::Other("applicationUpdated".into()));
        assert_eq!(parsed.as_wire(), "applicationUpdated");
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&MessageKind::RefreshToken).unwrap();
        assert_eq!(json, "\"refreshToken\"");
        let parsed: MessageKind = serde_json::from_str("\"pong\"").unwrap();
        assert_eq!(parsed, MessageKind::Pong);
    }
}
