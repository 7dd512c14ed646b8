//! Typed payloads for control messages.

use serde::{Deserialize, Serialize};

/// Client-to-server request to renew the channel credential.
///
/// Wire form: `{"type":"refreshToken","data":{"token":"<current>"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub token: String,
}

/// Server-to-client response carrying the renewed credential.
///
/// Wire form: `{"type":"refreshedToken","data":{"token":"<new>"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshedTokenResponse {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn refresh_request_wire_form() {
        let env = Envelope::new(
            "refreshToken",
            &RefreshTokenRequest {
                token: "abc".into(),
            },
        )
        .unwrap();
        assert_eq!(
            env.to_wire().unwrap(),
            r#"{"type":"refreshToken","data":{"token":"abc"}}"#
        );
    }

    #[test]
    fn refreshed_response_parses() {
        let env =
            Envelope::from_wire(r#"{"type":"refreshedToken","data":{"token":"new"}}"#).unwrap();
        let resp: RefreshedTokenResponse = env.parse_data().unwrap().unwrap();
        assert_eq!(resp.token, "new");
    }
}
