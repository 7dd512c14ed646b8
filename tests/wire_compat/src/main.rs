fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use huntboard_protocol::{Envelope, MessageKind};
    use huntboard_protocol::{RefreshTokenRequest, RefreshedTokenResponse};

    /// Deserializes a golden wire string into a Rust type, re-serializes it,
    /// and compares the JSON values (order-independent comparison).
    fn roundtrip_test<T>(golden: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let golden_value: serde_json::Value =
            serde_json::from_str(golden).unwrap_or_else(|e| panic!("bad golden {golden}: {e}"));
        let parsed: T = serde_json::from_str(golden)
            .unwrap_or_else(|e| panic!("failed to deserialize {golden}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {golden}: {e}"));
        assert_eq!(
            golden_value, reserialized,
            "roundtrip mismatch:\n  golden: {golden}\n  Rust:   {reserialized}"
        );
    }

    // --- Control envelopes ---

    #[test]
    fn golden_ping() {
        roundtrip_test::<Envelope>(r#"{"type":"ping"}"#);
        assert_eq!(
            Envelope::control(MessageKind::Ping).to_wire().unwrap(),
            r#"{"type":"ping"}"#
        );
    }

    #[test]
    fn golden_pong() {
        roundtrip_test::<Envelope>(r#"{"type":"pong"}"#);
        let env = Envelope::from_wire(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(env.message_kind(), MessageKind::Pong);
    }

    #[test]
    fn golden_refresh_token_request() {
        roundtrip_test::<Envelope>(r#"{"type":"refreshToken","data":{"token":"old.jwt.sig"}}"#);
        roundtrip_test::<RefreshTokenRequest>(r#"{"token":"old.jwt.sig"}"#);
    }

    #[test]
    fn golden_refreshed_token_response() {
        roundtrip_test::<Envelope>(r#"{"type":"refreshedToken","data":{"token":"new.jwt.sig"}}"#);
        roundtrip_test::<RefreshedTokenResponse>(r#"{"token":"new.jwt.sig"}"#);
    }

    // --- Application envelopes ---

    #[test]
    fn golden_application_event() {
        roundtrip_test::<Envelope>(
            r#"{"type":"applicationUpdated","data":{"applicationId":"app-42","status":"interviewing","updatedAt":"2025-06-01T12:00:00Z"}}"#,
        );
    }

    #[test]
    fn golden_nested_payload() {
        roundtrip_test::<Envelope>(
            r#"{"type":"notification","data":{"title":"Offer","body":{"company":"Acme","salary":120000},"tags":["offer","urgent"]}}"#,
        );
    }

    // --- Backward compatibility ---

    #[test]
    fn envelope_without_data_omits_field() {
        let env = Envelope::from_wire(r#"{"type":"heartbeatAck"}"#).unwrap();
        assert!(env.data.is_none());
        assert_eq!(env.to_wire().unwrap(), r#"{"type":"heartbeatAck"}"#);
    }

    #[test]
    fn unknown_kind_maps_to_other() {
        let env = Envelope::from_wire(r#"{"type":"somethingNew","data":{}}"#).unwrap();
        assert_eq!(env.message_kind(), MessageKind::Other("somethingNew".into()));
    }

    #[test]
    fn empty_kind_is_rejected() {
        assert!(Envelope::from_wire(r#"{"type":"","data":{}}"#).is_err());
    }
}
