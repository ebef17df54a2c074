//! Envelope encoding and whole-frame decoding.
//!
//! The wire envelope is `{"type": string, "id": string|null, "payload": value}`.
//! Encoding always writes the three keys in that order and writes `"id": null`
//! for fire-and-forget messages. Decoding accepts a missing `id` or `payload`
//! and treats both as null.

use switchboard_types::{CorrelationId, Message, MessageType, Value};

use crate::error::CodecError;

/// Encode a message as a compact JSON envelope.
pub fn encode(message: &Message) -> String {
    let kind = serde_json::Value::from(message.kind().as_str());
    let id = message
        .id()
        .map_or(serde_json::Value::Null, |id| serde_json::Value::from(id.as_str()));
    let payload = serde_json::Value::from(message.payload().clone());
    format!(r#"{{"type":{kind},"id":{id},"payload":{payload}}}"#)
}

/// Decode one complete frame.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let json: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    from_json(json)
}

/// Interpret an already-parsed JSON document as an envelope.
pub fn from_json(json: serde_json::Value) -> Result<Message, CodecError> {
    let serde_json::Value::Object(mut fields) = json else {
        return Err(CodecError::InvalidEnvelope {
            detail: "envelope must be an object",
            id: None,
        });
    };

    let id = match fields.remove("id") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(id)) => Some(CorrelationId::from(id)),
        Some(_) => {
            return Err(CodecError::InvalidEnvelope {
                detail: "`id` must be a string",
                id: None,
            });
        }
    };

    let kind = match fields.remove("type") {
        Some(serde_json::Value::String(tag)) => {
            MessageType::parse(&tag).ok_or(CodecError::UnknownType {
                kind: tag,
                id: id.clone(),
            })?
        }
        Some(_) => {
            return Err(CodecError::InvalidEnvelope {
                detail: "`type` must be a string",
                id,
            });
        }
        None => {
            return Err(CodecError::InvalidEnvelope {
                detail: "missing `type`",
                id,
            });
        }
    };

    let payload = fields.remove("payload").map_or(Value::Null, Value::from);
    Ok(Message::new(kind, id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::new(
                MessageType::Get,
                Some(CorrelationId::from("1")),
                Value::object([("key", Value::from("k"))]),
            ),
            Message::notification(MessageType::Ping, Value::Null),
            Message::new(
                MessageType::Set,
                Some(CorrelationId::from("quote \" and \\ slash")),
                Value::object([
                    ("key", Value::from("ünïcödé")),
                    (
                        "value",
                        Value::from(vec![
                            Value::from(1.5),
                            Value::from(-7_i64),
                            Value::from(true),
                            Value::Null,
                        ]),
                    ),
                ]),
            ),
            Message::error(Some(CorrelationId::from("9")), "timeout"),
        ]
    }

    #[test]
    fn decode_inverts_encode() {
        for message in sample_messages() {
            let wire = encode(&message);
            assert_eq!(decode(wire.as_bytes()), Ok(message), "wire: {wire}");
        }
    }

    #[test]
    fn error_response_matches_wire_format() {
        let wire = encode(&Message::error(None, "malformed"));
        assert_eq!(
            wire,
            r#"{"type":"error","id":null,"payload":{"reason":"malformed"}}"#
        );
    }

    #[test]
    fn get_result_matches_wire_format() {
        let request = Message::new(
            MessageType::Get,
            Some(CorrelationId::from("1")),
            Value::Null,
        );
        let reply = request.reply(
            MessageType::GetResult,
            Value::object([("value", Value::from(5_i64))]),
        );
        assert_eq!(
            encode(&reply),
            r#"{"type":"get_result","id":"1","payload":{"value":5}}"#
        );
    }

    #[test]
    fn missing_id_and_payload_are_null() {
        let message = decode(br#"{"type":"ping"}"#);
        assert_eq!(
            message,
            Ok(Message::notification(MessageType::Ping, Value::Null))
        );
    }

    #[test]
    fn unknown_type_keeps_correlation_id() {
        let err = decode(br#"{"type":"teleport","id":"4"}"#).err();
        assert_eq!(
            err,
            Some(CodecError::UnknownType {
                kind: "teleport".to_owned(),
                id: Some(CorrelationId::from("4")),
            })
        );
    }

    #[test]
    fn non_object_envelope_is_rejected() {
        let err = decode(b"[1,2,3]").err();
        assert!(matches!(err, Some(CodecError::InvalidEnvelope { .. })));
    }

    #[test]
    fn numeric_id_is_rejected() {
        let err = decode(br#"{"type":"ping","id":3}"#).err();
        assert!(matches!(err, Some(CodecError::InvalidEnvelope { id: None, .. })));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode(b"{not json").err();
        assert!(matches!(err, Some(CodecError::Malformed(_))));
        assert_eq!(err.map(|e| e.reason()), Some("malformed"));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn leaf() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Int),
                any::<f64>()
                    .prop_filter("JSON has no non-finite numbers", |f| f.is_finite())
                    .prop_map(Value::Float),
                any::<String>().prop_map(Value::String),
            ]
        }

        fn value() -> impl Strategy<Value = Value> {
            leaf().prop_recursive(4, 64, 8, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                    proptest::collection::btree_map(any::<String>(), inner, 0..8)
                        .prop_map(Value::Object),
                ]
            })
        }

        fn message() -> impl Strategy<Value = Message> {
            (
                proptest::sample::select(MessageType::ALL.to_vec()),
                proptest::option::of(any::<String>().prop_map(CorrelationId::from)),
                value(),
            )
                .prop_map(|(kind, id, payload)| Message::new(kind, id, payload))
        }

        proptest! {
            #[test]
            fn decode_inverts_encode_for_any_message(message in message()) {
                let wire = encode(&message);
                prop_assert_eq!(decode(wire.as_bytes()), Ok(message));
            }
        }
    }
}
