use log::warn;

use crate::error::ChannelError;
use crate::models::envelope::{ ClientIntent, ServerEvent };

/// Decode one incoming envelope. Unknown tags and malformed payloads are
/// dropped here with a log line; they never reach the state store and
/// never tear down the channel.
pub fn decode_event(raw: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Dropping undecodable envelope: {} (payload: {:.120})", e, raw);
            None
        }
    }
}

pub fn encode_intent(intent: &ClientIntent) -> Result<String, ChannelError> {
    Ok(serde_json::to_string(intent)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ MessageType, Role };

    #[test]
    fn decodes_new_message() {
        let raw =
            r#"{"type":"new_message","message":{"id":"m1","conversation_id":"c1","sender_role":"owner","type":"text","content":"on the way","created_at":1700000000}}"#;
        match decode_event(raw) {
            Some(ServerEvent::NewMessage { message }) => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.sender_role, Role::Owner);
                assert_eq!(message.message_type, MessageType::Text);
                assert!(!message.read);
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn decodes_typing_and_pong() {
        match decode_event(r#"{"type":"typing","role":"customer","typing":true}"#) {
            Some(ServerEvent::Typing { role, typing }) => {
                assert_eq!(role, Role::Customer);
                assert!(typing);
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
        assert!(matches!(decode_event(r#"{"type":"pong"}"#), Some(ServerEvent::Pong)));
    }

    #[test]
    fn decodes_rider_location_without_optionals() {
        match decode_event(r#"{"type":"rider_location","latitude":5.4164,"longitude":100.3327}"#) {
            Some(ServerEvent::RiderLocation { latitude, longitude, heading, .. }) => {
                assert_eq!(latitude, 5.4164);
                assert_eq!(longitude, 100.3327);
                assert!(heading.is_none());
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn unknown_tag_is_dropped() {
        assert!(decode_event(r#"{"type":"server_maintenance","eta":30}"#).is_none());
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert!(decode_event("{not json").is_none());
        assert!(decode_event(r#"{"type":"typing","role":"nobody","typing":true}"#).is_none());
    }

    #[test]
    fn encodes_location_intent_with_order_binding() {
        let intent = ClientIntent::location(5.42, 100.33, Some("ord-9".into()));
        let raw = encode_intent(&intent).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["message_type"], "location");
        assert_eq!(value["order_id"], "ord-9");
        assert_eq!(value["metadata"]["lat"], 5.42);
    }

    #[test]
    fn encodes_ping_and_read() {
        assert_eq!(encode_intent(&ClientIntent::Ping).unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(encode_intent(&ClientIntent::Read).unwrap(), r#"{"type":"read"}"#);
    }
}
