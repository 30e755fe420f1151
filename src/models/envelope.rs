use serde::{ Serialize, Deserialize };

use super::chat::{ Message, MessageType, Role };

/// Everything the server may push down the channel. Decoding happens once,
/// at the channel boundary; tags outside this set never reach the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "new_message")] NewMessage {
        message: Message,
    },
    #[serde(rename = "typing")] Typing {
        role: Role,
        typing: bool,
    },
    #[serde(rename = "rider_location")] RiderLocation {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        heading: Option<f64>,
        #[serde(default)]
        speed: Option<f64>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename = "messages_read")] MessagesRead {
        #[serde(default)]
        reader_role: Option<Role>,
    },
    #[serde(rename = "user_joined")] UserJoined {
        role: Role,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "user_left")] UserLeft {
        role: Role,
    },
    #[serde(rename = "rider_assigned")] RiderAssigned {
        #[serde(default)]
        rider_id: Option<String>,
        #[serde(default)]
        rider_name: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong,
}

/// Everything a client may push up the channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientIntent {
    #[serde(rename = "message")] Message {
        message_type: MessageType,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_id: Option<String>,
    },
    #[serde(rename = "typing")] Typing {
        typing: bool,
    },
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "ping")]
    Ping,
}

impl ClientIntent {
    pub fn text(content: impl Into<String>) -> Self {
        ClientIntent::Message {
            message_type: MessageType::Text,
            content: content.into(),
            media_url: None,
            metadata: None,
            order_id: None,
        }
    }

    pub fn location(latitude: f64, longitude: f64, order_id: Option<String>) -> Self {
        ClientIntent::Message {
            message_type: MessageType::Location,
            content: format!("{},{}", latitude, longitude),
            media_url: None,
            metadata: Some(serde_json::json!({ "lat": latitude, "lng": longitude })),
            order_id,
        }
    }
}
