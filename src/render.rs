use log::info;

use crate::models::chat::{ ConnectionState, Message, MessageType, RiderLocation, Role };
use crate::store::Snapshot;

#[derive(Clone, Debug, PartialEq)]
pub enum BubbleKind {
    Text {
        body: String,
    },
    Image {
        url: Option<String>,
    },
    Payment {
        status: Option<String>,
        amount: Option<f64>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Status {
        body: String,
    },
    Voice {
        url: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct MessageBubble {
    pub id: String,
    pub mine: bool,
    pub sender_name: String,
    pub kind: BubbleKind,
    pub read: bool,
    pub timestamp: i64,
}

#[derive(Clone, Debug)]
pub struct ChatView {
    pub bubbles: Vec<MessageBubble>,
    pub typing_roles: Vec<Role>,
    pub marker: Option<RiderLocation>,
    pub banner: Option<&'static str>,
}

/// Pure projection of a store snapshot. No independent logic lives here;
/// user-initiated intents go straight to the channel manager or location
/// publisher, never through the view.
pub fn project(snapshot: &Snapshot) -> ChatView {
    let bubbles = snapshot.messages
        .iter()
        .map(|message| bubble(snapshot, message))
        .collect();

    let mut typing_roles: Vec<Role> = snapshot.typing
        .iter()
        .filter(|(role, typing)| **typing && **role != snapshot.local_role)
        .map(|(role, _)| *role)
        .collect();
    typing_roles.sort_by_key(|role| role.as_str());

    ChatView {
        bubbles,
        typing_roles,
        marker: snapshot.rider_location,
        banner: banner(snapshot.connection),
    }
}

fn banner(state: ConnectionState) -> Option<&'static str> {
    match state {
        ConnectionState::Open => None,
        ConnectionState::Connecting => Some("Connecting..."),
        ConnectionState::Reconnecting => Some("Reconnecting..."),
        ConnectionState::Closed => Some("Disconnected"),
    }
}

fn bubble(snapshot: &Snapshot, message: &Message) -> MessageBubble {
    MessageBubble {
        id: message.id.clone(),
        mine: message.sender_role == snapshot.local_role,
        sender_name: sender_name(snapshot, message),
        kind: kind(message),
        read: message.read,
        timestamp: message.created_at,
    }
}

fn sender_name(snapshot: &Snapshot, message: &Message) -> String {
    if let Some(name) = &message.sender_name {
        return name.clone();
    }
    snapshot.participants
        .iter()
        .find(|p| p.role == message.sender_role)
        .and_then(|p| p.name.clone())
        .unwrap_or_else(|| message.sender_role.to_string())
}

fn kind(message: &Message) -> BubbleKind {
    match message.message_type {
        MessageType::Text => BubbleKind::Text { body: message.content.clone() },
        MessageType::Image => BubbleKind::Image { url: message.media_url.clone() },
        MessageType::Payment =>
            BubbleKind::Payment {
                status: message.metadata
                    .as_ref()
                    .and_then(|m| m.get("verification_status"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                amount: message.metadata
                    .as_ref()
                    .and_then(|m| m.get("amount"))
                    .and_then(|v| v.as_f64()),
            },
        MessageType::Location => {
            let coords = location_of(message);
            BubbleKind::Location { latitude: coords.0, longitude: coords.1 }
        }
        MessageType::Status => BubbleKind::Status { body: message.content.clone() },
        MessageType::Voice => BubbleKind::Voice { url: message.media_url.clone() },
    }
}

fn location_of(message: &Message) -> (f64, f64) {
    if let Some(meta) = &message.metadata {
        if let (Some(lat), Some(lng)) = (
            meta.get("lat").and_then(|v| v.as_f64()),
            meta.get("lng").and_then(|v| v.as_f64()),
        ) {
            return (lat, lng);
        }
    }
    // Fall back to the "lat,lng" content encoding.
    let mut parts = message.content.splitn(2, ',');
    let lat = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0.0);
    let lng = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0.0);
    (lat, lng)
}

/// Capability interface over whichever mapping library the host surface
/// uses. The core never depends on map internals beyond these two calls.
pub trait MapSurface {
    fn init_map(&mut self, latitude: f64, longitude: f64);
    fn place_marker(&mut self, latitude: f64, longitude: f64);
}

/// Drives a MapSurface from successive views: initializes the map centered
/// on the first fix, then moves the marker on every one after it.
pub struct MapBinding<M: MapSurface> {
    map: M,
    initialized: bool,
}

impl<M: MapSurface> MapBinding<M> {
    pub fn new(map: M) -> Self {
        Self { map, initialized: false }
    }

    pub fn sync(&mut self, view: &ChatView) {
        let Some(location) = view.marker else {
            return;
        };
        if !self.initialized {
            self.map.init_map(location.latitude, location.longitude);
            self.initialized = true;
        }
        self.map.place_marker(location.latitude, location.longitude);
    }
}

/// Map adapter for the terminal client: marker moves become log lines.
pub struct LogMapSurface;

impl MapSurface for LogMapSurface {
    fn init_map(&mut self, latitude: f64, longitude: f64) {
        info!("[map] centered at ({}, {})", latitude, longitude);
    }

    fn place_marker(&mut self, latitude: f64, longitude: f64) {
        info!("[map] rider at ({}, {})", latitude, longitude);
    }
}
