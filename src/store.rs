use chrono::Utc;
use log::debug;
use std::collections::{ HashMap, HashSet };

use crate::models::chat::{
    ConnectionState,
    Conversation,
    Message,
    Participant,
    RiderLocation,
    Role,
};

/// Per-conversation single source of truth. Mutated only by decoded channel
/// events and local intents; every mutation is synchronous and total, and
/// no method here performs I/O. Failure handling lives in the channel
/// manager, not at this layer.
pub struct ConversationStore {
    conversation: Conversation,
    local_role: Role,
    messages: Vec<Message>,
    seen_ids: HashSet<String>,
    typing: HashMap<Role, bool>,
    participants: Vec<Participant>,
    rider_location: Option<RiderLocation>,
    connection: ConnectionState,
}

/// Cheap clone of the store contents for the renderer. The renderer is a
/// pure function of one of these.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub conversation: Conversation,
    pub local_role: Role,
    pub messages: Vec<Message>,
    pub typing: HashMap<Role, bool>,
    pub participants: Vec<Participant>,
    pub rider_location: Option<RiderLocation>,
    pub connection: ConnectionState,
}

impl ConversationStore {
    pub fn new(conversation: Conversation, local_role: Role) -> Self {
        Self {
            conversation,
            local_role,
            messages: Vec::new(),
            seen_ids: HashSet::new(),
            typing: HashMap::new(),
            participants: Vec::new(),
            rider_location: None,
            connection: ConnectionState::Closed,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn local_role(&self) -> Role {
        self.local_role
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// One-shot population from the bootstrap fetch. Replaces the log and
    /// participant set wholesale; also used by the rider_assigned re-fetch.
    pub fn load_history(&mut self, messages: Vec<Message>, participants: Vec<Participant>) {
        self.seen_ids = messages
            .iter()
            .map(|m| m.id.clone())
            .collect();
        self.messages = messages;
        self.participants = participants;
    }

    /// Append in receipt order. The server is the ordering authority; the
    /// log is never re-sorted by timestamp. Duplicate ids are dropped so
    /// the log length always equals the number of distinct ids received.
    pub fn append_message(&mut self, message: Message) {
        if !self.seen_ids.insert(message.id.clone()) {
            debug!("Ignoring duplicate message {}", message.id);
            return;
        }
        self.messages.push(message);
    }

    pub fn set_typing(&mut self, role: Role, typing: bool) {
        self.typing.insert(role, typing);
    }

    /// Overwrites the single latest-location slot; prior fixes are not
    /// retained.
    pub fn set_location(&mut self, location: RiderLocation) {
        self.rider_location = Some(location);
    }

    /// "The other side read what I sent": flips the read flag on the local
    /// role's own messages only, and only false -> true.
    pub fn mark_own_messages_read(&mut self) {
        for message in self.messages.iter_mut() {
            if message.sender_role == self.local_role {
                message.read = true;
            }
        }
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn upsert_participant(&mut self, role: Role, user_id: Option<String>, name: Option<String>) {
        let now = Utc::now().timestamp();
        if let Some(existing) = self.participants.iter_mut().find(|p| p.role == role) {
            existing.online = true;
            existing.last_seen = Some(now);
            if user_id.is_some() {
                existing.user_id = user_id;
            }
            if name.is_some() {
                existing.name = name;
            }
            return;
        }
        self.participants.push(Participant {
            conversation_id: self.conversation.id.clone(),
            role,
            user_id,
            name,
            online: true,
            last_seen: Some(now),
        });
    }

    pub fn mark_participant_offline(&mut self, role: Role) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.role == role) {
            p.online = false;
            p.last_seen = Some(Utc::now().timestamp());
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            conversation: self.conversation.clone(),
            local_role: self.local_role,
            messages: self.messages.clone(),
            typing: self.typing.clone(),
            participants: self.participants.clone(),
            rider_location: self.rider_location,
            connection: self.connection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ ConversationStatus, MessageType };

    fn conversation() -> Conversation {
        Conversation {
            id: "c1".into(),
            order_id: Some("ord-1".into()),
            website_id: "w1".into(),
            status: ConversationStatus::Active,
        }
    }

    fn message(id: &str, sender: Role) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_role: sender,
            sender_id: None,
            sender_name: None,
            message_type: MessageType::Text,
            content: "hello".into(),
            media_url: None,
            metadata: None,
            created_at: 1700000000,
            read: false,
        }
    }

    #[test]
    fn duplicate_ids_are_not_appended() {
        let mut store = ConversationStore::new(conversation(), Role::Customer);
        store.append_message(message("m1", Role::Owner));
        store.append_message(message("m2", Role::Owner));
        store.append_message(message("m1", Role::Owner));
        assert_eq!(store.snapshot().messages.len(), 2);
    }

    #[test]
    fn log_keeps_receipt_order_not_timestamp_order() {
        let mut store = ConversationStore::new(conversation(), Role::Customer);
        let mut late = message("m1", Role::Owner);
        late.created_at = 1700000500;
        let mut early = message("m2", Role::Owner);
        early.created_at = 1700000100;
        store.append_message(late);
        store.append_message(early);
        let ids: Vec<String> = store
            .snapshot()
            .messages.iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(ids, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn mark_own_messages_read_touches_local_role_only() {
        let mut store = ConversationStore::new(conversation(), Role::Customer);
        store.append_message(message("mine", Role::Customer));
        store.append_message(message("theirs", Role::Owner));
        store.mark_own_messages_read();
        let snapshot = store.snapshot();
        assert!(snapshot.messages[0].read);
        assert!(!snapshot.messages[1].read);
    }

    #[test]
    fn read_flag_is_monotonic() {
        let mut store = ConversationStore::new(conversation(), Role::Customer);
        store.append_message(message("m1", Role::Customer));
        store.mark_own_messages_read();
        // Later events can only re-mark, never clear.
        store.set_typing(Role::Owner, true);
        store.mark_own_messages_read();
        assert!(store.snapshot().messages[0].read);
    }

    #[test]
    fn location_slot_holds_only_the_latest_fix() {
        let mut store = ConversationStore::new(conversation(), Role::Customer);
        store.set_location(RiderLocation::at(5.4164, 100.3327));
        store.set_location(RiderLocation::at(5.42, 100.33));
        let current = store.snapshot().rider_location.unwrap();
        assert_eq!(current.latitude, 5.42);
        assert_eq!(current.longitude, 100.33);
    }

    #[test]
    fn load_history_seeds_dedup_set() {
        let mut store = ConversationStore::new(conversation(), Role::Customer);
        store.load_history(vec![message("m1", Role::Owner)], vec![]);
        store.append_message(message("m1", Role::Owner));
        assert_eq!(store.snapshot().messages.len(), 1);
    }

    #[test]
    fn participants_flip_online_and_offline() {
        let mut store = ConversationStore::new(conversation(), Role::Customer);
        store.upsert_participant(Role::Rider, Some("u9".into()), Some("Arif".into()));
        store.upsert_participant(Role::Rider, None, None);
        store.mark_participant_offline(Role::Rider);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.participants.len(), 1);
        let rider = &snapshot.participants[0];
        assert!(!rider.online);
        assert_eq!(rider.user_id.as_deref(), Some("u9"));
        assert!(rider.last_seen.is_some());
    }
}
