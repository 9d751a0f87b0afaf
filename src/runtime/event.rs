use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};

use super::transport::packet::{EnginePacket, SocketPacket};
use crate::service::{chat::ChatMessage, notification::Notification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    NewNotification,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::NewNotification => "new_notification",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "new_message" => Some(EventKind::NewMessage),
            "new_notification" => Some(EventKind::NewNotification),
            _ => None,
        }
    }
}

/// Server-pushed events this client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NewMessage(ChatMessage),
    NewNotification(Notification),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::NewMessage(_) => EventKind::NewMessage,
            RealtimeEvent::NewNotification(_) => EventKind::NewNotification,
        }
    }

    /// `None` for event names outside the known set.
    pub fn decode(name: &str, data: Value) -> Option<Result<Self, serde_json::Error>> {
        let event = match EventKind::from_name(name)? {
            EventKind::NewMessage => serde_json::from_value(data).map(RealtimeEvent::NewMessage),
            EventKind::NewNotification => serde_json::from_value(data).map(RealtimeEvent::NewNotification),
        };
        Some(event)
    }
}

/// Events the client emits. Rooms are keyed by user or admin id.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinChat { user_id: String },
    LeaveChat { user_id: String },
    SendMessage { conversation_id: String, text: String },
    JoinAdminChat { admin_id: String },
    LeaveAdminChat { admin_id: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinChat { .. } => "join_chat",
            ClientEvent::LeaveChat { .. } => "leave_chat",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::JoinAdminChat { .. } => "join_admin_chat",
            ClientEvent::LeaveAdminChat { .. } => "leave_admin_chat",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ClientEvent::JoinChat { user_id } | ClientEvent::LeaveChat { user_id } => json!(user_id),
            ClientEvent::JoinAdminChat { admin_id } | ClientEvent::LeaveAdminChat { admin_id } => json!(admin_id),
            ClientEvent::SendMessage { conversation_id, text } => json!({
                "conversationId": conversation_id,
                "text": text,
            }),
        }
    }

    pub(crate) fn to_packet(&self) -> EnginePacket {
        SocketPacket::event(self.name(), self.payload()).into_engine()
    }
}

/// A live feed of inbound events. Ends when the client closes.
pub struct Subscription {
    rx: broadcast::Receiver<RealtimeEvent>,
    filter: Option<EventKind>,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<RealtimeEvent>, filter: Option<EventKind>) -> Self {
        Self { rx, filter }
    }

    pub async fn next(&mut self) -> Option<RealtimeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.map_or(true, |kind| kind == event.kind()) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber fell behind, skipped {} realtime events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_frames() {
        let join = ClientEvent::JoinChat {
            user_id: "u-42".to_string(),
        };
        assert_eq!(join.to_packet().encode(), r#"42["join_chat","u-42"]"#);

        let send = ClientEvent::SendMessage {
            conversation_id: "c-1".to_string(),
            text: "Is the EA MT5 compatible?".to_string(),
        };
        assert_eq!(send.name(), "send_message");
        assert_eq!(send.payload()["conversationId"], "c-1");
    }

    #[test]
    fn test_event_decoding() {
        let data = json!({
            "_id": "m1",
            "conversationId": "c1",
            "senderType": "admin",
            "content": "Hello from support",
            "createdAt": "2024-05-01T10:00:00Z"
        });
        let event = RealtimeEvent::decode("new_message", data).unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::NewMessage);

        assert!(RealtimeEvent::decode("typing", Value::Null).is_none());
        assert!(RealtimeEvent::decode("new_notification", json!({"id": 3})).unwrap().is_err());
    }

    #[tokio::test]
    async fn test_subscription_filters_and_ends() {
        let (tx, _) = broadcast::channel(8);
        let mut messages = Subscription::new(tx.subscribe(), Some(EventKind::NewMessage));

        let notification: Notification =
            serde_json::from_value(json!({"id": "n1", "title": "Hi", "message": "Welcome"})).unwrap();
        tx.send(RealtimeEvent::NewNotification(notification)).unwrap();
        drop(tx);

        assert!(messages.next().await.is_none());
    }
}
