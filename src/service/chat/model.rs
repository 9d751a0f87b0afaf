use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    #[serde(alias = "customer")]
    User,
    #[serde(alias = "support")]
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "conversation")]
    pub conversation_id: String,
    #[serde(alias = "senderType", alias = "senderRole")]
    pub sender: SenderRole,
    #[serde(alias = "content", alias = "message")]
    pub text: String,
    #[serde(alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "isRead")]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default, alias = "lastMessageText")]
    pub last_message: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage<'a> {
    pub text: &'a str,
}
