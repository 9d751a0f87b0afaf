mod error;
mod model;

pub use error::ChatError;
pub use model::*;

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock};

use super::http::{ApiError, HttpService};

#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ApiError>;
    async fn create_conversation(&self, request: &NewConversation) -> Result<Conversation, ApiError>;
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<ChatMessage, ApiError>;
    async fn mark_read(&self, message_id: &str) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct RestChatApi {
    http: HttpService,
}

impl RestChatApi {
    pub fn new(http: HttpService) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatApi for RestChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.http.get_json("/api/chat/conversations").await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.http
            .get_json(&format!("/api/chat/conversations/{}/messages", conversation_id))
            .await
    }

    async fn create_conversation(&self, request: &NewConversation) -> Result<Conversation, ApiError> {
        self.http.post_json("/api/chat/conversations", request).await
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<ChatMessage, ApiError> {
        self.http
            .post_json(
                &format!("/api/chat/conversations/{}/messages", conversation_id),
                &OutgoingMessage { text },
            )
            .await
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ApiError> {
        self.http
            .post_empty::<serde_json::Value>(&format!("/api/chat/messages/{}/read", message_id))
            .await?;
        Ok(())
    }
}

/// Single source of truth for conversations and their message histories.
///
/// Histories only grow: a message id is stored once, in timestamp order, and
/// afterwards only its `read` flag may change.
#[derive(Clone)]
pub struct ConversationStore {
    api: Arc<dyn ChatApi>,
    local_role: Arc<RwLock<SenderRole>>,
    conversations: Arc<RwLock<Vec<Conversation>>>,
    messages: Arc<DashMap<String, Vec<ChatMessage>>>,
    current: Arc<RwLock<Option<String>>>,
    send_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationStore {
    pub fn new(api: Arc<dyn ChatApi>, local_role: SenderRole) -> Self {
        Self {
            api,
            local_role: Arc::new(RwLock::new(local_role)),
            conversations: Arc::new(RwLock::new(Vec::new())),
            messages: Arc::new(DashMap::new()),
            current: Arc::new(RwLock::new(None)),
            send_locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn set_local_role(&self, role: SenderRole) {
        *self.local_role.write().await = role;
    }

    pub async fn local_role(&self) -> SenderRole {
        *self.local_role.read().await
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.conversations.read().await.clone()
    }

    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .read()
            .await
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.messages
            .get(conversation_id)
            .map(|history| history.value().clone())
            .unwrap_or_default()
    }

    pub async fn current(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    pub async fn current_messages(&self) -> Vec<ChatMessage> {
        match self.current().await {
            Some(id) => self.messages(&id),
            None => Vec::new(),
        }
    }

    pub async fn unread_total(&self) -> u32 {
        self.conversations.read().await.iter().map(|c| c.unread_count).sum()
    }

    /// Replaces the conversation list, then loads every conversation's
    /// messages, one request each.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let conversations = self.api.list_conversations().await?;
        info!("Loaded {} conversations", conversations.len());

        let ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
        *self.conversations.write().await = conversations;

        let known: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.messages.retain(|id, _| known.contains(id.as_str()));

        let results = join_all(ids.iter().map(|id| self.load_messages(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to load messages for conversation {}: {}", id, e);
            }
        }

        Ok(self.conversations().await)
    }

    /// Fetches a conversation's history and merges it; returns how many
    /// messages were new.
    pub async fn load_messages(&self, conversation_id: &str) -> Result<usize, ChatError> {
        let fetched = self.api.list_messages(conversation_id).await?;
        let total = fetched.len();
        let inserted = fetched.into_iter().map(|m| self.merge(m)).filter(|new| *new).count();

        debug!(
            "Conversation {}: fetched {} messages, {} new",
            conversation_id, total, inserted
        );
        Ok(inserted)
    }

    /// Sends are serialized per conversation so the backend sees them in
    /// submission order.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.has_conversation(conversation_id).await {
            return Err(ChatError::ConversationNotFound(conversation_id.to_string()));
        }

        let lock = self.send_locks.entry(conversation_id.to_string()).or_default().value().clone();
        let _guard = lock.lock().await;

        let message = self.api.send_message(conversation_id, text).await?;
        self.merge(message.clone());
        self.update_preview(&message, false).await;

        Ok(message)
    }

    /// Idempotent. Flips `read` on every loaded copy of the message,
    /// whichever conversation holds it.
    pub async fn mark_message_as_read(&self, message_id: &str) -> Result<(), ChatError> {
        let mut known = false;
        let mut all_read = true;
        for history in self.messages.iter() {
            for message in history.value().iter().filter(|m| m.id == message_id) {
                known = true;
                all_read &= message.read;
            }
        }

        if known && all_read {
            debug!("Message {} already read", message_id);
            return Ok(());
        }

        self.api.mark_read(message_id).await?;

        // only messages from the other side were ever counted as unread
        let local = self.local_role().await;
        let mut flipped_in = Vec::new();
        for mut history in self.messages.iter_mut() {
            let conversation_id = history.key().clone();
            for message in history.value_mut().iter_mut().filter(|m| m.id == message_id) {
                if !message.read {
                    message.read = true;
                    if message.sender != local {
                        flipped_in.push(conversation_id.clone());
                    }
                }
            }
        }

        if !flipped_in.is_empty() {
            let mut conversations = self.conversations.write().await;
            for conversation in conversations.iter_mut().filter(|c| flipped_in.contains(&c.id)) {
                conversation.unread_count = conversation.unread_count.saturating_sub(1);
            }
        }

        Ok(())
    }

    pub async fn create_conversation(&self, user_id: &str, name: &str, email: &str) -> Result<Conversation, ChatError> {
        if user_id.trim().is_empty() {
            return Err(ChatError::ValidationError("user id is required".to_string()));
        }

        let conversation = self
            .api
            .create_conversation(&NewConversation {
                user_id: user_id.to_string(),
                user_name: name.to_string(),
                user_email: email.to_string(),
            })
            .await?;
        info!("Created conversation {} for user {}", conversation.id, user_id);

        {
            let mut conversations = self.conversations.write().await;
            if !conversations.iter().any(|c| c.id == conversation.id) {
                conversations.push(conversation.clone());
            }
        }

        self.select_conversation(&conversation.id).await?;
        Ok(conversation)
    }

    /// Makes `conversation_id` current. Switching to a different
    /// conversation loads its messages once; reselecting is a no-op.
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        {
            let mut current = self.current.write().await;
            if current.as_deref() == Some(conversation_id) {
                return Ok(());
            }
            if !self.has_conversation(conversation_id).await {
                return Err(ChatError::ConversationNotFound(conversation_id.to_string()));
            }
            *current = Some(conversation_id.to_string());
        }

        self.load_messages(conversation_id).await?;
        Ok(())
    }

    pub async fn clear_selection(&self) {
        self.current.write().await.take();
    }

    /// Merges a pushed message. Returns false for duplicates.
    pub async fn apply_incoming(&self, message: ChatMessage) -> bool {
        let from_other_side = message.sender != self.local_role().await;

        if !self.merge(message.clone()) {
            return false;
        }

        self.update_preview(&message, from_other_side).await;
        true
    }

    pub async fn reset(&self) {
        self.conversations.write().await.clear();
        self.messages.clear();
        self.send_locks.clear();
        self.current.write().await.take();
    }

    async fn has_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.read().await.iter().any(|c| c.id == conversation_id)
    }

    async fn update_preview(&self, message: &ChatMessage, count_unread: bool) {
        let is_current = self.current.read().await.as_deref() == Some(message.conversation_id.as_str());

        let mut conversations = self.conversations.write().await;
        match conversations.iter_mut().find(|c| c.id == message.conversation_id) {
            Some(conversation) => {
                conversation.last_message = Some(message.text.clone());
                conversation.updated_at = Some(message.timestamp);
                if count_unread && !is_current && !message.read {
                    conversation.unread_count += 1;
                }
            }
            None => debug!("Message {} for unlisted conversation {}", message.id, message.conversation_id),
        }
    }

    fn merge(&self, message: ChatMessage) -> bool {
        let mut history = self.messages.entry(message.conversation_id.clone()).or_default();

        if let Some(existing) = history.iter_mut().find(|m| m.id == message.id) {
            existing.read |= message.read;
            return false;
        }

        let position = history.partition_point(|m| m.timestamp <= message.timestamp);
        history.insert(position, message);
        true
    }
}
