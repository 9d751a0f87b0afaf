use crate::service::http::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message text is empty")]
    EmptyMessage,
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}
