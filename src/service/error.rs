use crate::storage::StorageError;

use super::{auth::AuthError, chat::ChatError, http::ApiError, payment::PaymentError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Other error: {0}")]
    Other(String),
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
