use crate::{service::http::ApiError, storage::StorageError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Login failed: Bad credentials")]
    BadCredentials,
    #[error("API error: {0}")]
    Api(ApiError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ApiError> for AuthError {
    fn from(error: ApiError) -> Self {
        match error.status() {
            Some(401) => AuthError::BadCredentials,
            _ => AuthError::Api(error),
        }
    }
}
