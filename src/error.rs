use crate::runtime::RuntimeError;
use crate::{config::ConfigError, service::ServiceError, storage::StorageError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("App state error: {0}")]
    AppStateError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    RuntimeError(#[from] RuntimeError),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Other(error)
    }
}

pub type AppResult<T> = Result<T, AppError>;
