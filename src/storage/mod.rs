mod error;
mod file;
mod memory;

pub use error::StorageError;
pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::User;

/// What a browser session would keep in local storage: the bearer token and
/// the last user object the backend returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub token: String,
    pub user: User,
    pub saved_at: DateTime<Utc>,
}

impl StoredCredentials {
    pub fn new(token: String, user: User) -> Self {
        Self {
            token,
            user,
            saved_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn load(&self) -> Result<Option<StoredCredentials>, StorageError>;
    async fn save(&self, credentials: &StoredCredentials) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}
