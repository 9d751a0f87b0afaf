use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CredentialStore, StorageError, StoredCredentials};

#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Arc<Mutex<Option<StoredCredentials>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: StoredCredentials) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(credentials))),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<StoredCredentials>, StorageError> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        *self.slot.lock().await = Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.slot.lock().await.take();
        Ok(())
    }
}
