use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{CredentialStore, StorageError, StoredCredentials};

/// JSON file on disk holding the last saved credentials.
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<StoredCredentials>, StorageError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<StoredCredentials>(&raw) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                // corrupt file: treat as logged out
                warn!("Discarding unreadable credentials at {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    async fn save(&self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(credentials)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!("Credentials saved to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{User, UserRole};

    fn test_user() -> User {
        User {
            id: "u-1".to_string(),
            name: "Wanjiku".to_string(),
            email: "wanjiku@example.com".to_string(),
            role: UserRole::Customer,
            is_subscribed: false,
            delivery_enabled: false,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tradewizard-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let store = FileCredentialStore::new(temp_path("credentials.json"));

        assert!(store.load().await.unwrap().is_none());

        let credentials = StoredCredentials::new("token-abc".to_string(), test_user());
        store.save(&credentials).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, credentials);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        // clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let path = temp_path("credentials.json");
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, b"{not json").await.unwrap();

        let store = FileCredentialStore::new(path);
        assert!(store.load().await.unwrap().is_none());
    }
}
