mod error;
mod model;
pub use error::AuthError;
pub use model::*;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::storage::{CredentialStore, StoredCredentials};

use super::http::HttpService;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct AuthService {
    http: HttpService,
    store: Arc<dyn CredentialStore>,
    user: Arc<RwLock<Option<User>>>,
}

impl AuthService {
    pub fn new(http: HttpService, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            http,
            store,
            user: Arc::new(RwLock::new(None)),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.http.token()
    }

    pub async fn user(&self) -> Option<User> {
        self.user.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Reinstalls a previously saved session without touching the network.
    pub async fn restore(&self) -> Result<Option<User>, AuthError> {
        match self.store.load().await? {
            Some(credentials) => {
                info!("Restored session for {}", credentials.user.email);
                self.http.set_token(&credentials.token);
                *self.user.write().await = Some(credentials.user.clone());
                Ok(Some(credentials.user))
            }
            None => Ok(None),
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<User, AuthError> {
        require("email", &credentials.email)?;
        require("password", &credentials.password)?;

        let session: AuthSession = self.http.post_json("/api/auth/login", credentials).await?;
        self.install(session).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<User, AuthError> {
        require("name", &request.name)?;
        require("email", &request.email)?;
        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::ValidationError(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let session: AuthSession = self.http.post_json("/api/auth/register", request).await?;
        self.install(session).await
    }

    /// Clears local credentials even if the backend call fails.
    pub async fn logout(&self) -> Result<(), AuthError> {
        if self.token().is_some() {
            if let Err(e) = self.http.post_empty::<serde_json::Value>("/api/auth/logout").await {
                warn!("Remote logout failed, clearing local session anyway: {}", e);
            }
        }

        self.http.clear_token();
        self.user.write().await.take();
        self.store.clear().await?;

        info!("Logged out");
        Ok(())
    }

    pub async fn current_user(&self) -> Result<User, AuthError> {
        let token = self.token().ok_or(AuthError::AuthenticationRequired)?;

        // 401: expired or revoked token
        let user: User = self.http.get_json("/api/auth/users/me").await.map_err(|e| {
            if e.is_unauthorized() {
                AuthError::AuthenticationRequired
            } else {
                AuthError::Api(e)
            }
        })?;
        *self.user.write().await = Some(user.clone());
        self.store.save(&StoredCredentials::new(token, user.clone())).await?;

        Ok(user)
    }

    async fn install(&self, session: AuthSession) -> Result<User, AuthError> {
        self.http.set_token(&session.token);
        *self.user.write().await = Some(session.user.clone());
        self.store
            .save(&StoredCredentials::new(session.token, session.user.clone()))
            .await?;

        info!("Signed in as {} ({:?})", session.user.email, session.user.role);
        Ok(session.user)
    }
}

fn require(field: &str, value: &str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        return Err(AuthError::ValidationError(format!("{} is required", field)));
    }
    Ok(())
}
