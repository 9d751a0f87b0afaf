mod model;

pub use model::Notification;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::http::{ApiError, HttpService};

#[async_trait]
pub trait NotificationApi: Send + Sync + 'static {
    async fn list(&self) -> Result<Vec<Notification>, ApiError>;
    async fn mark_read(&self, notification_id: &str) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct RestNotificationApi {
    http: HttpService,
}

impl RestNotificationApi {
    pub fn new(http: HttpService) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationApi for RestNotificationApi {
    async fn list(&self) -> Result<Vec<Notification>, ApiError> {
        self.http.get_json("/api/notifications").await
    }

    async fn mark_read(&self, notification_id: &str) -> Result<(), ApiError> {
        self.http
            .post_empty::<serde_json::Value>(&format!("/api/notifications/{}/read", notification_id))
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationService {
    api: Arc<dyn NotificationApi>,
    items: Arc<RwLock<Vec<Notification>>>,
}

impl NotificationService {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        Self {
            api,
            items: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.items.read().await.clone()
    }

    pub async fn unread_count(&self) -> usize {
        self.items.read().await.iter().filter(|n| !n.read).count()
    }

    /// Replaces the local list with the server's.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let fetched = self.api.list().await?;
        let count = fetched.len();
        *self.items.write().await = fetched;
        debug!("Loaded {} notifications", count);
        Ok(count)
    }

    pub async fn mark_read(&self, notification_id: &str) -> Result<(), ApiError> {
        {
            let mut items = self.items.write().await;
            match items.iter_mut().find(|n| n.id == notification_id) {
                Some(n) if n.read => return Ok(()),
                Some(n) => n.read = true,
                None => warn!("Marking unknown notification {} as read", notification_id),
            }
        }

        if let Err(e) = self.api.mark_read(notification_id).await {
            error!("Failed to mark notification {} as read: {}", notification_id, e);
            if let Some(n) = self.items.write().await.iter_mut().find(|n| n.id == notification_id) {
                n.read = false;
            }
            return Err(e);
        }

        Ok(())
    }

    pub async fn clear(&self) {
        self.items.write().await.clear();
    }
}
