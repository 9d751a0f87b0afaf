use std::sync::Arc;

use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    runtime::{RealtimeClient, RealtimeEvent, Subscription},
    service::{
        chat::{ConversationStore, SenderRole},
        notification::NotificationService,
        Credentials, RegisterRequest, ServiceError, ServiceRegistry, User,
    },
    storage::CredentialStore,
};

struct RealtimeSession {
    client: RealtimeClient,
    pump: JoinHandle<()>,
}

/// The client session: every service plus the optional realtime link.
/// Built once and passed around explicitly.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: ServiceRegistry,
    realtime: Arc<Mutex<Option<RealtimeSession>>>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn CredentialStore>) -> AppResult<Self> {
        let services = ServiceRegistry::new(&config, store)?;
        Ok(Self::with_services(config, services))
    }

    pub fn with_services(config: AppConfig, services: ServiceRegistry) -> Self {
        Self {
            config,
            services,
            realtime: Arc::new(Mutex::new(None)),
        }
    }

    /// Picks up a persisted session, if any.
    pub async fn restore_session(&self) -> AppResult<Option<User>> {
        let user = self.services.auth.restore().await.map_err(ServiceError::from)?;
        if let Some(user) = &user {
            self.adopt(user).await;
        }
        Ok(user)
    }

    pub async fn login(&self, credentials: &Credentials) -> AppResult<User> {
        let user = self.services.auth.login(credentials).await.map_err(ServiceError::from)?;
        self.adopt(&user).await;
        Ok(user)
    }

    pub async fn register(&self, request: &RegisterRequest) -> AppResult<User> {
        let user = self.services.auth.register(request).await.map_err(ServiceError::from)?;
        self.adopt(&user).await;
        Ok(user)
    }

    async fn adopt(&self, user: &User) {
        let role = if user.is_admin() {
            SenderRole::Admin
        } else {
            SenderRole::User
        };
        self.services.chat.set_local_role(role).await;
    }

    /// Opens the realtime link with the current token, joins the user's (or
    /// admin's) room and starts routing pushed events into the stores.
    /// Replaces any link that was already open.
    pub async fn connect_realtime(&self) -> AppResult<()> {
        let token = self.services.auth.token();
        let client = RealtimeClient::connect(&self.config.api.base_url, &self.config.realtime, token.as_deref())?;

        if let Some(user) = self.services.auth.user().await {
            if user.is_admin() {
                client.join_admin_chat(&user.id)?;
            } else {
                client.join_chat(&user.id)?;
            }
        }

        let pump = tokio::spawn(pump(
            client.subscribe_all(),
            self.services.chat.clone(),
            self.services.notifications.clone(),
        ));

        let previous = self.realtime.lock().await.replace(RealtimeSession { client, pump });
        if let Some(previous) = previous {
            debug!("Replacing existing realtime link");
            close_session(previous).await;
        }

        Ok(())
    }

    pub async fn realtime_connected(&self) -> bool {
        match self.realtime.lock().await.as_ref() {
            Some(session) => session.client.is_connected(),
            None => false,
        }
    }

    /// Forwards an emit to the open realtime link.
    pub async fn with_realtime<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&RealtimeClient) -> Result<T, crate::runtime::RuntimeError>,
    {
        match self.realtime.lock().await.as_ref() {
            Some(session) => Ok(f(&session.client)?),
            None => Err(AppError::AppStateError("Realtime is not connected".into())),
        }
    }

    pub async fn shutdown(&self) {
        let session = self.realtime.lock().await.take();
        if let Some(session) = session {
            close_session(session).await;
        }
    }

    /// Closes realtime, signs out remotely (best effort) and forgets every
    /// local store.
    pub async fn logout(&self) -> AppResult<()> {
        self.shutdown().await;
        self.services.auth.logout().await.map_err(ServiceError::from)?;
        self.services.chat.reset().await;
        self.services.notifications.clear().await;
        info!("Logged out");
        Ok(())
    }
}

async fn close_session(session: RealtimeSession) {
    session.client.close().await;
    session.pump.abort();
}

async fn pump(mut events: Subscription, chat: ConversationStore, notifications: NotificationService) {
    while let Some(event) = events.next().await {
        route_event(&chat, &notifications, event).await;
    }
    debug!("Realtime pump stopped");
}

/// Applies one pushed event. Every inbound event, chat or not, is followed by
/// a refresh of the notification list.
async fn route_event(chat: &ConversationStore, notifications: &NotificationService, event: RealtimeEvent) {
    match event {
        RealtimeEvent::NewMessage(message) => {
            let id = message.id.clone();
            if !chat.apply_incoming(message).await {
                debug!("Ignoring duplicate message {}", id);
            }
        }
        RealtimeEvent::NewNotification(notification) => {
            info!("Notification: {}", notification.title);
        }
    }

    if let Err(e) = notifications.refresh().await {
        warn!("Failed to refresh notifications: {}", e);
    }
}
