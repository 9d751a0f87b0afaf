use std::{sync::Arc, time::Duration};

use crate::{config::AppConfig, storage::CredentialStore};

mod auth;
pub mod chat;
mod error;
pub mod http;
pub mod marketplace;
pub mod notification;
pub mod payment;

pub use auth::*;
pub use error::ServiceError;

use chat::{ChatApi, ConversationStore, RestChatApi, SenderRole};
use http::HttpService;
use marketplace::MarketplaceService;
use notification::{NotificationApi, NotificationService, RestNotificationApi};
use payment::{PaymentGateway, PaymentService, RestPaymentGateway};

#[derive(Clone)]
pub struct ServiceRegistry {
    pub http: HttpService,
    pub auth: AuthService,
    pub chat: ConversationStore,
    pub payment: PaymentService,
    pub notifications: NotificationService,
    pub marketplace: MarketplaceService,
}

impl ServiceRegistry {
    pub fn new(config: &AppConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ServiceError> {
        info!("Initializing service registry");

        let http = HttpService::new(
            config.api.base_url.clone(),
            Duration::from_secs(config.api.request_timeout_secs),
        )?;

        let registry = Self::with_backends(
            config,
            http.clone(),
            store,
            Arc::new(RestChatApi::new(http.clone())),
            Arc::new(RestPaymentGateway::new(http.clone())),
            Arc::new(RestNotificationApi::new(http)),
        );

        info!("Service registry initialized against {}", config.api.base_url);

        Ok(registry)
    }

    /// Wires the services over explicit backends. Tests swap in fakes here.
    pub fn with_backends(
        config: &AppConfig,
        http: HttpService,
        store: Arc<dyn CredentialStore>,
        chat_api: Arc<dyn ChatApi>,
        gateway: Arc<dyn PaymentGateway>,
        notification_api: Arc<dyn NotificationApi>,
    ) -> Self {
        Self {
            auth: AuthService::new(http.clone(), store),
            chat: ConversationStore::new(chat_api, SenderRole::User),
            payment: PaymentService::new(gateway, config.payment.clone()),
            notifications: NotificationService::new(notification_api),
            marketplace: MarketplaceService::new(http.clone()),
            http,
        }
    }
}
