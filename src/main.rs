use std::sync::Arc;

use anyhow::Context;
use tradewizard::{service::Credentials, storage::FileCredentialStore, AppConfig, AppState};

extern crate pretty_env_logger;
#[macro_use]
extern crate log;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = pretty_env_logger::try_init_timed();

    info!("Starting TradeWizard client...");

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let store = Arc::new(FileCredentialStore::new(config.storage.credentials_path.clone()));
    let state = AppState::new(config, store)?;

    let user = match state.restore_session().await? {
        Some(user) => user,
        None => {
            let credentials = Credentials {
                email: std::env::var("TRADEWIZARD_EMAIL").context("No saved session and TRADEWIZARD_EMAIL is not set")?,
                password: std::env::var("TRADEWIZARD_PASSWORD").context("TRADEWIZARD_PASSWORD is not set")?,
            };
            state.login(&credentials).await?
        }
    };
    info!("Session ready for {}", user.email);

    let services = &state.services;
    match services.chat.load_conversations().await {
        Ok(conversations) => info!("{} conversations, {} unread", conversations.len(), services.chat.unread_total().await),
        Err(e) => warn!("Failed to load conversations: {}", e),
    }
    match services.notifications.refresh().await {
        Ok(_) => info!("{} unread notifications", services.notifications.unread_count().await),
        Err(e) => warn!("Failed to load notifications: {}", e),
    }

    state.connect_realtime().await?;
    info!("Listening for realtime events, press Ctrl-C to quit");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    info!("Shutting down...");
    state.shutdown().await;

    Ok(())
}
