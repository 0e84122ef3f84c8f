#![cfg(not(tarpaulin_include))]

use log::{info, warn};
use rosterdesk::AppConfig;
use rosterdesk::app::{self, AppState};
use rosterdesk::mailer::SmtpMailer;
use rosterdesk::store::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Main entry point for the roster web application
///
/// Reads configuration from the environment once, sets up the SMTP transport
/// and serves the employee and vendor roster pages.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;

    // Sending fails with a configuration error until credentials are provided
    let transport = match SmtpMailer::from_config(&config.smtp) {
        Ok(mailer) => Some(Arc::new(mailer)),
        Err(e) => {
            warn!("Mail sending disabled: {}", e);
            None
        }
    };

    let store = match config.session_ttl {
        Some(ttl) => MemoryStore::with_ttl(ttl),
        None => MemoryStore::new(),
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, Arc::new(store), transport)?;
    let router = app::router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
