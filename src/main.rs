//! Service entry point: wires settings, the ledger store, the gateway
//! client, the notifier, the scheduler task, and the HTTP API together.

use dotenvy::dotenv;
use mikopo::{
    api::{self, AppState},
    config::{self, settings::Settings},
    core::scheduler,
    errors::Result,
    gateway::GatewayClient,
    notify::{Notifier, NullNotifier, SmsNotifier},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; non-fatal, env vars can be set externally
    dotenv().ok();

    // 3. Load application settings (config.toml + environment overrides)
    let settings = Settings::load()?;
    info!("Configuration loaded");

    // 4. Initialize the ledger store
    let db = config::database::create_connection(&settings.database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    config::database::create_tables(&db).await?;
    info!("Database initialized");

    // 5. Build the gateway client and notification sink
    let gateway = Arc::new(GatewayClient::new(settings.gateway.clone())?);
    let notifier: Arc<dyn Notifier> = if settings.sms.enabled {
        Arc::new(SmsNotifier::new(settings.sms.clone())?)
    } else {
        info!("SMS transport not configured; notifications will be logged only");
        Arc::new(NullNotifier)
    };

    // 6. Spawn the penalty and reminder scheduler (single non-overlapping task)
    tokio::spawn(scheduler::run(
        db.clone(),
        Arc::clone(&notifier),
        settings.scheduler.clone(),
    ));

    // 7. Serve the HTTP API
    let app = api::router(AppState {
        db,
        gateway,
        notifier,
    });
    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    info!(addr = %settings.listen_addr, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
}
