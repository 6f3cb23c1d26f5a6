mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use intake_api::state::{AppStateInner, PaymentSettings};
use intake_api::storage::DocumentStorage;
use intake_db::Database;
use intake_payments::PesapalClient;
use intake_wizard::FileDraftStore;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intake=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if !config.has_gateway_credentials() {
        warn!("PESAPAL_CONSUMER_KEY/SECRET not set; payments will fail");
    }
    if config.ipn_id.is_none() {
        warn!("PESAPAL_IPN_ID not set; orders carry a placeholder notification id");
    }

    // Storage
    let db = Database::open(&config.db_path)?;
    let drafts = FileDraftStore::new(config.draft_dir.clone())?;
    let storage = DocumentStorage::new(config.storage_dir.clone())?;
    let gateway = PesapalClient::new(config.pesapal.clone())?;

    let state = AppStateInner::new(
        db,
        config.jwt_secret.clone(),
        Box::new(drafts),
        storage,
        Arc::new(gateway),
        PaymentSettings {
            public_url: config.public_url.clone(),
            notification_id: config.ipn_id.clone(),
        },
    );

    let app = intake_api::router(state, config.static_dir.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Intake server listening on {}", config.addr);
    if let Some(dir) = &config.static_dir {
        info!("Serving front end from {}", dir.display());
    }

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
