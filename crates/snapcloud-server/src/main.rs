//! Snap!Cloud project store server binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use snapcloud_server::catalog::{Catalog, MemoryCatalog, PgCatalog};
use snapcloud_server::collaborators::{AccountVerifier, LogNotifier};
use snapcloud_server::config::{LogFormat, ServerConfig, DEFAULT_LOG_FILTER};
use snapcloud_server::{create_router, db, AppState};
use snapcloud_storage::{BlobStore, XmlDocumentParser};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;
    init_tracing(config.log_format);

    tracing::info!("Starting Snap!Cloud project store");
    tracing::info!("Storage root: {}", config.storage_root.display());

    let store = BlobStore::open(&config.storage_root).with_context(|| {
        format!("Failed to open blob store at {}", config.storage_root.display())
    })?;

    let (catalog, accounts): (Arc<dyn Catalog>, Arc<dyn AccountVerifier>) =
        match &config.database_url {
            Some(url) => {
                let pool = db::create_pool(url, config.max_connections)
                    .await
                    .context("Failed to connect to database")?;
                db::run_migrations(&pool)
                    .await
                    .context("Failed to run migrations")?;
                let catalog = Arc::new(PgCatalog::new(pool));
                (catalog.clone() as Arc<dyn Catalog>, catalog as Arc<dyn AccountVerifier>)
            }
            None => {
                tracing::warn!("DATABASE_URL not set - using in-memory catalog, nothing survives a restart");
                let catalog = Arc::new(MemoryCatalog::new());
                (catalog.clone() as Arc<dyn Catalog>, catalog as Arc<dyn AccountVerifier>)
            }
        };

    let state = AppState::new(
        catalog,
        accounts,
        Arc::new(LogNotifier),
        store,
        Arc::new(XmlDocumentParser),
    );

    let mut app = create_router(state).layer(TraceLayer::new_for_http());
    if let Some(cors) = config.cors_layer()? {
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
