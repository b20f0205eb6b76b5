//! # nodelo-server
//!
//! Backend for the Nodelo agency website.
//!
//! This binary provides:
//! - **Contact intake**: the public contact form, with admin notification and
//!   visitor confirmation emails
//! - **Support chat**: visitor/admin conversations with attachments, unread
//!   counters and read receipts, persisted in SQLite
//! - **Real-time events** over WebSocket, one room per chat
//! - **Per-IP rate limiting** on the public write routes

mod api;
mod auth;
mod blob_store;
mod config;
mod engine;
mod error;
mod fanout;
mod notify;
mod rate_limit;
mod ws;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodelo_store::Database;

use crate::api::AppState;
use crate::blob_store::{BlobStorage, DiskBlobStore};
use crate::config::ServerConfig;
use crate::engine::{EngineSettings, MessagingEngine};
use crate::fanout::FanOut;
use crate::notify::{DisabledNotifier, Notifier, SmtpNotifier};
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nodelo_server=debug,nodelo_store=info")),
        )
        .init();

    info!("Starting Nodelo server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let blobs: Arc<dyn BlobStorage> = Arc::new(
        DiskBlobStore::new(config.blob_storage_path.clone(), &config.public_base_url).await?,
    );

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => match SmtpNotifier::new(smtp, config.notify_to.as_deref()) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                warn!(error = %e, "SMTP misconfigured, email notifications disabled");
                Arc::new(DisabledNotifier)
            }
        },
        None => {
            info!("SMTP not configured, email notifications disabled");
            Arc::new(DisabledNotifier)
        }
    };

    let engine = Arc::new(MessagingEngine::new(
        db,
        blobs.clone(),
        notifier,
        FanOut::new(),
        EngineSettings {
            notify_timeout: config.notify_timeout,
            max_upload_size: config.max_upload_size,
        },
    ));

    match &config.admin {
        Some(seed) => {
            engine
                .seed_admin(&seed.email, seed.name.as_deref(), &seed.token)
                .await?;
        }
        None => warn!("ADMIN_EMAIL/ADMIN_TOKEN not set, no admin account seeded"),
    }

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    rate_limiter.spawn_purge();

    let http_addr = config.http_addr;
    let app_state = AppState {
        engine,
        blobs,
        rate_limiter,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
