//! # cur8t-server
//!
//! HTTP backend for cur8t link collections.
//!
//! This binary provides:
//! - **Collections** with public, protected and private visibility, links,
//!   likes, saves, pins, duplication and per-user favorites
//! - **Access requests** that let a user ask an owner for access to a
//!   non-public collection, with atomic approve-and-grant
//! - **Billing webhooks** from Lemon Squeezy, verified by HMAC and deduped on
//!   the provider event id
//! - **Rate limiting** per action class and per caller

mod access;
mod api;
mod auth;
mod billing;
mod collections;
mod config;
mod error;
mod favorites;
mod rate_limit;
mod social;
mod users;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cur8t_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cur8t_server=debug,cur8t_store=debug")),
        )
        .init();

    info!("Starting cur8t server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database (runs pending migrations)
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Evict rate limit logs idle for more than an hour, every 5 minutes
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(Duration::from_secs(3600)).await;
        }
    });

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
