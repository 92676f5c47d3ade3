//! Payout Resolution Engine
//! Settles prediction-market commitments into token payouts once a
//! market's outcome is known, and exposes the result over HTTP/WS.

use anyhow::{Context, Result};
use dotenv::dotenv;
use resolution_engine::changefeed::ChangeFeed;
use resolution_engine::config::Config;
use resolution_engine::engine::ResolutionEngine;
use resolution_engine::store::SqliteStore;
use resolution_engine::api;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("resolution engine starting");

    let config = Config::from_env().context("failed to load configuration")?;

    let store = Arc::new(SqliteStore::open(&config.database_path).context("failed to open store")?);
    info!(path = %config.database_path, "store opened");

    let changefeed = Arc::new(ChangeFeed::new(config.changefeed_buffer));
    let engine = Arc::new(ResolutionEngine::new(store, changefeed.clone(), config.clone()));

    let state = api::AppState { engine, changefeed };
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "api server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn load_env() {
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resolution_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
