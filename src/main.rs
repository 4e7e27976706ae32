mod config;
mod controller;
mod encoder;
mod gemini;
mod models;
mod routes;

use routes::{router, AppState};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};
use std::sync::Arc;

use crate::{config::Config, gemini::GeminiClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    if config.gemini.api_key.is_some() {
        tracing::info!("🔑 Gemini API key configured, model {}", config.gemini.model);
    } else {
        tracing::warn!("⚠️ GEMINI_API_KEY is not set; every edit will fail until it is provided");
    }
    tracing::debug!(?config, "Loaded configuration");

    let state = AppState::new(Arc::new(GeminiClient::new(&config.gemini)?));
    let app = router(state, config.max_upload_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
