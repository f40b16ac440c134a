mod codec;
mod config;
mod error;
mod gallery;
mod gemini;
mod generation;
mod history;
mod models;
mod pipeline;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    config::Config,
    gemini::GeminiClient,
    generation::GenerationClient,
    pipeline::Pipeline,
    routes::{router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration error: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!(
        text_model = %config.text_model,
        image_model = %config.image_model,
        "Using API key: {}",
        config.api_key_hint()
    );

    let gemini = GeminiClient::new(&config).context("failed to build Gemini HTTP client")?;
    let state = AppState::new(Pipeline::new(GenerationClient::new(Arc::new(gemini))));
    let app = router(state, config.max_upload_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
