mod config;
mod errors;
mod llm_client;
mod models;
mod pipeline;
mod research;
mod routes;
mod state;
mod template;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::research::ResearchCache;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting customizer v{}", env!("CARGO_PKG_VERSION"));

    // Initialize the research cache
    let research_cache = ResearchCache::open(&config.research_cache_dir).with_context(|| {
        format!(
            "Cannot open research cache at {}",
            config.research_cache_dir.display()
        )
    })?;
    info!(
        "Research cache at {} (ttl {} days)",
        research_cache.root().display(),
        config.research_cache_ttl_days
    );

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone(), config.request_timeout)
        .context("Failed to build HTTP client for the LLM API")?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    // Build app state
    let shutdown = CancellationToken::new();
    let state = AppState {
        llm: Arc::new(llm),
        research_cache: Arc::new(research_cache),
        config: config.clone(),
        shutdown: shutdown.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict CORS origins once a frontend host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

/// Resolves on Ctrl+C after cancelling every in-flight run.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for the shutdown signal: {e}");
        return;
    }
    info!("Shutdown requested, cancelling in-flight runs");
    shutdown.cancel();
}
