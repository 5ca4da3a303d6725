use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::llm_client::TextGenerationCapability;
use crate::research::ResearchCache;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Text generation for every pipeline stage. `LlmClient` in production.
    pub llm: Arc<dyn TextGenerationCapability>,
    /// One cache instance per process, shared by every run.
    pub research_cache: Arc<ResearchCache>,
    pub config: Config,
    /// Cancelled on shutdown. Each run gets a child token and stops at its next stage boundary.
    pub shutdown: CancellationToken,
}
