//! Axum route handlers for operator access to the research cache.

use axum::{extract::State, Json};
use tracing::info;

use crate::errors::AppError;
use crate::research::{CachedCompany, ClearReport};
use crate::state::AppState;

/// GET /api/v1/research
///
/// Lists every cached company, expired records included, sorted by key.
pub async fn handle_list_research(
    State(state): State<AppState>,
) -> Result<Json<Vec<CachedCompany>>, AppError> {
    let companies = state.research_cache.list_async().await?;
    Ok(Json(companies))
}

/// DELETE /api/v1/research
///
/// Removes every cached record and abandoned staging file. Files that could not be
/// removed are reported, not fatal.
pub async fn handle_clear_research(
    State(state): State<AppState>,
) -> Result<Json<ClearReport>, AppError> {
    let report = state.research_cache.clear_all_async().await?;
    info!(
        "Research cache cleared: removed={}, staging_removed={}, failures={}",
        report.removed,
        report.staging_removed,
        report.failures.len()
    );
    Ok(Json(report))
}
