pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::pipeline::handlers::handle_customize;
use crate::research::handlers::{handle_clear_research, handle_list_research};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/resumes/customize", post(handle_customize))
        .route(
            "/api/v1/research",
            get(handle_list_research).delete(handle_clear_research),
        )
        .with_state(state)
}
