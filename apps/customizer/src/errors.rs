use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::resume::SchemaError;
use crate::pipeline::Stage;
use crate::research::CacheIoError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid resume: {0}")]
    Schema(#[from] SchemaError),

    #[error("Pipeline failed in {stage}: {message}")]
    PipelineFailed { stage: Stage, message: String },

    #[error("Research cache error: {0}")]
    Cache(#[from] CacheIoError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::Schema(e) => (
                StatusCode::BAD_REQUEST,
                "SCHEMA_ERROR",
                format!(
                    "Resume failed validation with {} violation(s)",
                    e.violations.len()
                ),
                Some(json!({ "violations": e.violations })),
            ),
            AppError::PipelineFailed { stage, message } => {
                tracing::error!("Pipeline failed in {stage}: {message}");
                (
                    StatusCode::BAD_GATEWAY,
                    "PIPELINE_FAILED",
                    message.clone(),
                    Some(json!({ "stage": stage })),
                )
            }
            AppError::Cache(e) => {
                tracing::error!("Research cache error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CACHE_ERROR",
                    "A research cache error occurred".to_string(),
                    None,
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let (Value::Object(fields), Some(Value::Object(extra))) = (&mut error, details) {
            fields.extend(extra);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::GenerationError;
    use crate::models::resume::ResumeDocument;
    use crate::pipeline::PipelineError;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_schema_error_is_400_with_violations() {
        let err = ResumeDocument::load("basics: {}\nwork: []\n").unwrap_err();
        let expected = err.violations.len();
        let response = AppError::from(err).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "SCHEMA_ERROR");
        assert_eq!(
            body["error"]["violations"].as_array().map(Vec::len),
            Some(expected)
        );
    }

    #[tokio::test]
    async fn test_pipeline_failure_is_502_naming_stage() {
        let error = PipelineError::StageExhausted {
            stage: Stage::Review,
            attempts: 3,
            last_error: GenerationError::Timeout("no reply".to_string()),
        };
        let response = AppError::PipelineFailed {
            stage: error.stage(),
            message: error.to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "PIPELINE_FAILED");
        assert_eq!(body["error"]["stage"], "REVIEW");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no reply"));
    }

    #[tokio::test]
    async fn test_cache_error_is_500_without_internals() {
        let response = AppError::from(CacheIoError::EmptyKey).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "CACHE_ERROR");
        assert_eq!(body["error"]["message"], "A research cache error occurred");
    }
}
