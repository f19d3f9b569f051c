//! HTTP query interface
//!
//! The thin handler in front of the pipeline: one POST route that takes a
//! question and returns either the generated SQL, the bounded result table
//! and the composed answer, or a structured failure. The schema catalog is
//! introspected fresh for every request.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use finq_catalog::Catalog;
use finq_pipeline::{Pipeline, PipelineError, ResultTable};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub database_path: Arc<str>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub sql: Option<String>,
    pub result: Option<ResultTable>,
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error_kind: String,
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query_handler))
        .with_state(state)
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Response {
    if request.question.trim().is_empty() {
        return failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            "generation_failed",
            "question must not be empty",
        );
    }

    info!(question = %request.question, "query received");

    // Fresh snapshot per request so schema drift is always reflected.
    let catalog = match Catalog::from_database_read_only(state.database_path.as_ref()) {
        Ok(catalog) => catalog,
        Err(e) => {
            error!(error = %e, "catalog introspection failed");
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "execution_failed",
                &format!("schema introspection failed: {e}"),
            );
        }
    };

    match state.pipeline.run(&catalog, &request.question).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(QueryResponse {
                sql: outcome.sql,
                result: outcome.result,
                answer: outcome.answer,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, kind = e.error_kind(), "pipeline failed");
            let status = match e {
                PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            failure(status, e.error_kind(), &e.to_string())
        }
    }
}

fn failure(status: StatusCode, error_kind: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error_kind: error_kind.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}
