use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use pdf_rag_core::{RagError, RagService};
use std::sync::Arc;
use tracing::error;

use super::dto::{ErrorResponse, QueryRequest, TestQueries};

pub async fn health(State(service): State<Arc<RagService>>) -> impl IntoResponse {
    Json(service.health())
}

pub async fn query(
    State(service): State<Arc<RagService>>,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    match service.query(&request.question, request.top_k).await {
        Ok(answer) => (StatusCode::OK, Json(answer)).into_response(),
        Err(RagError::EmptyQuestion) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("question must not be empty")),
        )
            .into_response(),
        Err(failure) => {
            error!(question = %request.question, error = %failure, "query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(failure.to_string())),
            )
                .into_response()
        }
    }
}

pub async fn document_info(State(service): State<Arc<RagService>>) -> impl IntoResponse {
    Json(service.document_info())
}

pub async fn stats(State(service): State<Arc<RagService>>) -> impl IntoResponse {
    Json(service.stats().await)
}

pub async fn test_queries() -> impl IntoResponse {
    Json(TestQueries::default())
}
