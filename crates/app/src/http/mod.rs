mod dto;
mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use pdf_rag_core::RagService;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(service: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::health))
        .route("/query", post(handlers::query))
        .route("/document-info", get(handlers::document_info))
        .route("/stats", get(handlers::stats))
        .route("/test-queries", get(handlers::test_queries))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

pub async fn serve(service: Arc<RagService>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "http api listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}
