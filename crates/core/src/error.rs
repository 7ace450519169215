use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("image could not be re-encoded: {0}")]
    ImageEncoding(String),

    #[error("artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("llm extraction failed: {0}")]
    Llm(#[from] LlmError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{model} returned {status}: {body}")]
    Status {
        model: String,
        status: u16,
        body: String,
    },

    #[error("{model} returned no text candidates")]
    EmptyResponse { model: String },
}

/// Failure of a single question-answering request.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}
