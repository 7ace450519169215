use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TestQueries {
    pub queries: Vec<&'static str>,
}

impl Default for TestQueries {
    fn default() -> Self {
        Self {
            queries: vec![
                "Who are the authors of the document?",
                "Show the solution architecture diagram",
                "What is Competiscan and what results did it get?",
                "Which processing patterns are available?",
                "Explain the processing flow with its diagram",
            ],
        }
    }
}
