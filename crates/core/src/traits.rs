use crate::{CollectionStats, IndexRecord, LlmError, SearchError, SearchFilters, VectorHit};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    RetrievalDocument,
    RetrievalQuery,
}

impl EmbeddingTask {
    pub fn as_api_str(self) -> &'static str {
        match self {
            EmbeddingTask::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            EmbeddingTask::RetrievalQuery => "RETRIEVAL_QUERY",
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, SearchError>;

    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text, task).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn collection(&self) -> &str;

    async fn initialize_collection(&self, vector_size: usize) -> Result<(), SearchError>;

    /// Stores the records and returns the generated point ids in input order.
    async fn upsert_records(&self, records: &[IndexRecord]) -> Result<Vec<String>, SearchError>;

    async fn search_vector(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<VectorHit>, SearchError>;

    async fn statistics(&self) -> Result<CollectionStats, SearchError>;
}

/// One element of a multimodal prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, parts: Vec<ContentPart>) -> Result<String, LlmError>;

    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate(vec![ContentPart::Text(prompt.to_string())]).await
    }
}
