use crate::gemini::GeminiClient;
use crate::traits::{Embedder, EmbeddingTask};
use crate::SearchError;
use async_trait::async_trait;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
pub const GEMINI_EMBEDDING_DIMENSIONS: usize = 768;
/// Upper bound of texts per `batchEmbedContents` request.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 100;

/// Offline embedder hashing character trigrams into a normalized vector.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn model_name(&self) -> &str {
        "character-trigram"
    }

    async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_sync(text))
    }
}

/// Embeds through the Gemini embedding endpoint, batching requests.
#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: GeminiClient,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimensions {
            return Err(SearchError::Embedding(format!(
                "{} returned {} dimensions, expected {}",
                self.model,
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, SearchError> {
        let vector = self
            .client
            .embed_content(&self.model, text, task)
            .await
            .map_err(|error| SearchError::Embedding(error.to_string()))?;
        self.check_dimensions(&vector)?;
        Ok(vector)
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_number, batch) in texts.chunks(self.batch_size).enumerate() {
            let embedded = self
                .client
                .batch_embed_contents(&self.model, batch, task)
                .await
                .map_err(|error| SearchError::Embedding(error.to_string()))?;

            if embedded.len() != batch.len() {
                return Err(SearchError::Embedding(format!(
                    "batch {} returned {} embeddings for {} texts",
                    batch_number + 1,
                    embedded.len(),
                    batch.len()
                )));
            }
            for vector in &embedded {
                self.check_dimensions(vector)?;
            }

            debug!(
                batch = batch_number + 1,
                size = batch.len(),
                "embedded batch"
            );
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}
