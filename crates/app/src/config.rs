use anyhow::{anyhow, Context};
use clap::Args;
use pdf_rag_core::gemini::{DEFAULT_ANALYSIS_MODEL, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GENERATION_MODEL};
use pdf_rag_core::{
    ArtifactLayout, CharacterNgramEmbedder, CollectionSettings, Embedder, GeminiClient,
    GeminiEmbedder, GeminiGenerator, HybridWeights, QdrantStore, RetrievalConfig, TextGenerator,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBED_BATCH_SIZE, GEMINI_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Connection and model settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory holding the pipeline artifacts
    #[arg(long, global = true, env = "PDF_RAG_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Qdrant base URL
    #[arg(long, global = true, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    pub qdrant_url: String,

    /// Qdrant collection
    #[arg(long, global = true, env = "QDRANT_COLLECTION", default_value = "pdf_rag_chunks")]
    pub qdrant_collection: String,

    /// Gemini API key
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini REST base URL
    #[arg(long, global = true, env = "GEMINI_ENDPOINT", default_value = DEFAULT_GEMINI_ENDPOINT)]
    pub gemini_endpoint: String,

    /// Model answering questions
    #[arg(long, global = true, env = "PDF_RAG_GENERATION_MODEL", default_value = DEFAULT_GENERATION_MODEL)]
    pub generation_model: String,

    /// Model describing images and analyzing the document
    #[arg(long, global = true, env = "PDF_RAG_ANALYSIS_MODEL", default_value = DEFAULT_ANALYSIS_MODEL)]
    pub analysis_model: String,

    /// Embedding model
    #[arg(long, global = true, env = "PDF_RAG_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    #[arg(long, global = true, env = "PDF_RAG_EMBEDDING_DIMENSIONS", default_value_t = GEMINI_EMBEDDING_DIMENSIONS)]
    pub embedding_dimensions: usize,

    /// Texts per batch embedding request
    #[arg(long, global = true, env = "PDF_RAG_EMBED_BATCH_SIZE", default_value_t = DEFAULT_EMBED_BATCH_SIZE)]
    pub embed_batch_size: usize,

    /// Use the local trigram embedder instead of the embedding API
    #[arg(long, global = true, default_value_t = false)]
    pub offline_embeddings: bool,

    /// Points per Qdrant upsert request
    #[arg(long, global = true, env = "QDRANT_UPSERT_BATCH_SIZE", default_value_t = 100)]
    pub upsert_batch_size: usize,

    /// HNSW graph degree of a new collection
    #[arg(long, global = true, env = "QDRANT_HNSW_M", default_value_t = 32)]
    pub hnsw_m: u32,

    #[arg(long, global = true, env = "QDRANT_HNSW_EF_CONSTRUCT", default_value_t = 200)]
    pub hnsw_ef_construct: u32,
}

impl Settings {
    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.output_dir)
    }

    pub fn gemini_client(&self) -> anyhow::Result<GeminiClient> {
        let api_key = self
            .gemini_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("GEMINI_API_KEY is not set"))?;
        Ok(GeminiClient::new(&self.gemini_endpoint, api_key))
    }

    pub fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        if self.offline_embeddings {
            return Ok(Arc::new(CharacterNgramEmbedder {
                dimensions: self.embedding_dimensions,
            }));
        }
        Ok(Arc::new(
            GeminiEmbedder::new(
                self.gemini_client()?,
                &self.embedding_model,
                self.embedding_dimensions,
            )
            .with_batch_size(self.embed_batch_size),
        ))
    }

    pub fn generator(&self) -> anyhow::Result<Arc<dyn TextGenerator>> {
        Ok(Arc::new(GeminiGenerator::new(
            self.gemini_client()?,
            &self.generation_model,
        )))
    }

    pub fn analysis_generator(&self) -> anyhow::Result<Arc<dyn TextGenerator>> {
        Ok(Arc::new(GeminiGenerator::new(
            self.gemini_client()?,
            &self.analysis_model,
        )))
    }

    pub fn collection_settings(&self) -> CollectionSettings {
        CollectionSettings {
            hnsw_m: self.hnsw_m,
            hnsw_ef_construct: self.hnsw_ef_construct,
            upsert_batch_size: self.upsert_batch_size.max(1),
            ..CollectionSettings::default()
        }
    }

    pub fn vector_store(&self) -> anyhow::Result<QdrantStore> {
        let store = QdrantStore::new(&self.qdrant_url, &self.qdrant_collection)
            .with_context(|| format!("invalid qdrant url {}", self.qdrant_url))?;
        Ok(store.with_settings(self.collection_settings()))
    }
}

/// Knobs of the question-answering path.
#[derive(Debug, Clone, Args)]
pub struct RetrievalArgs {
    /// Results used when a request does not ask for a count
    #[arg(long, env = "PDF_RAG_TOP_K", default_value_t = 3)]
    pub default_top_k: usize,

    /// Minimum vector similarity of a candidate
    #[arg(long, env = "PDF_RAG_SIMILARITY_FLOOR", default_value_t = 0.3)]
    pub similarity_floor: f64,

    #[arg(long, env = "PDF_RAG_VECTOR_WEIGHT", default_value_t = 0.8)]
    pub vector_weight: f64,

    #[arg(long, env = "PDF_RAG_TEXT_WEIGHT", default_value_t = 0.2)]
    pub text_weight: f64,

    /// Images attached to an answer at most
    #[arg(long, env = "PDF_RAG_MAX_IMAGES", default_value_t = 2)]
    pub max_images: usize,
}

impl RetrievalArgs {
    pub fn to_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            default_top_k: self.default_top_k.max(1),
            similarity_floor: self.similarity_floor,
            weights: HybridWeights {
                vector: self.vector_weight,
                text: self.text_weight,
            },
            max_images: self.max_images,
            ..RetrievalConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Cli;
    use clap::Parser;
    use pdf_rag_core::CollectionSettings;

    #[test]
    fn collection_settings_follow_flags() {
        let cli = Cli::parse_from([
            "pdf-rag",
            "--upsert-batch-size",
            "25",
            "--hnsw-m",
            "16",
            "load",
        ]);

        let settings = cli.settings.collection_settings();
        assert_eq!(settings.upsert_batch_size, 25);
        assert_eq!(settings.hnsw_m, 16);
        assert_eq!(settings.hnsw_ef_construct, 200);
        assert_eq!(settings.quantile, CollectionSettings::default().quantile);
    }

    #[test]
    fn embedding_batch_size_defaults_to_one_hundred() {
        let cli = Cli::parse_from(["pdf-rag", "embed"]);
        assert_eq!(cli.settings.embed_batch_size, 100);

        let cli = Cli::parse_from(["pdf-rag", "--embed-batch-size", "20", "embed"]);
        assert_eq!(cli.settings.embed_batch_size, 20);
    }
}
