pub mod analysis;
pub mod artifacts;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod generation;
pub mod hybrid;
pub mod linking;
pub mod models;
pub mod service;
pub mod stores;
pub mod traits;

pub use analysis::{DocumentAnalyzer, ImageAnalyzer};
pub use artifacts::ArtifactLayout;
pub use chunking::{chunk_stats, create_chunks, ChunkStats, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, GeminiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_EMBED_BATCH_SIZE, GEMINI_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, LlmError, RagError, SearchError};
pub use extractor::{extract_document_text, extract_images, LopdfExtractor, PdfExtractor};
pub use gemini::{GeminiClient, GeminiGenerator};
pub use generation::AnswerGenerator;
pub use hybrid::HybridWeights;
pub use models::{
    AnalysisArtifact, AnalysisReport, AnalyzedPage, Chunk, ChunkPayload, CollectionStats, Diagram,
    DocumentAnalysis, ExtractedText, ImageKind, ImageRecord, IndexRecord, PageImage, PageText,
    Person, SearchFilters, SearchResult, VectorHit,
};
pub use service::{DocumentContext, QueryAnswer, RagService, RetrievalConfig};
pub use stores::{CollectionSettings, QdrantStore};
pub use traits::{ContentPart, Embedder, EmbeddingTask, TextGenerator, VectorIndex};
