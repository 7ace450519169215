//! Per-question pipeline: embed, search, re-score, pick images, generate.

use crate::artifacts::{read_or_default, ArtifactLayout};
use crate::generation::AnswerGenerator;
use crate::hybrid::{rescore, HybridWeights};
use crate::traits::{Embedder, EmbeddingTask, TextGenerator, VectorIndex};
use crate::{
    AnalysisArtifact, Chunk, CollectionStats, ImageKind, ImageRecord, IngestError, RagError,
    SearchFilters, SearchResult,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Candidates fetched per requested result, leaving room for re-ranking.
    pub overfetch_factor: usize,
    /// Vector hits below this similarity never reach the scorer.
    pub similarity_floor: f64,
    pub weights: HybridWeights,
    pub max_images: usize,
    /// Lower-case words that mark a question as asking for a picture.
    pub image_keywords: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 3,
            overfetch_factor: 2,
            similarity_floor: 0.3,
            weights: HybridWeights::default(),
            max_images: 2,
            image_keywords: [
                "diagrama",
                "diagram",
                "arquitectura",
                "architecture",
                "imagen",
                "image",
                "foto",
                "photo",
                "muestra",
                "visualiza",
            ]
            .iter()
            .map(|word| word.to_string())
            .collect(),
        }
    }
}

impl RetrievalConfig {
    pub fn wants_image(&self, question: &str) -> bool {
        let lowered = question.to_lowercase();
        self.image_keywords
            .iter()
            .any(|keyword| lowered.contains(keyword.as_str()))
    }

    pub fn resolve_top_k(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(top_k) if top_k > 0 => top_k,
            _ => self.default_top_k,
        }
    }
}

/// Read-only document state loaded from pipeline artifacts at startup.
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
    pub chunks: Vec<Chunk>,
    pub analysis: AnalysisArtifact,
    pub images: Vec<ImageRecord>,
}

impl DocumentContext {
    /// Loads what is available; absent artifacts leave the matching part empty.
    pub fn load(layout: &ArtifactLayout) -> Result<Self, IngestError> {
        let chunks: Vec<Chunk> = read_or_default(&layout.chunks())?;
        let analysis: AnalysisArtifact = read_or_default(&layout.document_analysis())?;
        let mut images: Vec<ImageRecord> = read_or_default(&layout.images_with_context())?;
        if images.is_empty() {
            images = read_or_default(&layout.images_metadata())?;
        }

        info!(
            chunks = chunks.len(),
            images = images.len(),
            analysis = analysis.complete_analysis.analysis().is_some(),
            "document context loaded"
        );
        Ok(Self {
            chunks,
            analysis,
            images,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePayload {
    pub filename: String,
    pub data: String,
    pub description: String,
    pub page: u32,
    #[serde(rename = "type")]
    pub kind: ImageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub images: Vec<ImagePayload>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub model: String,
    pub chunks_loaded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub total_chunks: usize,
    pub total_pages: usize,
    pub people_identified: Vec<String>,
    pub diagrams_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub vector_db: String,
    pub collection: String,
    pub stats: Option<CollectionStats>,
    pub model: String,
    pub embedding_model: String,
    pub search_type: String,
}

pub struct RagService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn TextGenerator>,
    document: DocumentContext,
    config: RetrievalConfig,
}

impl RagService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn TextGenerator>,
        document: DocumentContext,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            document,
            config,
        }
    }

    /// Embeds the question and returns the re-ranked top results.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, RagError> {
        let query_vector = self
            .embedder
            .embed(question, EmbeddingTask::RetrievalQuery)
            .await?;

        let limit = top_k.saturating_mul(self.config.overfetch_factor.max(1));
        let candidates = self
            .index
            .search_vector(&query_vector, filters, limit, self.config.similarity_floor)
            .await?;

        Ok(rescore(question, candidates, top_k, self.config.weights))
    }

    pub async fn query(&self, question: &str, top_k: Option<usize>) -> Result<QueryAnswer, RagError> {
        if question.trim().is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        let top_k = self.config.resolve_top_k(top_k);

        let wants_image = self.config.wants_image(question);
        let filters = if wants_image {
            SearchFilters::with_images()
        } else {
            SearchFilters::default()
        };

        let results = self.retrieve(question, top_k, &filters).await?;
        info!(
            question,
            results = results.len(),
            wants_image,
            top_score = results.first().map(|result| result.combined_score),
            "retrieved context"
        );

        let images = if wants_image {
            self.relevant_images(&results)
        } else {
            Vec::new()
        };

        let answer = AnswerGenerator::new(self.generator.as_ref())
            .answer(question, &results, &images)
            .await?;

        Ok(QueryAnswer {
            question: question.to_string(),
            answer,
            sources: results
                .iter()
                .map(|result| format!("Chunk {}", result.metadata.chunk_id))
                .collect(),
            images: encode_images(&images).await,
            confidence: results.first().map_or(0.0, |result| result.combined_score),
        })
    }

    /// Images on the pages of the retrieved chunks, in metadata order.
    pub fn relevant_images(&self, results: &[SearchResult]) -> Vec<ImageRecord> {
        let pages: HashSet<u32> = results.iter().map(|result| result.metadata.page).collect();
        self.document
            .images
            .iter()
            .filter(|image| pages.contains(&image.page))
            .take(self.config.max_images)
            .cloned()
            .collect()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            model: self.generator.model_name().to_string(),
            chunks_loaded: self.document.chunks.len(),
        }
    }

    pub fn document_info(&self) -> DocumentInfo {
        match self.document.analysis.complete_analysis.analysis() {
            Some(analysis) => DocumentInfo {
                total_chunks: self.document.chunks.len(),
                total_pages: analysis.pages.len(),
                people_identified: analysis
                    .people
                    .iter()
                    .map(|person| person.name.clone())
                    .collect(),
                diagrams_count: analysis.diagrams.len(),
            },
            None => DocumentInfo {
                total_chunks: self.document.chunks.len(),
                total_pages: 0,
                people_identified: Vec::new(),
                diagrams_count: 0,
            },
        }
    }

    pub async fn stats(&self) -> ServiceStats {
        let stats = match self.index.statistics().await {
            Ok(stats) => Some(stats),
            Err(error) => {
                warn!(%error, "collection statistics unavailable");
                None
            }
        };

        ServiceStats {
            vector_db: "Qdrant".to_string(),
            collection: self.index.collection().to_string(),
            stats,
            model: self.generator.model_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            search_type: "hybrid".to_string(),
        }
    }
}

async fn encode_images(images: &[ImageRecord]) -> Vec<ImagePayload> {
    let mut encoded = Vec::with_capacity(images.len());
    for image in images {
        match tokio::fs::read(&image.path).await {
            Ok(bytes) => encoded.push(ImagePayload {
                filename: image.filename.clone(),
                data: STANDARD.encode(bytes),
                description: image.description.clone(),
                page: image.page,
                kind: image.kind,
            }),
            Err(error) => {
                warn!(path = %image.path, %error, "could not load image");
            }
        }
    }
    encoded
}
