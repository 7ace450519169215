//! Offline pipeline stages. Each stage reads the artifacts of the previous
//! ones from the output directory and writes its own.

use crate::config::Settings;
use anyhow::{bail, Context};
use pdf_rag_core::artifacts::{read_required, write_json};
use pdf_rag_core::linking::{assign_pages, build_index_records, PageProfile};
use pdf_rag_core::{
    chunk_stats, create_chunks, extract_document_text, extract_images, ArtifactLayout, Chunk,
    ChunkingConfig, DocumentAnalyzer, DocumentContext, EmbeddingTask, ExtractedText,
    ImageAnalyzer, ImageRecord, IngestError, RagService, RetrievalConfig, VectorIndex,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn extract_text(
    settings: &Settings,
    pdf: &Path,
    llm_fallback: bool,
) -> anyhow::Result<ExtractedText> {
    let generator = if llm_fallback {
        Some(settings.analysis_generator()?)
    } else {
        None
    };
    let extracted = extract_document_text(pdf, generator.as_deref())
        .await
        .with_context(|| format!("failed to extract text from {}", pdf.display()))?;

    write_json(&settings.layout().extracted_text(), &extracted)?;
    Ok(extracted)
}

pub fn chunk(settings: &Settings, config: ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
    let layout = settings.layout();
    let extracted: ExtractedText = read_required(&layout.extracted_text())?;
    let chunks = create_chunks(&extracted.full_text, config)?;

    if let Some(stats) = chunk_stats(&chunks) {
        info!(
            total = stats.total,
            average_chars = stats.average_chars,
            min_chars = stats.min_chars,
            max_chars = stats.max_chars,
            "chunks created"
        );
    }
    write_json(&layout.chunks(), &chunks)?;
    Ok(chunks)
}

pub async fn embed(settings: &Settings) -> anyhow::Result<Vec<Chunk>> {
    let layout = settings.layout();
    let mut chunks: Vec<Chunk> = read_required(&layout.chunks())?;
    let embedder = settings.embedder()?;

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
    let vectors = embedder
        .embed_batch(&texts, EmbeddingTask::RetrievalDocument)
        .await?;
    if vectors.len() != chunks.len() {
        bail!(
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );
    }

    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        chunk.embedding = Some(vector);
    }
    info!(
        chunks = chunks.len(),
        model = embedder.model_name(),
        dimensions = embedder.dimensions(),
        "chunks embedded"
    );
    write_json(&layout.chunks_with_embeddings(), &chunks)?;
    Ok(chunks)
}

pub fn extract_pdf_images(settings: &Settings, pdf: &Path) -> anyhow::Result<Vec<ImageRecord>> {
    let layout = settings.layout();
    let images = extract_images(pdf, &layout.images_dir())?;
    info!(images = images.len(), dir = %layout.images_dir().display(), "images extracted");
    write_json(&layout.images_metadata(), &images)?;
    Ok(images)
}

pub async fn analyze_images(settings: &Settings) -> anyhow::Result<Vec<ImageRecord>> {
    let layout = settings.layout();
    let images: Vec<ImageRecord> = read_required(&layout.images_metadata())?;
    let generator = settings.analysis_generator()?;

    let analyzed = ImageAnalyzer::new(generator.as_ref())
        .analyze_all(&images)
        .await;
    write_json(&layout.images_with_context(), &analyzed)?;
    Ok(analyzed)
}

pub async fn analyze_document(settings: &Settings, pdf: &Path) -> anyhow::Result<()> {
    let layout = settings.layout();
    let generator = settings.analysis_generator()?;

    let artifact = DocumentAnalyzer::new(generator.as_ref(), &layout)
        .analyze(pdf)
        .await?;
    if artifact.complete_analysis.analysis().is_none() {
        warn!(
            path = %layout.raw_analysis_response().display(),
            "document analysis could not be parsed, raw response kept"
        );
    }
    write_json(&layout.document_analysis(), &artifact)?;
    Ok(())
}

fn read_extracted(layout: &ArtifactLayout) -> anyhow::Result<Option<ExtractedText>> {
    match read_required(&layout.extracted_text()) {
        Ok(extracted) => Ok(Some(extracted)),
        Err(IngestError::MissingArtifact(_)) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Page texts used to place chunks: the LLM analysis when it has any page
/// text, else the extracted pages.
fn page_profiles(
    document: &DocumentContext,
    extracted: Option<&ExtractedText>,
) -> (Vec<PageProfile>, u32) {
    if let Some(analysis) = document.analysis.complete_analysis.analysis() {
        let pages: Vec<PageProfile> = analysis
            .pages
            .iter()
            .filter(|page| !page.text_content.trim().is_empty())
            .map(|page| PageProfile::new(page.page_number, &page.text_content))
            .collect();
        if !pages.is_empty() {
            let total = analysis.pages.len() as u32;
            return (pages, total);
        }
    }

    match extracted {
        Some(extracted) => {
            let pages: Vec<PageProfile> = extracted
                .pages
                .iter()
                .map(|page| PageProfile::new(page.number, &page.text))
                .collect();
            let total = extracted
                .pages
                .iter()
                .map(|page| page.number)
                .max()
                .unwrap_or(1);
            (pages, total)
        }
        None => (Vec::new(), 1),
    }
}

/// Links chunks to pages and images, recreates the collection and uploads
/// every embedded chunk.
pub async fn load(
    settings: &Settings,
    store: &dyn VectorIndex,
    source: Option<String>,
) -> anyhow::Result<usize> {
    let layout = settings.layout();
    let chunks: Vec<Chunk> = read_required(&layout.chunks_with_embeddings())?;
    let Some(vector_size) = chunks
        .first()
        .and_then(|chunk| chunk.embedding.as_ref())
        .map(Vec::len)
    else {
        bail!("no embedded chunks in {}", layout.chunks_with_embeddings().display());
    };

    let document = DocumentContext::load(&layout)?;
    let extracted = read_extracted(&layout)?;
    let (profiles, total_pages) = page_profiles(&document, extracted.as_ref());
    let pages = assign_pages(&chunks, &profiles, total_pages);

    let source = source
        .or_else(|| extracted.as_ref().map(|text| text.source_file.clone()))
        .unwrap_or_default();
    let records = build_index_records(&chunks, &pages, &document.images, &source)?;
    let with_images = records.iter().filter(|record| record.payload.has_image).count();

    store.initialize_collection(vector_size).await?;
    let ids = store.upsert_records(&records).await?;

    info!(
        collection = store.collection(),
        points = ids.len(),
        with_images,
        "collection loaded"
    );
    Ok(ids.len())
}

pub fn build_service(settings: &Settings, config: RetrievalConfig) -> anyhow::Result<RagService> {
    let document = DocumentContext::load(&settings.layout())?;
    if document.chunks.is_empty() {
        warn!(dir = %settings.output_dir.display(), "no chunks found, answers will have no context");
    }

    Ok(RagService::new(
        settings.embedder()?,
        Arc::new(settings.vector_store()?),
        settings.generator()?,
        document,
        config,
    ))
}
