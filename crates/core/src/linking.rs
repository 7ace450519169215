//! Associates chunks with pages, and through pages with images, before the
//! chunks are loaded into the vector store.

use crate::{Chunk, ChunkPayload, ImageRecord, IndexRecord, IngestError};
use std::collections::BTreeMap;

const PROBE_CHARS: usize = 200;
const PROBE_WORDS: usize = 10;

/// Lower-cased text of one page, used as a matching target.
#[derive(Debug, Clone)]
pub struct PageProfile {
    pub number: u32,
    pub text: String,
}

impl PageProfile {
    pub fn new(number: u32, text: &str) -> Self {
        Self {
            number,
            text: text.to_lowercase(),
        }
    }
}

/// Picks the page whose text contains most of the chunk's opening words.
/// Ties go to the earlier page; no match at all gives page 1.
pub fn best_matching_page(chunk: &Chunk, pages: &[PageProfile]) -> u32 {
    let probe: String = chunk.content.to_lowercase().chars().take(PROBE_CHARS).collect();
    let words: Vec<&str> = probe.split_whitespace().take(PROBE_WORDS).collect();

    let mut best_page = 1;
    let mut best_matches = 0;
    for page in pages {
        let matches = words.iter().filter(|word| page.text.contains(*word)).count();
        if matches > best_matches {
            best_matches = matches;
            best_page = page.number;
        }
    }
    best_page
}

/// Spreads chunks evenly over `total_pages` in document order.
pub fn distribute_evenly(chunk_count: usize, total_pages: u32) -> Vec<u32> {
    let total_pages = total_pages.max(1);
    let per_page = (chunk_count / total_pages as usize).max(1);
    (0..chunk_count)
        .map(|index| ((index / per_page) as u32 + 1).min(total_pages))
        .collect()
}

pub fn assign_pages(chunks: &[Chunk], pages: &[PageProfile], total_pages: u32) -> Vec<u32> {
    if pages.is_empty() {
        return distribute_evenly(chunks.len(), total_pages);
    }
    chunks
        .iter()
        .map(|chunk| best_matching_page(chunk, pages))
        .collect()
}

/// Builds upsert records for embedded chunks, filling page and image fields.
pub fn build_index_records(
    chunks: &[Chunk],
    pages: &[u32],
    images: &[ImageRecord],
    source: &str,
) -> Result<Vec<IndexRecord>, IngestError> {
    if chunks.len() != pages.len() {
        return Err(IngestError::InvalidArgument(format!(
            "{} page assignments for {} chunks",
            pages.len(),
            chunks.len()
        )));
    }

    let mut images_by_page: BTreeMap<u32, Vec<&ImageRecord>> = BTreeMap::new();
    for image in images {
        images_by_page.entry(image.page).or_default().push(image);
    }

    chunks
        .iter()
        .zip(pages)
        .map(|(chunk, &page)| {
            let vector = chunk.embedding.clone().ok_or_else(|| {
                IngestError::InvalidArgument(format!("chunk {} has no embedding", chunk.id))
            })?;

            let mut payload = ChunkPayload::for_chunk(chunk, page, source);
            if let Some(page_images) = images_by_page.get(&page) {
                payload.has_image = true;
                payload.image_path = page_images.first().map(|image| image.path.clone());
                payload.image_paths = page_images.iter().map(|image| image.path.clone()).collect();
                payload.image_descriptions = page_images
                    .iter()
                    .map(|image| image.description.clone())
                    .collect();
            }

            Ok(IndexRecord { vector, payload })
        })
        .collect()
}
