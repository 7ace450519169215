use crate::error::IngestError;
use crate::models::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Target upper bound of characters per chunk.
    pub chunk_size: usize,
    /// Trailing characters of a chunk repeated at the start of the next one.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits document text into line-preserving, overlapping chunks.
///
/// Lines are accumulated until the next one would push the chunk past
/// `chunk_size`; a line is never split, so a chunk may overshoot by up to one
/// line. Every chunk after the first starts with the last `overlap` characters
/// of the previous chunk.
pub fn create_chunks(text: &str, config: ChunkingConfig) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut next_id = 0u64;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > config.chunk_size && !current.is_empty() {
            push_chunk(&mut chunks, &mut next_id, &current);

            let seed = tail_chars(&current, config.overlap).to_string();
            current = format!("{seed}\n{line}");
            current_len = seed.chars().count() + 1 + line_len;
        } else {
            current.push('\n');
            current.push_str(line);
            current_len += 1 + line_len;
        }
    }

    push_chunk(&mut chunks, &mut next_id, &current);
    Ok(chunks)
}

fn push_chunk(chunks: &mut Vec<Chunk>, next_id: &mut u64, raw: &str) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    chunks.push(Chunk::new(*next_id, trimmed));
    *next_id += 1;
}

fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    match text.char_indices().rev().nth(count - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

/// Summary figures printed after chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStats {
    pub total: usize,
    pub average_chars: usize,
    pub min_chars: usize,
    pub max_chars: usize,
}

pub fn chunk_stats(chunks: &[Chunk]) -> Option<ChunkStats> {
    let min_chars = chunks.iter().map(|chunk| chunk.char_count).min()?;
    let max_chars = chunks.iter().map(|chunk| chunk.char_count).max()?;
    let total_chars: usize = chunks.iter().map(|chunk| chunk.char_count).sum();

    Some(ChunkStats {
        total: chunks.len(),
        average_chars: total_chars / chunks.len(),
        min_chars,
        max_chars,
    })
}
