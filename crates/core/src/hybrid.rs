//! Re-ranking of vector hits by blending similarity with keyword overlap.

use crate::{SearchResult, VectorHit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub vector: f64,
    pub text: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: 0.8,
            text: 0.2,
        }
    }
}

impl HybridWeights {
    pub fn combine(&self, vector_score: f64, text_score: f64) -> f64 {
        vector_score * self.vector + text_score * self.text
    }
}

/// Lower-cased, whitespace-separated query keywords.
pub fn query_keywords(query_text: &str) -> Vec<String> {
    query_text
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Fraction of keywords contained anywhere in `content`, case-insensitively.
///
/// Containment is substring-based: "log" matches "catalog".
pub fn keyword_overlap(keywords: &[String], content: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let lowered = content.to_lowercase();
    let matches = keywords
        .iter()
        .filter(|keyword| lowered.contains(keyword.as_str()))
        .count();
    matches as f64 / keywords.len() as f64
}

/// Scores every candidate, sorts by combined score (stable, descending) and
/// keeps the first `top_k`.
pub fn rescore(
    query_text: &str,
    candidates: Vec<VectorHit>,
    top_k: usize,
    weights: HybridWeights,
) -> Vec<SearchResult> {
    let keywords = query_keywords(query_text);

    let mut scored: Vec<SearchResult> = candidates
        .into_iter()
        .map(|hit| {
            let text_score = keyword_overlap(&keywords, &hit.payload.content);
            SearchResult {
                combined_score: weights.combine(hit.score, text_score),
                vector_score: hit.score,
                text_score,
                text: hit.payload.text.clone(),
                id: hit.id,
                metadata: hit.payload,
            }
        })
        .collect();

    scored.sort_by(|left, right| right.combined_score.total_cmp(&left.combined_score));
    scored.truncate(top_k);
    scored
}
