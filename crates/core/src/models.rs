use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Characters of chunk content kept in the `text` preview field of a payload.
pub const PAYLOAD_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    pub content: String,
    pub char_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(id: u64, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id,
            char_count: content.chars().count(),
            content,
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Output of the text extraction stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub full_text: String,
    pub source_file: String,
    #[serde(default)]
    pub pages: Vec<PageText>,
    #[serde(default)]
    pub checksum: String,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Diagram,
    Person,
    #[default]
    #[serde(other)]
    Unknown,
}

const NEGATED_MENTION: &str = r"\b(?:not|no|without)\s+(?:an?\s+)?\w+";
const DIAGRAM_WORDS: &str =
    r"\b(?:diagrams?|diagramas?|architecture|arquitectura|flowcharts?|flows?|flujos?|tables?|tablas?|charts?)\b";
const PERSON_WORDS: &str =
    r"\b(?:person|persona|personas|people|portrait|retrato|photo of an?|foto de)\b";

fn mentions(pattern: &str, text: &str) -> bool {
    Regex::new(pattern)
        .map(|words| words.is_match(text))
        .unwrap_or(false)
}

impl ImageKind {
    /// Guesses what an image shows from its free-text description.
    ///
    /// Keywords match whole words only, and negated mentions such as
    /// "not a diagram" are ignored.
    pub fn classify(description: &str) -> Self {
        let lowered = description.to_lowercase();
        let affirmed = match Regex::new(NEGATED_MENTION) {
            Ok(negated) => negated.replace_all(&lowered, " ").into_owned(),
            Err(_) => lowered,
        };

        if mentions(DIAGRAM_WORDS, &affirmed) {
            ImageKind::Diagram
        } else if mentions(PERSON_WORDS, &affirmed) {
            ImageKind::Person
        } else {
            ImageKind::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub page: u32,
    #[serde(default)]
    pub image_index: u32,
    pub filename: String,
    pub path: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: ImageKind,
    #[serde(default)]
    pub analyzed: bool,
}

/// Payload stored next to every vector point.
///
/// Every field defaults on its own, so points written by older loaders or
/// edited by hand keep whatever fields are still well-typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPayload {
    #[serde(deserialize_with = "lenient")]
    pub content: String,
    #[serde(deserialize_with = "lenient")]
    pub text: String,
    #[serde(deserialize_with = "lenient")]
    pub page: u32,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub kind: String,
    #[serde(deserialize_with = "lenient")]
    pub has_image: bool,
    #[serde(deserialize_with = "lenient")]
    pub image_path: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient")]
    pub image_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient")]
    pub image_descriptions: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub chunk_id: u64,
    #[serde(deserialize_with = "lenient")]
    pub char_count: usize,
    #[serde(deserialize_with = "lenient")]
    pub source: String,
}

/// Reads one field, using its default when the stored value has the wrong type.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

impl ChunkPayload {
    pub fn for_chunk(chunk: &Chunk, page: u32, source: impl Into<String>) -> Self {
        Self {
            text: chunk.content.chars().take(PAYLOAD_PREVIEW_CHARS).collect(),
            content: chunk.content.clone(),
            page,
            kind: "text".to_string(),
            has_image: false,
            image_path: None,
            image_paths: Vec::new(),
            image_descriptions: Vec::new(),
            chunk_id: chunk.id,
            char_count: chunk.char_count,
            source: source.into(),
        }
    }
}

/// A vector plus the payload that goes with it, ready for upsert.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// Equality filters applied by the vector engine before scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub kind: Option<String>,
    pub has_image: Option<bool>,
    pub page: Option<u32>,
}

impl SearchFilters {
    pub fn with_images() -> Self {
        Self {
            has_image: Some(true),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub vector_score: f64,
    pub text_score: f64,
    pub combined_score: f64,
    pub text: String,
    pub metadata: ChunkPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub status: String,
    pub optimizer_status: String,
    pub vectors_count: Option<u64>,
    pub indexed_vectors_count: Option<u64>,
    pub points_count: Option<u64>,
    pub segments_count: Option<u64>,
    pub vector_size: Option<u64>,
    pub distance: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageImage {
    pub position: String,
    pub description: String,
    pub related_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzedPage {
    pub page_number: u32,
    pub text_content: String,
    pub images: Vec<PageImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Person {
    pub name: String,
    pub page: u32,
    pub role: String,
    pub image_description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagram {
    pub page: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentAnalysis {
    pub pages: Vec<AnalyzedPage>,
    pub people: Vec<Person>,
    pub diagrams: Vec<Diagram>,
}

/// Outcome of the LLM document analysis. A response that could not be parsed
/// is kept verbatim so it can be inspected later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisReport {
    Failed { error: String, raw_text: String },
    Complete(DocumentAnalysis),
}

impl Default for AnalysisReport {
    fn default() -> Self {
        AnalysisReport::Complete(DocumentAnalysis::default())
    }
}

impl AnalysisReport {
    pub fn analysis(&self) -> Option<&DocumentAnalysis> {
        match self {
            AnalysisReport::Complete(analysis) => Some(analysis),
            AnalysisReport::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub complete_analysis: AnalysisReport,
    #[serde(default)]
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_missing_fields_fall_back_to_defaults() {
        let payload: ChunkPayload =
            serde_json::from_value(serde_json::json!({ "chunk_id": 4, "page": 2 })).unwrap();
        assert_eq!(payload.chunk_id, 4);
        assert_eq!(payload.page, 2);
        assert!(payload.content.is_empty());
        assert!(!payload.has_image);
    }

    #[test]
    fn payload_preview_is_truncated_on_char_boundaries() {
        let chunk = Chunk::new(1, "é".repeat(600));
        let payload = ChunkPayload::for_chunk(&chunk, 3, "doc.pdf");
        assert_eq!(payload.text.chars().count(), PAYLOAD_PREVIEW_CHARS);
        assert_eq!(payload.char_count, 600);
        assert_eq!(payload.kind, "text");
    }

    #[test]
    fn image_kind_is_classified_from_description() {
        assert_eq!(ImageKind::classify("An architecture diagram"), ImageKind::Diagram);
        assert_eq!(ImageKind::classify("Portrait photo of a person smiling"), ImageKind::Person);
        assert_eq!(ImageKind::classify("A company logo"), ImageKind::Unknown);
    }

    #[test]
    fn image_kind_keywords_match_whole_words() {
        assert_eq!(
            ImageKind::classify("Portrait of a notable researcher smiling"),
            ImageKind::Person
        );
        assert_eq!(ImageKind::classify("A workflow of the overflow handler"), ImageKind::Unknown);
        assert_eq!(ImageKind::classify("Tabla de resultados"), ImageKind::Diagram);
    }

    #[test]
    fn negated_mentions_do_not_count() {
        assert_eq!(
            ImageKind::classify("This is not a diagram; it is a photo of a person"),
            ImageKind::Person
        );
        assert_eq!(ImageKind::classify("A landscape without people"), ImageKind::Unknown);
    }

    #[test]
    fn error_text_is_not_classified() {
        assert_ne!(
            ImageKind::classify("analysis failed: gemini returned 406: Not Acceptable"),
            ImageKind::Diagram
        );
    }

    #[test]
    fn payload_keeps_well_typed_fields_next_to_broken_ones() {
        let payload: ChunkPayload = serde_json::from_value(serde_json::json!({
            "content": 12,
            "page": "three",
            "chunk_id": 9,
            "has_image": true,
            "image_paths": ["images/page_2_img_1.png"],
            "source": "study.pdf"
        }))
        .unwrap();
        assert!(payload.content.is_empty());
        assert_eq!(payload.page, 0);
        assert_eq!(payload.chunk_id, 9);
        assert!(payload.has_image);
        assert_eq!(payload.image_paths, vec!["images/page_2_img_1.png".to_string()]);
        assert_eq!(payload.source, "study.pdf");
    }

    #[test]
    fn unknown_image_kind_strings_deserialize_as_unknown() {
        let kind: ImageKind = serde_json::from_str("\"table\"").unwrap();
        assert_eq!(kind, ImageKind::Unknown);
    }

    #[test]
    fn failed_analysis_report_round_trips_through_json() {
        let raw = serde_json::json!({
            "complete_analysis": { "error": "bad json", "raw_text": "not json" },
            "source": "doc.pdf"
        });
        let artifact: AnalysisArtifact = serde_json::from_value(raw).unwrap();
        assert!(artifact.complete_analysis.analysis().is_none());

        let raw = serde_json::json!({
            "complete_analysis": { "pages": [{ "page_number": 1 }], "people": [{ "name": "Ada" }] },
            "source": "doc.pdf"
        });
        let artifact: AnalysisArtifact = serde_json::from_value(raw).unwrap();
        let analysis = artifact.complete_analysis.analysis().unwrap();
        assert_eq!(analysis.pages.len(), 1);
        assert_eq!(analysis.people[0].name, "Ada");
    }
}
