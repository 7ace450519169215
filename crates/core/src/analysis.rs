//! LLM-driven enrichment: per-image descriptions and a structured
//! pages/people/diagrams analysis of the whole document.

use crate::artifacts::ArtifactLayout;
use crate::extractor::mime_type_for;
use crate::traits::{ContentPart, TextGenerator};
use crate::{AnalysisArtifact, AnalysisReport, DocumentAnalysis, ImageKind, ImageRecord, IngestError};
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const IMAGE_PROMPT: &str = "Describe this image in detail:\n\
1. What kind of content is it? (diagram, photo of a person, table, screenshot, etc.)\n\
2. If it is a diagram: which architecture or process does it show?\n\
3. If it is a person: describe the visible characteristics\n\
4. If it is a table: what information does it hold?\n\
5. Any text visible in the image\n\
Be specific and concise.";

const DOCUMENT_PROMPT: &str = r#"Analyze this PDF document and return ONLY valid JSON (no markdown, no explanations).

The JSON must have this structure:
{
    "pages": [
        {
            "page_number": 1,
            "text_content": "full text of the page",
            "images": [
                {
                    "position": "top/middle/bottom",
                    "description": "description of the image",
                    "related_text": "related text if any"
                }
            ]
        }
    ],
    "people": [
        {
            "name": "name if mentioned",
            "page": 1,
            "role": "position/role",
            "image_description": "visual description"
        }
    ],
    "diagrams": [
        {
            "page": 1,
            "type": "architecture/flow/table",
            "description": "what it shows"
        }
    ]
}

IMPORTANT: answer ONLY with the JSON, without ```json``` fences or any extra text."#;

pub struct ImageAnalyzer<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> ImageAnalyzer<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Describes one image. Failures become the description instead of
    /// aborting the batch.
    pub async fn analyze(&self, image: &ImageRecord) -> ImageRecord {
        let (description, kind) = match self.describe(Path::new(&image.path)).await {
            Ok(description) => {
                info!(file = %image.filename, "image analyzed");
                let kind = ImageKind::classify(&description);
                (description, kind)
            }
            Err(error) => {
                warn!(file = %image.filename, %error, "image analysis failed");
                (format!("analysis failed: {error}"), ImageKind::Unknown)
            }
        };

        ImageRecord {
            kind,
            description,
            analyzed: true,
            ..image.clone()
        }
    }

    pub async fn analyze_all(&self, images: &[ImageRecord]) -> Vec<ImageRecord> {
        let mut analyzed = Vec::with_capacity(images.len());
        for image in images {
            analyzed.push(self.analyze(image).await);
        }
        analyzed
    }

    async fn describe(&self, path: &Path) -> Result<String, IngestError> {
        let data = tokio::fs::read(path).await?;
        let description = self
            .generator
            .generate(vec![
                ContentPart::InlineData {
                    mime_type: mime_type_for(path).to_string(),
                    data,
                },
                ContentPart::Text(IMAGE_PROMPT.to_string()),
            ])
            .await?;
        Ok(description.trim().to_string())
    }
}

/// Removes a surrounding Markdown code fence, if any.
pub fn strip_code_fence(response: &str) -> Result<String, IngestError> {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return Ok(trimmed.to_string());
    }
    let opening = Regex::new(r"^```(?:json)?\n?")?;
    let closing = Regex::new(r"\n?```$")?;
    let without_open = opening.replace(trimmed, "");
    Ok(closing.replace(&without_open, "").trim().to_string())
}

/// Parses the model's answer. An unparseable answer is written to the raw
/// response file and reported as [`AnalysisReport::Failed`].
pub fn parse_analysis_response(
    response: &str,
    layout: &ArtifactLayout,
) -> Result<AnalysisReport, IngestError> {
    let cleaned = strip_code_fence(response)?;

    match serde_json::from_str::<DocumentAnalysis>(&cleaned) {
        Ok(analysis) => Ok(AnalysisReport::Complete(analysis)),
        Err(error) => {
            let raw_path = layout.raw_analysis_response();
            warn!(%error, path = %raw_path.display(), "analysis response is not valid json, saving raw text");
            if let Some(parent) = raw_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&raw_path, &cleaned)?;
            Ok(AnalysisReport::Failed {
                error: format!("could not parse response as json: {error}"),
                raw_text: cleaned,
            })
        }
    }
}

pub struct DocumentAnalyzer<'a> {
    generator: &'a dyn TextGenerator,
    layout: &'a ArtifactLayout,
}

impl<'a> DocumentAnalyzer<'a> {
    pub fn new(generator: &'a dyn TextGenerator, layout: &'a ArtifactLayout) -> Self {
        Self { generator, layout }
    }

    pub async fn analyze(&self, pdf_path: &Path) -> Result<AnalysisArtifact, IngestError> {
        let pdf = tokio::fs::read(pdf_path).await?;
        let response = self
            .generator
            .generate(vec![
                ContentPart::InlineData {
                    mime_type: "application/pdf".to_string(),
                    data: pdf,
                },
                ContentPart::Text(DOCUMENT_PROMPT.to_string()),
            ])
            .await?;

        let report = parse_analysis_response(&response, self.layout)?;
        if let Some(analysis) = report.analysis() {
            info!(
                pages = analysis.pages.len(),
                people = analysis.people.len(),
                diagrams = analysis.diagrams.len(),
                "document analyzed"
            );
        }

        Ok(AnalysisArtifact {
            complete_analysis: report,
            source: pdf_path.to_string_lossy().to_string(),
        })
    }
}
