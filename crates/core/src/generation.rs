use crate::traits::TextGenerator;
use crate::{ImageRecord, LlmError, SearchResult};

pub const NO_CONTEXT_ANSWER: &str = "I could not find relevant information in the document.";

const INSTRUCTIONS: &str = "INSTRUCTIONS:\n\
- Answer based ONLY on the context\n\
- If there are relevant images, mention them\n\
- Be specific and precise\n\
- If you are not certain, say so";

/// Formats retrieved context into a prompt and asks the LLM for an answer.
pub struct AnswerGenerator<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> AnswerGenerator<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    pub async fn answer(
        &self,
        question: &str,
        results: &[SearchResult],
        images: &[ImageRecord],
    ) -> Result<String, LlmError> {
        if results.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }
        let prompt = build_prompt(question, results, images);
        self.generator.generate_text(&prompt).await
    }
}

fn context_text(result: &SearchResult) -> &str {
    if result.metadata.content.is_empty() {
        &result.text
    } else {
        &result.metadata.content
    }
}

pub fn build_prompt(question: &str, results: &[SearchResult], images: &[ImageRecord]) -> String {
    let context = results
        .iter()
        .map(|result| {
            format!(
                "[Hybrid score: {:.2}%]\n{}",
                result.combined_score * 100.0,
                context_text(result)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let mut image_context = String::new();
    if !images.is_empty() {
        image_context.push_str("\n\nRelated images found:\n");
        for image in images {
            let description = if image.description.is_empty() {
                "Image"
            } else {
                image.description.as_str()
            };
            image_context.push_str(&format!("- {} (page {})\n", description, image.page));
        }
    }

    format!(
        "You are an expert assistant analyzing a document.\n\n\
         RETRIEVED CONTEXT (hybrid search):\n{context}{image_context}\n\n\
         QUESTION: {question}\n\n\
         {INSTRUCTIONS}\n\n\
         ANSWER:"
    )
}
