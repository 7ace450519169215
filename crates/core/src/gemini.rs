//! Thin client for the Gemini `generativelanguage` REST API.
//!
//! Only the three calls the pipeline needs are wrapped: single and batched
//! embeddings, and content generation with optional inline binary parts.
//! Requests are sent once; failures are returned to the caller untouched.

use crate::traits::{ContentPart, EmbeddingTask, TextGenerator};
use crate::LlmError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-pro";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    endpoint: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
    #[serde(rename = "taskType")]
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    fn method_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.endpoint, bare_model(model), method)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        model: &str,
        method: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let response = self
            .client
            .post(self.method_url(model, method))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                model: bare_model(model).to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn embed_content(
        &self,
        model: &str,
        text: &str,
        task: EmbeddingTask,
    ) -> Result<Vec<f32>, LlmError> {
        let request = embed_request(model, text, task);
        let response: EmbedResponse = self.post(model, "embedContent", &request).await?;
        Ok(response.embedding.values)
    }

    pub async fn batch_embed_contents(
        &self,
        model: &str,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| embed_request(model, text, task))
                .collect(),
        };
        let response: BatchEmbedResponse =
            self.post(model, "batchEmbedContents", &request).await?;
        Ok(response
            .embeddings
            .into_iter()
            .map(|embedding| embedding.values)
            .collect())
    }

    pub async fn generate_content(
        &self,
        model: &str,
        parts: Vec<ContentPart>,
    ) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: parts.into_iter().map(to_wire_part).collect(),
            }],
        };
        debug!(model, "gemini generateContent");
        let response: GenerateResponse = self.post(model, "generateContent", &request).await?;
        candidate_text(response).ok_or_else(|| LlmError::EmptyResponse {
            model: bare_model(model).to_string(),
        })
    }
}

fn bare_model(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

fn embed_request(model: &str, text: &str, task: EmbeddingTask) -> EmbedRequest {
    EmbedRequest {
        model: format!("models/{}", bare_model(model)),
        content: Content {
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        },
        task_type: task.as_api_str(),
    }
}

fn to_wire_part(part: ContentPart) -> Part {
    match part {
        ContentPart::Text(text) => Part {
            text: Some(text),
            inline_data: None,
        },
        ContentPart::InlineData { mime_type, data } => Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type,
                data: STANDARD.encode(data),
            }),
        },
    }
}

fn candidate_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text = content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// `TextGenerator` backed by one Gemini model.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: GeminiClient,
    model: String,
}

impl GeminiGenerator {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, parts: Vec<ContentPart>) -> Result<String, LlmError> {
        self.client.generate_content(&self.model, parts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_url_strips_models_prefix() {
        let client = GeminiClient::new("https://example.test/v1beta/", "key");
        assert_eq!(
            client.method_url("models/text-embedding-004", "embedContent"),
            "https://example.test/v1beta/models/text-embedding-004:embedContent"
        );
    }

    #[test]
    fn embed_request_uses_api_field_names() {
        let request = embed_request("text-embedding-004", "hola", EmbeddingTask::RetrievalQuery);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "models/text-embedding-004",
                "content": { "parts": [{ "text": "hola" }] },
                "taskType": "RETRIEVAL_QUERY"
            })
        );
    }

    #[test]
    fn inline_parts_are_base64_encoded() {
        let part = to_wire_part(ContentPart::InlineData {
            mime_type: "image/png".to_string(),
            data: b"abc".to_vec(),
        });
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(
            value,
            json!({ "inline_data": { "mime_type": "image/png", "data": "YWJj" } })
        );
    }

    #[test]
    fn candidate_text_joins_parts_of_first_candidate() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(candidate_text(response).as_deref(), Some("Hello world"));
    }

    #[test]
    fn missing_candidates_yield_none() {
        let response: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert!(candidate_text(response).is_none());
    }
}
