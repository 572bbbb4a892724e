use crate::error::EnrichError;
use crate::models::Enrichment;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use serde_with::{serde_as, DefaultOnNull};
use url::Url;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:1.5b";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-lite";

/// One structured-metadata call against a language model.
#[async_trait]
pub trait MetadataGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Enrichment, EnrichError>;
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct StrictEnrichment {
    summary: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    keywords: Vec<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    hypothetical_questions: Vec<String>,
    #[serde(default)]
    table_summary: Option<String>,
}

/// Decodes a model reply. `summary`, `keywords` and `hypothetical_questions`
/// must be present; a missing `table_summary` is treated as null.
pub fn parse_enrichment_json(text: &str) -> Result<Enrichment, EnrichError> {
    let parsed: StrictEnrichment = serde_json::from_str(text.trim())
        .map_err(|error| EnrichError::InvalidResponse(format!("{error}: {}", preview(text))))?;

    Ok(Enrichment {
        summary: parsed.summary,
        keywords: parsed.keywords,
        hypothetical_questions: parsed.hypothetical_questions,
        table_summary: parsed.table_summary,
    })
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

fn example_structure() -> Value {
    json!({
        "summary": "A concise 1-2 sentence summary of the chunk.",
        "keywords": ["keyword1", "keyword2", "keyword3"],
        "hypothetical_questions": ["Question 1?", "Question 2?", "Question 3?"],
        "table_summary": "Summary of table data or null if not a table"
    })
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "summary": {"type": "STRING"},
            "keywords": {"type": "ARRAY", "items": {"type": "STRING"}},
            "hypothetical_questions": {"type": "ARRAY", "items": {"type": "STRING"}},
            "table_summary": {"type": "STRING", "nullable": true}
        },
        "required": ["summary", "keywords", "hypothetical_questions"]
    })
}

async fn error_for_status(
    backend: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, EnrichError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(EnrichError::BackendResponse {
        backend: backend.to_string(),
        status,
        body,
    })
}

pub struct OllamaGenerator {
    client: Client,
    host: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(host: &str, model: impl Into<String>) -> Result<Self, EnrichError> {
        Url::parse(host)?;
        Ok(Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[async_trait]
impl MetadataGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<Enrichment, EnrichError> {
        let structure = serde_json::to_string_pretty(&example_structure())
            .map_err(|error| EnrichError::InvalidResponse(error.to_string()))?;
        let full_prompt = format!(
            "{prompt}\n\nRespond strictly in JSON format. The output must be a single JSON object matching this structure:\n{structure}"
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": full_prompt}],
                "format": "json",
                "stream": false,
            }))
            .send()
            .await?;

        let reply: OllamaChatResponse = error_for_status("ollama", response).await?.json().await?;
        parse_enrichment_json(&reply.message.content)
    }
}

pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, EnrichError> {
        Url::parse(base_url)?;
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }
}

#[async_trait]
impl MetadataGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<Enrichment, EnrichError> {
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": response_schema(),
                }
            }))
            .send()
            .await?;

        let parsed: Value = error_for_status("gemini", response).await?.json().await?;
        let text = parsed
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EnrichError::InvalidResponse("gemini response has no candidate text".to_string())
            })?;

        parse_enrichment_json(text)
    }
}
