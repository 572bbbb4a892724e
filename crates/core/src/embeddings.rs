use crate::error::SinkError;
use crate::models::{EnrichedRecord, SKIPPED_SUMMARY};
use crate::traits::VectorSink;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_OLLAMA_EMBED_MODEL: &str = "nomic-embed-text";
pub const EMBEDDING_CONTENT_CAP: usize = 1_000;
pub const EMBED_BATCH: usize = 32;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SinkError>;
}

/// Text handed to the embedder for one record. Records whose enrichment was
/// skipped embed their content only.
pub fn embedding_input(record: &EnrichedRecord, content_cap: usize) -> String {
    let content: String = record.content.chars().take(content_cap).collect();
    if record.summary == SKIPPED_SUMMARY {
        return format!("Content: {content}");
    }
    format!(
        "Summary: {}\nKeywords: {}\nContent: {content}",
        record.summary,
        record.keywords.join(", ")
    )
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SinkError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

pub struct OllamaEmbedder {
    client: Client,
    host: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(host: &str, model: impl Into<String>) -> Result<Self, SinkError> {
        Url::parse(host)?;
        Ok(Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SinkError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.host))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SinkError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: OllamaEmbedResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(SinkError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    parsed.embeddings.len()
                ),
            });
        }
        Ok(parsed.embeddings)
    }
}

/// Embeds every record in batches of [`EMBED_BATCH`] and upserts record and
/// vector under its position. The collection is sized from the vectors the
/// model returned. Returns the number of points written.
pub async fn embed_and_upsert<E, V>(
    embedder: &E,
    sink: &V,
    records: &[EnrichedRecord],
) -> Result<usize, SinkError>
where
    E: Embedder + ?Sized,
    V: VectorSink + ?Sized,
{
    if records.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = records
        .iter()
        .map(|record| embedding_input(record, EMBEDDING_CONTENT_CAP))
        .collect();

    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH) {
        vectors.extend(embedder.embed_batch(batch).await?);
    }
    if vectors.len() != records.len() {
        return Err(SinkError::Request(format!(
            "embedder returned {} vectors for {} records",
            vectors.len(),
            records.len()
        )));
    }

    let dimensions = vectors[0].len();
    if dimensions == 0 {
        return Err(SinkError::Request("embedder returned empty vectors".to_string()));
    }
    if let Some(position) = vectors.iter().position(|vector| vector.len() != dimensions) {
        return Err(SinkError::Request(format!(
            "embedding {position} has {} dimensions, expected {dimensions}",
            vectors[position].len()
        )));
    }

    sink.ensure_collection(dimensions).await?;
    sink.upsert_records(records, &vectors).await?;

    info!(points = records.len(), dimensions, "upserted record vectors");
    Ok(records.len())
}
