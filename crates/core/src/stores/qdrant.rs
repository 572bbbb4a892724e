use crate::traits::VectorSink;
use crate::{EnrichedRecord, SinkError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::info;
use url::Url;

pub const DEFAULT_QDRANT_COLLECTION: &str = "financial_reports";
const UPSERT_BATCH: usize = 256;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str, collection: impl Into<String>) -> Result<Self, SinkError> {
        Url::parse(endpoint)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn backend_error(status: StatusCode) -> SinkError {
        SinkError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        }
    }

    pub async fn count(&self) -> Result<u64, SinkError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| SinkError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count response has no result.count".to_string(),
            })
    }
}

#[async_trait]
impl VectorSink for QdrantStore {
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), SinkError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status().is_success() {
            let parsed: Value = response.json().await?;
            let existing = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match existing {
                Some(size) if size as usize != vector_size => Err(SinkError::Request(format!(
                    "collection {} stores {size}-dim vectors, not {vector_size}",
                    self.collection
                ))),
                _ => Ok(()),
            };
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        info!(collection = %self.collection, vector_size, "created qdrant collection");
        Ok(())
    }

    async fn upsert_records(
        &self,
        records: &[EnrichedRecord],
        vectors: &[Vec<f32>],
    ) -> Result<(), SinkError> {
        if records.len() != vectors.len() {
            return Err(SinkError::Request(format!(
                "embedding count {} doesn't match record count {}",
                vectors.len(),
                records.len()
            )));
        }

        let vector_size = vectors.first().map(Vec::len).unwrap_or_default();
        let points = records
            .iter()
            .zip(vectors.iter())
            .enumerate()
            .map(|(index, (record, vector))| {
                if vector.len() != vector_size {
                    return Err(SinkError::Request(format!(
                        "embedding dimension {} != {vector_size}",
                        vector.len()
                    )));
                }

                Ok(json!({
                    "id": index as u64,
                    "vector": vector,
                    "payload": record,
                }))
            })
            .collect::<Result<Vec<_>, SinkError>>()?;

        for batch in points.chunks(UPSERT_BATCH) {
            let response = self
                .client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .json(&json!({ "points": batch }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::backend_error(response.status()));
            }
        }

        Ok(())
    }
}
