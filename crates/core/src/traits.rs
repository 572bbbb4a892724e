use crate::{EnrichedRecord, SinkError};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait VectorSink: Send + Sync {
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), SinkError>;

    /// Writes one point per record, keyed by the record's position.
    async fn upsert_records(
        &self,
        records: &[EnrichedRecord],
        vectors: &[Vec<f32>],
    ) -> Result<(), SinkError>;
}

pub trait TableSink: Send + Sync {
    /// Replaces `table_name` with the rows of the CSV file. Returns the row count.
    fn load_table(&self, csv_path: &Path, table_name: &str) -> Result<usize, SinkError>;
}
