use crate::aggregator::{aggregate, AggregateOptions, FailedEnrichmentPolicy};
use crate::chunking::{chunk_by_title, TitleChunkingConfig};
use crate::embeddings::{embed_and_upsert, Embedder};
use crate::enrichment::Enricher;
use crate::ingest::{parse_path, SkippedFile};
use crate::parser::DocumentParser;
use crate::store::RecordStore;
use crate::traits::{TableSink, VectorSink};
use crate::{EnrichedRecord, PipelineError, SinkError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TableInput {
    pub csv_path: PathBuf,
    pub table_name: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target: PathBuf,
    pub output: PathBuf,
    pub filings_root: PathBuf,
    /// Applies to the first file written in a run. Later files always append.
    pub append: bool,
    pub on_failed_enrichment: FailedEnrichmentPolicy,
    pub chunking: TitleChunkingConfig,
    pub table_input: Option<TableInput>,
}

impl PipelineConfig {
    /// Defaults `filings_root` to the target itself, or its parent when the
    /// target is a single file.
    pub fn new(target: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let filings_root = if target.is_file() {
            target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            target.clone()
        };

        Self {
            target,
            output: output.into(),
            filings_root,
            append: true,
            on_failed_enrichment: FailedEnrichmentPolicy::default(),
            chunking: TitleChunkingConfig::default(),
            table_input: None,
        }
    }
}

/// Every collaborator a run needs. Built once by the caller.
pub struct PipelineContext {
    pub parser: Arc<dyn DocumentParser>,
    pub enricher: Enricher,
    pub store: Arc<dyn RecordStore>,
    pub embedder: Arc<dyn Embedder>,
    pub vector_sink: Option<Arc<dyn VectorSink>>,
    pub table_sink: Option<Arc<dyn TableSink>>,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_parsed: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub chunks: usize,
    pub enriched: usize,
    pub failed_enrichments: usize,
    pub records_total: usize,
    pub vectors_upserted: usize,
    pub table_loaded: Option<usize>,
}

impl PipelineReport {
    fn started() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            files_parsed: 0,
            skipped_files: Vec::new(),
            chunks: 0,
            enriched: 0,
            failed_enrichments: 0,
            records_total: 0,
            vectors_upserted: 0,
            table_loaded: None,
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}

pub struct IngestionPipeline {
    context: PipelineContext,
}

impl IngestionPipeline {
    pub fn new(context: PipelineContext) -> Self {
        Self { context }
    }

    pub async fn run(&self, config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::started();
        info!(run_id = %report.run_id, target = %config.target.display(), "ingestion run started");

        let parsed = parse_path(self.context.parser.as_ref(), &config.target)?;
        report.files_parsed = parsed.documents.len();
        report.skipped_files = parsed.skipped_files.clone();

        if parsed.element_count() == 0 {
            warn!(target = %config.target.display(), "no elements were parsed, nothing to chunk");
            return Ok(report.finish());
        }
        info!(
            elements = parsed.element_count(),
            files = parsed.documents.len(),
            "parsed target"
        );

        let mut collection: Option<Vec<EnrichedRecord>> = None;
        for document in &parsed.documents {
            let source_path = document.path.to_string_lossy();
            let chunks = chunk_by_title(&document.elements, &config.chunking, &source_path)?;
            if chunks.is_empty() {
                continue;
            }

            let results = self.context.enricher.enrich(&chunks).await;
            let failed = results.iter().filter(|result| result.is_failed()).count();
            report.chunks += chunks.len();
            report.failed_enrichments += failed;
            report.enriched += results.len() - failed;

            let options = AggregateOptions {
                append: collection.is_some() || config.append,
                on_failed_enrichment: config.on_failed_enrichment,
            };
            let aggregation = aggregate(
                self.context.store.as_ref(),
                &document.path,
                &chunks,
                &results,
                &config.output,
                &config.filings_root,
                &options,
            )?;
            report.records_total = aggregation.records.len();
            collection = Some(aggregation.records);
        }

        // A replace run that produced no chunks still clears the prior collection.
        if collection.is_none() && !config.append {
            let options = AggregateOptions {
                append: false,
                on_failed_enrichment: config.on_failed_enrichment,
            };
            let aggregation = aggregate(
                self.context.store.as_ref(),
                &config.target,
                &[],
                &[],
                &config.output,
                &config.filings_root,
                &options,
            )?;
            report.records_total = aggregation.records.len();
        }

        if let (Some(records), Some(sink)) = (&collection, &self.context.vector_sink) {
            report.vectors_upserted =
                embed_and_upsert(self.context.embedder.as_ref(), sink.as_ref(), records).await?;
        }

        if let Some(input) = &config.table_input {
            report.table_loaded = self.load_table(input).await?;
        }

        let report = report.finish();
        info!(
            run_id = %report.run_id,
            chunks = report.chunks,
            enriched = report.enriched,
            failed = report.failed_enrichments,
            records = report.records_total,
            vectors = report.vectors_upserted,
            "ingestion run finished"
        );
        Ok(report)
    }

    /// Loads one CSV file through the table sink. `Ok(None)` when no table
    /// sink is configured.
    pub async fn load_table(&self, input: &TableInput) -> Result<Option<usize>, SinkError> {
        let Some(sink) = self.context.table_sink.clone() else {
            warn!(csv = %input.csv_path.display(), "no table sink configured, skipping table load");
            return Ok(None);
        };

        let input = input.clone();
        let rows = tokio::task::spawn_blocking(move || {
            sink.load_table(&input.csv_path, &input.table_name)
        })
        .await
        .map_err(|error| SinkError::Request(format!("table load task failed: {error}")))??;
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::enrichment::{EnricherConfig, EnrichmentMode};
    use crate::llm::MetadataGenerator;
    use crate::models::Enrichment;
    use crate::parser::FilingParser;
    use crate::store::JsonFileStore;
    use crate::EnrichError;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Fails for prompts mentioning "guidance", otherwise returns a fixed summary.
    struct FakeGenerator;

    #[async_trait]
    impl MetadataGenerator for FakeGenerator {
        async fn generate(&self, prompt: &str) -> Result<Enrichment, EnrichError> {
            if prompt.contains("guidance") {
                return Err(EnrichError::InvalidResponse("refused".to_string()));
            }
            Ok(Enrichment {
                summary: "Quarterly results summary.".to_string(),
                keywords: vec!["revenue".to_string()],
                hypothetical_questions: vec!["How did revenue change?".to_string()],
                table_summary: None,
            })
        }
    }

    #[derive(Default)]
    struct FakeVectorSink {
        collections: Mutex<Vec<usize>>,
        points: Mutex<Vec<(EnrichedRecord, usize)>>,
    }

    #[async_trait]
    impl VectorSink for FakeVectorSink {
        async fn ensure_collection(&self, vector_size: usize) -> Result<(), SinkError> {
            self.collections.lock().unwrap().push(vector_size);
            Ok(())
        }

        async fn upsert_records(
            &self,
            records: &[EnrichedRecord],
            vectors: &[Vec<f32>],
        ) -> Result<(), SinkError> {
            let mut points = self.points.lock().unwrap();
            points.clear();
            points.extend(
                records
                    .iter()
                    .cloned()
                    .zip(vectors.iter().map(Vec::len)),
            );
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTableSink {
        loads: Mutex<Vec<(PathBuf, String)>>,
    }

    impl TableSink for FakeTableSink {
        fn load_table(&self, csv_path: &Path, table_name: &str) -> Result<usize, SinkError> {
            self.loads
                .lock()
                .unwrap()
                .push((csv_path.to_path_buf(), table_name.to_string()));
            Ok(3)
        }
    }

    fn context(
        enricher: Enricher,
        vector_sink: Option<Arc<FakeVectorSink>>,
        table_sink: Option<Arc<FakeTableSink>>,
    ) -> PipelineContext {
        PipelineContext {
            parser: Arc::new(FilingParser::new().unwrap()),
            enricher,
            store: Arc::new(JsonFileStore::new()),
            embedder: Arc::new(CharacterNgramEmbedder { dimensions: 16 }),
            vector_sink: vector_sink.map(|sink| sink as Arc<dyn VectorSink>),
            table_sink: table_sink.map(|sink| sink as Arc<dyn TableSink>),
        }
    }

    fn llm_enricher() -> Enricher {
        Enricher::new(
            EnrichmentMode::Llm(Arc::new(FakeGenerator)),
            EnricherConfig::default(),
        )
    }

    fn write_filing(root: &Path, accession: &str, body: &str) -> PathBuf {
        let path = root
            .join("MSFT")
            .join("8-K")
            .join(accession)
            .join("full-submission.txt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn run_persists_labelled_records_and_forwards_them() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("sec-edgar-filings");
        write_filing(
            &root,
            "0001",
            "Results of Operations\n\nRevenue increased by ten percent over the prior year.",
        );
        let output = dir.path().join("enriched_chunks.json");
        let sink = Arc::new(FakeVectorSink::default());
        let pipeline = IngestionPipeline::new(context(llm_enricher(), Some(sink.clone()), None));

        let report = pipeline
            .run(&PipelineConfig::new(&root, &output))
            .await
            .unwrap();

        assert_eq!(report.files_parsed, 1);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.enriched, 1);
        assert_eq!(report.records_total, 1);
        assert_eq!(report.vectors_upserted, 1);
        assert!(report.finished_at >= report.started_at);

        let stored: Vec<EnrichedRecord> =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(stored[0].source, "8-K/0001");
        assert_eq!(stored[0].summary, "Quarterly results summary.");

        assert_eq!(*sink.collections.lock().unwrap(), vec![16]);
        let points = sink.points.lock().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].0, stored[0]);
        assert_eq!(points[0].1, 16);
    }

    #[tokio::test]
    async fn failed_enrichments_are_counted_and_dropped() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("filings");
        write_filing(
            &root,
            "0001",
            "Results of Operations\n\nRevenue increased by ten percent over the prior year.\n\n\
             \u{000c}Outlook\n\nManagement withdrew its guidance for the coming year.",
        );
        let output = dir.path().join("enriched_chunks.json");
        let pipeline = IngestionPipeline::new(context(llm_enricher(), None, None));
        let mut config = PipelineConfig::new(&root, &output);
        config.chunking.combine_text_under_n_chars = 0;

        let report = pipeline.run(&config).await.unwrap();

        assert_eq!(report.chunks, 2);
        assert_eq!(report.enriched, 1);
        assert_eq!(report.failed_enrichments, 1);
        assert_eq!(report.records_total, 1);
        assert_eq!(report.vectors_upserted, 0);
    }

    #[tokio::test]
    async fn empty_target_returns_an_empty_report() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("filings");
        fs::create_dir_all(&root).unwrap();
        let output = dir.path().join("enriched_chunks.json");
        let sink = Arc::new(FakeVectorSink::default());
        let pipeline = IngestionPipeline::new(context(llm_enricher(), Some(sink.clone()), None));

        let report = pipeline
            .run(&PipelineConfig::new(&root, &output))
            .await
            .unwrap();

        assert_eq!(report.files_parsed, 0);
        assert_eq!(report.records_total, 0);
        assert!(!output.exists());
        assert!(sink.collections.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_target_is_a_pipeline_error() {
        let dir = tempdir().unwrap();
        let pipeline = IngestionPipeline::new(context(Enricher::skipping(), None, None));

        let result = pipeline
            .run(&PipelineConfig::new(
                dir.path().join("absent"),
                dir.path().join("out.json"),
            ))
            .await;

        assert!(matches!(result, Err(PipelineError::Ingest(_))));
    }

    #[tokio::test]
    async fn replace_mode_discards_prior_runs_but_accumulates_within_a_run() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("filings");
        write_filing(&root, "0001", "First filing body text for the quarter.");
        write_filing(&root, "0002", "Second filing body text for the quarter.");
        let output = dir.path().join("enriched_chunks.json");
        let pipeline = IngestionPipeline::new(context(Enricher::skipping(), None, None));
        let mut config = PipelineConfig::new(&root, &output);

        pipeline.run(&config).await.unwrap();
        let appended = pipeline.run(&config).await.unwrap();
        assert_eq!(appended.records_total, 4);

        config.append = false;
        let replaced = pipeline.run(&config).await.unwrap();
        assert_eq!(replaced.records_total, 2);

        let stored: Vec<EnrichedRecord> =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        let sources: Vec<&str> = stored.iter().map(|record| record.source.as_str()).collect();
        assert_eq!(sources, vec!["8-K/0001", "8-K/0002"]);
        assert!(stored.iter().all(|record| record.keywords.is_empty()));
    }

    #[tokio::test]
    async fn table_input_goes_through_the_table_sink() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("filings");
        write_filing(&root, "0001", "Revenue increased by ten percent over the prior year.");
        let csv_path = dir.path().join("revenue_summary.csv");
        let table_sink = Arc::new(FakeTableSink::default());
        let pipeline = IngestionPipeline::new(context(
            Enricher::skipping(),
            None,
            Some(table_sink.clone()),
        ));
        let mut config = PipelineConfig::new(&root, dir.path().join("out.json"));
        config.table_input = Some(TableInput {
            csv_path: csv_path.clone(),
            table_name: "revenue_summary".to_string(),
        });

        let report = pipeline.run(&config).await.unwrap();

        assert_eq!(report.table_loaded, Some(3));
        assert_eq!(
            *table_sink.loads.lock().unwrap(),
            vec![(csv_path, "revenue_summary".to_string())]
        );
    }

    #[tokio::test]
    async fn replace_run_without_chunks_clears_the_collection() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("filings");
        write_filing(&root, "0001", "Revenue increased by ten percent over the prior year.");
        let output = dir.path().join("enriched_chunks.json");
        let pipeline = IngestionPipeline::new(context(Enricher::skipping(), None, None));

        let first = pipeline.run(&PipelineConfig::new(&root, &output)).await.unwrap();
        assert_eq!(first.records_total, 1);

        write_filing(&root, "0001", "\u{000c}\u{000c}");
        let mut config = PipelineConfig::new(&root, &output);
        config.append = false;
        let replaced = pipeline.run(&config).await.unwrap();

        assert_eq!(replaced.chunks, 0);
        assert_eq!(replaced.records_total, 0);
        let stored: Vec<EnrichedRecord> =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert!(stored.is_empty());
    }
}
