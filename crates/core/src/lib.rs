pub mod aggregator;
pub mod chunking;
pub mod embeddings;
pub mod enrichment;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod stores;
pub mod traits;

pub use aggregator::{
    aggregate, derive_source_label, AggregateOptions, Aggregation, FailedEnrichmentPolicy,
};
pub use chunking::{chunk_by_title, normalize_whitespace, TitleChunkingConfig};
pub use embeddings::{
    embed_and_upsert, embedding_input, CharacterNgramEmbedder, Embedder, OllamaEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_OLLAMA_EMBED_MODEL, EMBEDDING_CONTENT_CAP,
};
pub use enrichment::{
    build_enrichment_prompt, truncate_chars, Enricher, EnricherConfig, EnrichmentMode,
};
pub use error::{EnrichError, IngestError, PipelineError, SinkError, StoreError};
pub use ingest::{discover_filing_files, parse_path, ParseReport, ParsedDocument, SkippedFile};
pub use llm::{
    parse_enrichment_json, GeminiGenerator, MetadataGenerator, OllamaGenerator,
    DEFAULT_GEMINI_MODEL, DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL,
};
pub use models::{
    Chunk, ElementKind, ElementMetadata, EnrichedRecord, Enrichment, EnrichmentResult,
    SourceElement, SKIPPED_SUMMARY, TEXT_AS_HTML_KEY,
};
pub use parser::{DocumentParser, FilingParser};
pub use pipeline::{
    IngestionPipeline, PipelineConfig, PipelineContext, PipelineReport, TableInput,
};
pub use store::{JsonFileStore, RecordStore};
pub use stores::{QdrantStore, SqliteTableLoader, DEFAULT_QDRANT_COLLECTION, DEFAULT_SQLITE_PATH};
pub use traits::{TableSink, VectorSink};
