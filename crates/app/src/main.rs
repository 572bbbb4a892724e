use anyhow::{bail, Context};
use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use chrono::Utc;
use filing_ingest_core::enrichment::{DEFAULT_CONCURRENCY, DEFAULT_MAX_CONTENT_CHARS};
use filing_ingest_core::{
    CharacterNgramEmbedder, Embedder, Enricher, EnricherConfig, EnrichmentMode,
    FailedEnrichmentPolicy, FilingParser, GeminiGenerator, IngestionPipeline, JsonFileStore,
    MetadataGenerator, OllamaEmbedder, OllamaGenerator, PipelineConfig, PipelineContext,
    QdrantStore, SqliteTableLoader, TableInput, TableSink, VectorSink,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_GEMINI_MODEL, DEFAULT_OLLAMA_EMBED_MODEL,
    DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL, DEFAULT_QDRANT_COLLECTION, DEFAULT_SQLITE_PATH,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "filing-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, chunk, enrich and persist filings, then forward them to the vector store.
    Ingest(IngestArgs),
    /// Load a CSV file into the relational store.
    LoadTable(LoadTableArgs),
}

#[derive(Args)]
struct IngestArgs {
    /// File or folder of filings to ingest.
    #[arg(long, env = "TARGET_FILE_LOCATION")]
    target: PathBuf,

    /// JSON file holding the enriched chunk collection.
    #[arg(long, env = "ENRICHED_CHUNKS_PATH", default_value = "enriched_chunks.json")]
    output: PathBuf,

    /// Root that source labels are derived against. Defaults to the target.
    #[arg(long, env = "FILINGS_ROOT")]
    filings_root: Option<PathBuf>,

    /// Store every chunk with placeholder metadata instead of calling the LLM.
    #[arg(long, env = "SKIP_ENRICHMENT", value_parser = FalseyValueParser::new())]
    skip_enrichment: bool,

    /// Replace the stored collection instead of appending to it.
    #[arg(long, env = "REPLACE_ENRICHED_CHUNKS", value_parser = FalseyValueParser::new())]
    replace: bool,

    #[arg(long, env = "FAILED_ENRICHMENT_POLICY", value_enum, default_value = "drop")]
    failed_enrichment_policy: FailedPolicyArg,

    #[command(flatten)]
    llm: LlmArgs,

    #[command(flatten)]
    vectors: VectorArgs,

    /// CSV file to load into the relational store after ingestion.
    #[arg(long, env = "TABULAR_INPUT_PATH")]
    tabular_input: Option<PathBuf>,

    #[command(flatten)]
    table: TableArgs,
}

#[derive(Args)]
struct LoadTableArgs {
    /// CSV file to load.
    #[arg(long, env = "TABULAR_INPUT_PATH")]
    csv: PathBuf,

    #[command(flatten)]
    table: TableArgs,
}

#[derive(Args)]
struct LlmArgs {
    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value = "ollama")]
    llm_provider: LlmProvider,

    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST)]
    ollama_host: String,

    #[arg(long, env = "OLLAMA_MODEL", default_value = DEFAULT_OLLAMA_MODEL)]
    ollama_model: String,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Maximum number of LLM calls in flight.
    #[arg(long, env = "ENRICHMENT_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    enrichment_concurrency: usize,

    /// Characters of chunk content sent to the LLM.
    #[arg(long, env = "ENRICHMENT_MAX_CHARS", default_value_t = DEFAULT_MAX_CONTENT_CHARS)]
    enrichment_max_chars: usize,

    /// Per-call timeout; 0 disables it.
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value_t = 120)]
    llm_timeout_secs: u64,
}

#[derive(Args)]
struct VectorArgs {
    #[arg(long, env = "EMBEDDER", value_enum, default_value = "ngram")]
    embedder: EmbedderKind,

    #[arg(long, env = "OLLAMA_EMBED_MODEL", default_value = DEFAULT_OLLAMA_EMBED_MODEL)]
    ollama_embed_model: String,

    /// Vector size of the n-gram embedder. Ollama vectors are sized by the model.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    #[arg(long, env = "QDRANT_COLLECTION", default_value = DEFAULT_QDRANT_COLLECTION)]
    qdrant_collection: String,

    #[arg(long, env = "SKIP_VECTOR_STORE", value_parser = FalseyValueParser::new())]
    skip_vector_store: bool,
}

#[derive(Args)]
struct TableArgs {
    /// Target table. Defaults to the CSV file stem.
    #[arg(long, env = "TABLE_NAME")]
    table_name: Option<String>,

    #[arg(long, env = "SQLITE_PATH", default_value = DEFAULT_SQLITE_PATH)]
    sqlite_path: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum LlmProvider {
    Ollama,
    Gemini,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Ngram,
    Ollama,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailedPolicyArg {
    Drop,
    Placeholder,
}

impl From<FailedPolicyArg> for FailedEnrichmentPolicy {
    fn from(value: FailedPolicyArg) -> Self {
        match value {
            FailedPolicyArg::Drop => Self::Drop,
            FailedPolicyArg::Placeholder => Self::Placeholder,
        }
    }
}

fn load_dotenv() {
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            eprintln!("warning: failed to load .env file: {error}");
        }
    }
}

fn table_input(csv_path: &Path, table: &TableArgs) -> anyhow::Result<TableInput> {
    let table_name = match &table.table_name {
        Some(name) => name.clone(),
        None => csv_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .with_context(|| format!("cannot derive a table name from {}", csv_path.display()))?,
    };

    Ok(TableInput {
        csv_path: csv_path.to_path_buf(),
        table_name,
    })
}

fn build_enricher(skip: bool, llm: &LlmArgs) -> anyhow::Result<Enricher> {
    if skip {
        info!("enrichment disabled, chunks get placeholder metadata");
        return Ok(Enricher::skipping());
    }

    let generator: Arc<dyn MetadataGenerator> = match llm.llm_provider {
        LlmProvider::Ollama => {
            Arc::new(OllamaGenerator::new(&llm.ollama_host, &llm.ollama_model)?)
        }
        LlmProvider::Gemini => {
            let Some(api_key) = &llm.gemini_api_key else {
                bail!("GEMINI_API_KEY is required when LLM_PROVIDER=gemini");
            };
            Arc::new(GeminiGenerator::new(api_key, &llm.gemini_model))
        }
    };

    let config = EnricherConfig {
        max_content_chars: llm.enrichment_max_chars,
        concurrency: llm.enrichment_concurrency,
        request_timeout: (llm.llm_timeout_secs > 0)
            .then(|| Duration::from_secs(llm.llm_timeout_secs)),
        ..EnricherConfig::default()
    };
    Ok(Enricher::new(EnrichmentMode::Llm(generator), config))
}

fn build_context(args: &IngestArgs) -> anyhow::Result<PipelineContext> {
    let embedder: Arc<dyn Embedder> = match args.vectors.embedder {
        EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
            dimensions: args.vectors.embedding_dimensions,
        }),
        EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
            &args.llm.ollama_host,
            &args.vectors.ollama_embed_model,
        )?),
    };

    let vector_sink: Option<Arc<dyn VectorSink>> = if args.vectors.skip_vector_store {
        None
    } else {
        Some(Arc::new(QdrantStore::new(
            &args.vectors.qdrant_url,
            &args.vectors.qdrant_collection,
        )?))
    };

    let table_sink: Option<Arc<dyn TableSink>> = args
        .tabular_input
        .as_ref()
        .map(|_| Arc::new(SqliteTableLoader::new(&args.table.sqlite_path)) as Arc<dyn TableSink>);

    Ok(PipelineContext {
        parser: Arc::new(FilingParser::new()?),
        enricher: build_enricher(args.skip_enrichment, &args.llm)?,
        store: Arc::new(JsonFileStore::new()),
        embedder,
        vector_sink,
        table_sink,
    })
}

async fn ingest(args: IngestArgs) -> anyhow::Result<()> {
    let context = build_context(&args)?;
    let mut config = PipelineConfig::new(&args.target, &args.output);
    if let Some(root) = &args.filings_root {
        config.filings_root = root.clone();
    }
    config.append = !args.replace;
    config.on_failed_enrichment = args.failed_enrichment_policy.into();
    config.table_input = args
        .tabular_input
        .as_deref()
        .map(|csv_path| table_input(csv_path, &args.table))
        .transpose()?;

    let pipeline = IngestionPipeline::new(context);
    let report = pipeline.run(&config).await?;

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
    }

    println!(
        "run {}: {} files, {} chunks, {} enriched, {} failed, {} records in {}",
        report.run_id,
        report.files_parsed,
        report.chunks,
        report.enriched,
        report.failed_enrichments,
        report.records_total,
        args.output.display()
    );
    if report.vectors_upserted > 0 {
        println!("{} vectors upserted", report.vectors_upserted);
    }
    if let (Some(rows), Some(input)) = (report.table_loaded, &config.table_input) {
        println!("{rows} rows loaded into table {}", input.table_name);
    }
    Ok(())
}

fn load_table(args: LoadTableArgs) -> anyhow::Result<()> {
    let input = table_input(&args.csv, &args.table)?;
    let loader = SqliteTableLoader::new(&args.table.sqlite_path);
    let rows = loader.load_table(&input.csv_path, &input.table_name)?;

    println!(
        "{rows} rows loaded into {} ({})",
        input.table_name,
        loader.db_path().display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "filing-ingest boot"
    );

    match cli.command {
        Command::Ingest(args) => ingest(args).await,
        Command::LoadTable(args) => load_table(args),
    }
}
