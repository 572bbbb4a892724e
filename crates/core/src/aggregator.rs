use crate::error::StoreError;
use crate::models::{Chunk, EnrichedRecord, Enrichment, EnrichmentResult};
use crate::store::RecordStore;
use std::collections::HashMap;
use std::path::{Component, Path};
use tracing::{debug, info};

/// What happens to a chunk whose enrichment failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailedEnrichmentPolicy {
    /// The chunk is left out of the persisted collection.
    #[default]
    Drop,
    /// The chunk is persisted with the skipped-enrichment placeholder fields.
    Placeholder,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub append: bool,
    pub on_failed_enrichment: FailedEnrichmentPolicy,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            append: true,
            on_failed_enrichment: FailedEnrichmentPolicy::Drop,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Prior records (when appending) followed by this run's records.
    pub records: Vec<EnrichedRecord>,
    pub new_records: usize,
    pub failed_chunks: usize,
}

/// Short label for a filing, normally `<filing-type>/<accession>` for files laid
/// out as `<entity>/<filing-type>/<accession>/<file>` under `filings_root`.
pub fn derive_source_label(file_path: &Path, filings_root: &Path) -> String {
    let parts = match file_path.strip_prefix(filings_root) {
        Ok(relative) => path_segments(relative),
        Err(_) => path_segments(file_path),
    };

    match parts.len() {
        0 => file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.to_string_lossy().to_string()),
        1 => parts[0].clone(),
        2 => parts.join("/"),
        _ => parts[1..3].join("/"),
    }
}

fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::CurDir => None,
            Component::RootDir => Some("/".to_string()),
            Component::ParentDir => Some("..".to_string()),
            Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().to_string()),
            Component::Normal(segment) => Some(segment.to_string_lossy().to_string()),
        })
        .collect()
}

/// Merges chunks with their enrichment results, folds them into the stored
/// collection at `output` and writes the combined collection back.
pub fn aggregate<S>(
    store: &S,
    source_file: &Path,
    chunks: &[Chunk],
    results: &[EnrichmentResult],
    output: &Path,
    filings_root: &Path,
    options: &AggregateOptions,
) -> Result<Aggregation, StoreError>
where
    S: RecordStore + ?Sized,
{
    let mut records = if options.append {
        store.load(output)?.unwrap_or_default()
    } else {
        Vec::new()
    };

    let by_chunk: HashMap<&str, Option<&Enrichment>> = results
        .iter()
        .map(|result| (result.chunk_id.as_str(), result.enrichment.as_ref()))
        .collect();
    let source = derive_source_label(source_file, filings_root);

    let mut new_records = 0;
    let mut failed_chunks = 0;
    for chunk in chunks {
        let enrichment = match by_chunk.get(chunk.chunk_id.as_str()).copied().flatten() {
            Some(enrichment) => enrichment.clone(),
            None => {
                failed_chunks += 1;
                match options.on_failed_enrichment {
                    FailedEnrichmentPolicy::Drop => {
                        debug!(chunk_id = %chunk.chunk_id, "dropping chunk without enrichment");
                        continue;
                    }
                    FailedEnrichmentPolicy::Placeholder => Enrichment::skipped(),
                }
            }
        };

        records.push(EnrichedRecord::from_parts(source.clone(), chunk, enrichment));
        new_records += 1;
    }

    store.store(output, &records)?;

    info!(
        source_file = %source_file.display(),
        output = %output.display(),
        new_records,
        failed_chunks,
        total = records.len(),
        "persisted enriched chunks"
    );

    Ok(Aggregation {
        records,
        new_records,
        failed_chunks,
    })
}
