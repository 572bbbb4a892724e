use crate::error::EnrichError;
use crate::llm::MetadataGenerator;
use crate::models::{Chunk, Enrichment, EnrichmentResult};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_EXPERT_ROLE: &str = "financial analyst";
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 3_000;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct EnricherConfig {
    pub max_content_chars: usize,
    pub concurrency: usize,
    pub request_timeout: Option<Duration>,
    pub expert_role: String,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Some(Duration::from_secs(120)),
            expert_role: DEFAULT_EXPERT_ROLE.to_string(),
        }
    }
}

#[derive(Clone)]
pub enum EnrichmentMode {
    Llm(Arc<dyn MetadataGenerator>),
    /// Every chunk gets [`Enrichment::skipped`] and no model is called.
    Skip,
}

pub fn build_enrichment_prompt(content: &str, is_table: bool, expert_role: &str) -> String {
    let table_instruction = if is_table {
        "This chunk is a TABLE. Your summary should describe the main data points and trends."
    } else {
        "This chunk is NOT a table. You MUST set the 'table_summary' field to null."
    };

    format!(
        "You are an expert {expert_role}. Please analyze the following document chunk and generate the specified metadata.\n\
         {table_instruction}\n\
         Chunk Content:\n\
         ---\n\
         {content}\n\
         ---"
    )
}

/// Cuts `text` to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub struct Enricher {
    mode: EnrichmentMode,
    config: EnricherConfig,
}

impl Enricher {
    pub fn new(mode: EnrichmentMode, config: EnricherConfig) -> Self {
        Self { mode, config }
    }

    pub fn skipping() -> Self {
        Self::new(EnrichmentMode::Skip, EnricherConfig::default())
    }

    pub fn is_skipping(&self) -> bool {
        matches!(self.mode, EnrichmentMode::Skip)
    }

    /// Returns one result per chunk, in input order. Failed calls occupy
    /// their position with an empty result.
    pub async fn enrich(&self, chunks: &[Chunk]) -> Vec<EnrichmentResult> {
        let generator = match &self.mode {
            EnrichmentMode::Skip => {
                return chunks
                    .iter()
                    .map(|chunk| EnrichmentResult::enriched(&chunk.chunk_id, Enrichment::skipped()))
                    .collect();
            }
            EnrichmentMode::Llm(generator) => generator.as_ref(),
        };

        stream::iter(chunks)
            .map(|chunk| self.enrich_one(generator, chunk))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    async fn enrich_one(
        &self,
        generator: &dyn MetadataGenerator,
        chunk: &Chunk,
    ) -> EnrichmentResult {
        let is_table = chunk.is_table();
        let content = truncate_chars(chunk.enrichment_content(), self.config.max_content_chars);
        let prompt = build_enrichment_prompt(content, is_table, &self.config.expert_role);

        let call = generator.generate(&prompt);
        let outcome = match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(EnrichError::Timeout(limit))),
            None => call.await,
        };

        match outcome {
            Ok(enrichment) => {
                debug!(chunk_id = %chunk.chunk_id, is_table, "chunk enriched");
                EnrichmentResult::enriched(&chunk.chunk_id, enrichment)
            }
            Err(error) => {
                warn!(chunk_id = %chunk.chunk_id, %error, "chunk enrichment failed");
                EnrichmentResult::failed(&chunk.chunk_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Echoes the chunk body back as the summary. Bodies containing "fail"
    /// error out and bodies starting with "slow" finish last.
    #[derive(Default)]
    struct EchoGenerator {
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    fn body_of(prompt: &str) -> String {
        prompt
            .split("---\n")
            .nth(1)
            .and_then(|rest| rest.split("\n---").next())
            .unwrap_or_default()
            .to_string()
    }

    #[async_trait]
    impl MetadataGenerator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<Enrichment, EnrichError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let body = body_of(prompt);
            if body.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
            if body.contains("fail") {
                return Err(EnrichError::InvalidResponse("forced".to_string()));
            }
            Ok(Enrichment {
                summary: body,
                ..Default::default()
            })
        }
    }

    fn chunk(id: &str, text: &str, html: Option<&str>) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: ElementMetadata {
                text_as_html: html.map(str::to_string),
                ..Default::default()
            },
        }
    }

    fn llm_enricher(generator: Arc<EchoGenerator>, config: EnricherConfig) -> Enricher {
        Enricher::new(EnrichmentMode::Llm(generator), config)
    }

    #[test]
    fn prompt_instructs_null_table_summary_for_text() {
        let prompt = build_enrichment_prompt("body", false, DEFAULT_EXPERT_ROLE);
        assert!(prompt.starts_with("You are an expert financial analyst."));
        assert!(prompt.contains("MUST set the 'table_summary' field to null"));
        assert!(prompt.contains("---\nbody\n---"));

        let table_prompt = build_enrichment_prompt("<table/>", true, DEFAULT_EXPERT_ROLE);
        assert!(table_prompt.contains("This chunk is a TABLE."));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn results_keep_input_order_under_concurrency() {
        let generator = Arc::new(EchoGenerator::default());
        let enricher = llm_enricher(generator.clone(), EnricherConfig::default());
        let chunks = vec![
            chunk("a", "slow first", None),
            chunk("b", "second", None),
            chunk("c", "slow third", None),
            chunk("d", "fourth", None),
            chunk("e", "fifth", None),
        ];

        let results = enricher.enrich(&chunks).await;

        let ids: Vec<_> = results.iter().map(|result| result.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        let summaries: Vec<_> = results
            .iter()
            .map(|result| result.enrichment.as_ref().unwrap().summary.as_str())
            .collect();
        assert_eq!(summaries, vec!["slow first", "second", "slow third", "fourth", "fifth"]);
    }

    #[tokio::test]
    async fn one_failure_keeps_its_position() {
        let generator = Arc::new(EchoGenerator::default());
        let enricher = llm_enricher(generator.clone(), EnricherConfig::default());
        let chunks = vec![
            chunk("a", "ok", None),
            chunk("b", "please fail", None),
            chunk("c", "ok again", None),
        ];

        let results = enricher.enrich(&chunks).await;

        assert_eq!(results.len(), 3);
        assert!(!results[0].is_failed());
        assert!(results[1].is_failed());
        assert_eq!(results[1].chunk_id, "b");
        assert!(!results[2].is_failed());
    }

    #[tokio::test]
    async fn table_html_is_sent_truncated() {
        let generator = Arc::new(EchoGenerator::default());
        let config = EnricherConfig {
            max_content_chars: 7,
            ..Default::default()
        };
        let enricher = llm_enricher(generator.clone(), config);

        let results = enricher
            .enrich(&[chunk("t", "plain", Some("<table>rows</table>"))])
            .await;

        assert_eq!(results[0].enrichment.as_ref().unwrap().summary, "<table>");
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("This chunk is a TABLE."));
    }

    #[tokio::test]
    async fn slow_calls_time_out_as_failures() {
        let generator = Arc::new(EchoGenerator::default());
        let config = EnricherConfig {
            request_timeout: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let enricher = llm_enricher(generator, config);

        let results = enricher.enrich(&[chunk("s", "slow call", None)]).await;

        assert!(results[0].is_failed());
    }

    #[tokio::test]
    async fn skip_mode_never_calls_the_model() {
        let enricher = Enricher::skipping();
        let results = enricher
            .enrich(&[chunk("a", "one", None), chunk("b", "two", None)])
            .await;

        assert!(enricher.is_skipping());
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|result| result.enrichment.as_ref().is_some_and(Enrichment::is_skipped)));
    }

    #[tokio::test]
    async fn empty_input_yields_no_calls() {
        let generator = Arc::new(EchoGenerator::default());
        let enricher = llm_enricher(generator.clone(), EnricherConfig::default());

        assert!(enricher.enrich(&[]).await.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
