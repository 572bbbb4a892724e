use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DefaultOnNull};

/// Metadata key whose presence marks an element or chunk as a table.
pub const TEXT_AS_HTML_KEY: &str = "text_as_html";

/// Summary written in place of an LLM summary when enrichment is skipped.
pub const SKIPPED_SUMMARY: &str = "No summary available (enrichment skipped)";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ElementKind {
    Title,
    NarrativeText,
    ListItem,
    Table,
    PageBreak,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElementMetadata {
    pub filename: Option<String>,
    pub file_directory: Option<String>,
    pub filetype: Option<String>,
    pub page_number: Option<u32>,
    pub text_as_html: Option<String>,
}

impl ElementMetadata {
    /// Dictionary view of the metadata. Absent values are omitted, so the
    /// table key only shows up for table content.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(filename) = &self.filename {
            map.insert("filename".to_string(), Value::from(filename.as_str()));
        }
        if let Some(directory) = &self.file_directory {
            map.insert("file_directory".to_string(), Value::from(directory.as_str()));
        }
        if let Some(filetype) = &self.filetype {
            map.insert("filetype".to_string(), Value::from(filetype.as_str()));
        }
        if let Some(page) = self.page_number {
            map.insert("page_number".to_string(), Value::from(page));
        }
        if let Some(html) = &self.text_as_html {
            map.insert(TEXT_AS_HTML_KEY.to_string(), Value::from(html.as_str()));
        }
        map
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceElement {
    pub element_id: String,
    pub kind: ElementKind,
    pub text: String,
    pub metadata: ElementMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ElementMetadata,
}

impl Chunk {
    pub fn is_table(&self) -> bool {
        self.metadata.to_map().contains_key(TEXT_AS_HTML_KEY)
    }

    /// The table rendering for table chunks, the plain text otherwise.
    pub fn enrichment_content(&self) -> &str {
        match &self.metadata.text_as_html {
            Some(html) => html,
            None => &self.text,
        }
    }
}

/// LLM-derived metadata for one chunk. Missing keys default so that partial
/// mappings still decode.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enrichment {
    #[serde(default)]
    pub summary: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub hypothetical_questions: Vec<String>,
    #[serde(default)]
    pub table_summary: Option<String>,
}

impl Enrichment {
    pub fn skipped() -> Self {
        Self {
            summary: SKIPPED_SUMMARY.to_string(),
            keywords: Vec::new(),
            hypothetical_questions: Vec::new(),
            table_summary: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.summary == SKIPPED_SUMMARY
    }
}

/// Outcome of enriching one chunk. `enrichment == None` marks a failed call.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResult {
    pub chunk_id: String,
    pub enrichment: Option<Enrichment>,
}

impl EnrichmentResult {
    pub fn enriched(chunk_id: impl Into<String>, enrichment: Enrichment) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            enrichment: Some(enrichment),
        }
    }

    pub fn failed(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            enrichment: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.enrichment.is_none()
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichedRecord {
    pub source: String,
    pub content: String,
    pub is_table: bool,
    #[serde(default)]
    pub summary: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub hypothetical_questions: Vec<String>,
    #[serde(default)]
    pub table_summary: Option<String>,
}

impl EnrichedRecord {
    pub fn from_parts(source: String, chunk: &Chunk, enrichment: Enrichment) -> Self {
        Self {
            source,
            content: chunk.enrichment_content().to_string(),
            is_table: chunk.is_table(),
            summary: enrichment.summary,
            keywords: enrichment.keywords,
            hypothetical_questions: enrichment.hypothetical_questions,
            table_summary: enrichment.table_summary,
        }
    }
}
