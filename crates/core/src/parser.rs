use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::{ElementKind, ElementMetadata, SourceElement};
use lopdf::Document;
use regex::Regex;
use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

const TITLE_MAX_CHARS: usize = 80;
const TITLE_MAX_WORDS: usize = 12;
const BULLETS: [char; 6] = ['•', '·', '▪', '◦', '-', '*'];
const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "head"];
const BLOCK_TAGS: [&str; 15] = [
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "tr", "section", "article",
    "page",
];
const BINARY_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "zip", "xlsx", "xls", "bin"];

pub trait DocumentParser: Send + Sync {
    fn parse_file(&self, path: &Path) -> Result<Vec<SourceElement>, IngestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Html,
    Text,
    Pdf,
}

impl DocumentFormat {
    fn mime(self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Text => "text/plain",
            Self::Pdf => "application/pdf",
        }
    }
}

/// Partitions filings into structural elements. HTML tables are kept as
/// `Table` elements carrying their markup; everything else becomes titles,
/// list items and narrative text.
pub struct FilingParser {
    paragraph_re: Regex,
}

impl FilingParser {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            paragraph_re: Regex::new(r"\n[ \t\r]*\n")?,
        })
    }

    fn detect_format(path: &Path, content: &str) -> Result<DocumentFormat, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if BINARY_EXTENSIONS.contains(&extension.as_str()) {
            return Err(IngestError::Unsupported {
                path: path.to_path_buf(),
                reason: format!("binary .{extension} files are not parsed"),
            });
        }

        Ok(match extension.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "htm" | "html" | "xhtml" => DocumentFormat::Html,
            _ if looks_like_html(content) => DocumentFormat::Html,
            _ => DocumentFormat::Text,
        })
    }

    fn partition_html(&self, html: &str, base: &ElementMetadata, builder: &mut ElementBuilder) {
        let document = Html::parse_document(html);
        let mut prose = String::new();
        self.walk_html(document.root_element(), &mut prose, base, builder);
        self.partition_text(&prose, base, builder);
    }

    /// Depth-first walk that buffers prose and emits each outermost table
    /// whole, nested tables included.
    fn walk_html(
        &self,
        element: ElementRef<'_>,
        prose: &mut String,
        base: &ElementMetadata,
        builder: &mut ElementBuilder,
    ) {
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                prose.push_str(text);
                continue;
            }
            let Some(child) = ElementRef::wrap(child) else {
                continue;
            };

            let name = child.value().name();
            if SKIPPED_TAGS.contains(&name) {
                continue;
            }
            if name == "br" {
                prose.push_str("\n\n");
                continue;
            }
            if name == "table" {
                self.partition_text(&std::mem::take(prose), base, builder);
                self.push_table(child, base, builder);
                continue;
            }

            let block = BLOCK_TAGS.contains(&name);
            if block {
                prose.push_str("\n\n");
            }
            self.walk_html(child, prose, base, builder);
            if block {
                prose.push_str("\n\n");
            }
        }
    }

    fn push_table(
        &self,
        table: ElementRef<'_>,
        base: &ElementMetadata,
        builder: &mut ElementBuilder,
    ) {
        let text = normalize_whitespace(&table.text().collect::<Vec<_>>().join(" "));
        if text.is_empty() {
            return;
        }
        let metadata = ElementMetadata {
            text_as_html: Some(table.html()),
            ..builder.metadata(base)
        };
        builder.push(ElementKind::Table, text, metadata);
    }

    fn partition_text(&self, text: &str, base: &ElementMetadata, builder: &mut ElementBuilder) {
        for (page_index, page) in text.split('\u{000c}').enumerate() {
            if page_index > 0 {
                builder.page += 1;
                let metadata = builder.metadata(base);
                builder.push(ElementKind::PageBreak, String::new(), metadata);
            }

            for paragraph in self.paragraph_re.split(page) {
                let normalized = normalize_whitespace(paragraph);
                if normalized.is_empty() {
                    continue;
                }
                let (kind, text) = classify_paragraph(normalized);
                let metadata = builder.metadata(base);
                builder.push(kind, text, metadata);
            }
        }
    }

    fn partition_pdf(
        &self,
        path: &Path,
        base: &ElementMetadata,
        builder: &mut ElementBuilder,
    ) -> Result<(), IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut readable = false;
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if text.trim().is_empty() {
                continue;
            }
            readable = true;
            builder.page = page_no;
            self.partition_text(&text, base, builder);
        }

        if !readable {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }
        Ok(())
    }
}

impl DocumentParser for FilingParser {
    fn parse_file(&self, path: &Path) -> Result<Vec<SourceElement>, IngestError> {
        if !path.exists() {
            return Err(IngestError::MissingPath(path.to_path_buf()));
        }

        let bytes = fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        let format = Self::detect_format(path, &content)?;

        let base = ElementMetadata {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            file_directory: path
                .parent()
                .map(|parent| parent.to_string_lossy().to_string()),
            filetype: Some(format.mime().to_string()),
            page_number: None,
            text_as_html: None,
        };
        let mut builder = ElementBuilder::new(path);

        match format {
            DocumentFormat::Html => self.partition_html(&content, &base, &mut builder),
            DocumentFormat::Text => self.partition_text(&content, &base, &mut builder),
            DocumentFormat::Pdf => self.partition_pdf(path, &base, &mut builder)?,
        }

        Ok(builder.elements)
    }
}

struct ElementBuilder {
    source: String,
    page: u32,
    elements: Vec<SourceElement>,
}

impl ElementBuilder {
    fn new(path: &Path) -> Self {
        Self {
            source: path.to_string_lossy().to_string(),
            page: 1,
            elements: Vec::new(),
        }
    }

    fn metadata(&self, base: &ElementMetadata) -> ElementMetadata {
        ElementMetadata {
            page_number: Some(self.page),
            ..base.clone()
        }
    }

    fn push(&mut self, kind: ElementKind, text: String, metadata: ElementMetadata) {
        let element_id = make_element_id(&self.source, self.elements.len(), &text);
        self.elements.push(SourceElement {
            element_id,
            kind,
            text,
            metadata,
        });
    }
}

fn make_element_id(source: &str, ordinal: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update((ordinal as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn looks_like_html(content: &str) -> bool {
    let head = content
        .chars()
        .take(200_000)
        .collect::<String>()
        .to_ascii_lowercase();
    ["<html", "<table", "<body", "<div"]
        .iter()
        .any(|marker| head.contains(marker))
}

fn classify_paragraph(paragraph: String) -> (ElementKind, String) {
    if let Some(rest) = strip_bullet(&paragraph) {
        return (ElementKind::ListItem, rest.to_string());
    }
    if is_title(&paragraph) {
        return (ElementKind::Title, paragraph);
    }
    (ElementKind::NarrativeText, paragraph)
}

fn strip_bullet(paragraph: &str) -> Option<&str> {
    let mut chars = paragraph.chars();
    let first = chars.next()?;
    if !BULLETS.contains(&first) {
        return None;
    }
    let rest = chars.as_str();
    if rest.starts_with(' ') && !rest.trim().is_empty() {
        Some(rest.trim())
    } else {
        None
    }
}

fn is_title(paragraph: &str) -> bool {
    if paragraph.chars().count() > TITLE_MAX_CHARS
        || paragraph.split_whitespace().count() > TITLE_MAX_WORDS
    {
        return false;
    }
    if paragraph.ends_with(['.', ',', ';', '!', '?']) {
        return false;
    }
    paragraph.chars().any(char::is_alphabetic)
}
