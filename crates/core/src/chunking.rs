use crate::error::IngestError;
use crate::models::{Chunk, ElementKind, ElementMetadata, SourceElement};
use sha2::{Digest, Sha256};

const SEPARATOR: &str = "\n\n";
const SEPARATOR_CHARS: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct TitleChunkingConfig {
    pub max_characters: usize,
    pub combine_text_under_n_chars: usize,
    pub new_after_n_chars: usize,
}

impl Default for TitleChunkingConfig {
    fn default() -> Self {
        Self {
            max_characters: 2_048,
            combine_text_under_n_chars: 256,
            new_after_n_chars: 1_800,
        }
    }
}

impl TitleChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_characters == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_characters must be greater than zero".to_string(),
            ));
        }
        if self.new_after_n_chars > self.max_characters {
            return Err(IngestError::InvalidChunkConfig(format!(
                "new_after_n_chars {} exceeds max_characters {}",
                self.new_after_n_chars, self.max_characters
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

#[derive(Debug)]
enum PreChunk<'a> {
    Text(TextSection<'a>),
    Table(&'a SourceElement),
}

#[derive(Debug, Default)]
struct TextSection<'a> {
    parts: Vec<&'a SourceElement>,
    chars: usize,
}

impl<'a> TextSection<'a> {
    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn len_with(&self, extra: usize) -> usize {
        if self.is_empty() {
            extra
        } else {
            self.chars + SEPARATOR_CHARS + extra
        }
    }

    fn push(&mut self, element: &'a SourceElement) {
        self.chars = self.len_with(element.text.chars().count());
        self.parts.push(element);
    }

    fn absorb(&mut self, other: TextSection<'a>) {
        for element in other.parts {
            self.push(element);
        }
    }

    fn text(&self) -> String {
        self.parts
            .iter()
            .map(|element| element.text.as_str())
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}

/// Groups elements into sections that start at each `Title`, isolates tables,
/// merges undersized sections forward and splits anything still longer than
/// `max_characters`.
pub fn chunk_by_title(
    elements: &[SourceElement],
    config: &TitleChunkingConfig,
    source_path: &str,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let sections = combine_small_sections(pre_chunk(elements, config), config);
    let mut chunks = Vec::new();

    for section in sections {
        match section {
            PreChunk::Text(section) => {
                let Some(first) = section.parts.first() else {
                    continue;
                };
                let metadata = ElementMetadata {
                    text_as_html: None,
                    ..first.metadata.clone()
                };
                for piece in char_windows(&section.text(), config.max_characters) {
                    push_chunk(&mut chunks, source_path, piece, metadata.clone());
                }
            }
            PreChunk::Table(table) => {
                let html = table.metadata.text_as_html.clone().unwrap_or_default();
                let pieces = char_windows(&table.text, config.max_characters);
                let html_pieces = split_evenly(&html, pieces.len());
                for (piece, html_piece) in pieces.into_iter().zip(html_pieces) {
                    let metadata = ElementMetadata {
                        text_as_html: Some(html_piece),
                        ..table.metadata.clone()
                    };
                    push_chunk(&mut chunks, source_path, piece, metadata);
                }
            }
        }
    }

    Ok(chunks)
}

fn pre_chunk<'a>(elements: &'a [SourceElement], config: &TitleChunkingConfig) -> Vec<PreChunk<'a>> {
    let mut sections = Vec::new();
    let mut current = TextSection::default();

    for element in elements {
        match element.kind {
            ElementKind::PageBreak => continue,
            ElementKind::Table => {
                flush(&mut sections, &mut current);
                sections.push(PreChunk::Table(element));
                continue;
            }
            ElementKind::Title => flush(&mut sections, &mut current),
            ElementKind::NarrativeText | ElementKind::ListItem => {
                let next_len = current.len_with(element.text.chars().count());
                if !current.is_empty()
                    && (next_len > config.max_characters
                        || current.chars >= config.new_after_n_chars)
                {
                    flush(&mut sections, &mut current);
                }
            }
        }

        if !element.text.trim().is_empty() {
            current.push(element);
        }
    }

    flush(&mut sections, &mut current);
    sections
}

fn flush<'a>(sections: &mut Vec<PreChunk<'a>>, current: &mut TextSection<'a>) {
    if !current.is_empty() {
        sections.push(PreChunk::Text(std::mem::take(current)));
    }
}

fn combine_small_sections<'a>(
    sections: Vec<PreChunk<'a>>,
    config: &TitleChunkingConfig,
) -> Vec<PreChunk<'a>> {
    let mut combined: Vec<PreChunk<'a>> = Vec::new();

    for section in sections {
        let mergeable = match (combined.last(), &section) {
            (Some(PreChunk::Text(previous)), PreChunk::Text(next)) => {
                previous.chars < config.combine_text_under_n_chars
                    && previous.len_with(next.chars) <= config.max_characters
            }
            _ => false,
        };

        if mergeable {
            if let (Some(PreChunk::Text(previous)), PreChunk::Text(next)) =
                (combined.last_mut(), section)
            {
                previous.absorb(next);
            }
            continue;
        }
        combined.push(section);
    }

    combined
}

fn push_chunk(chunks: &mut Vec<Chunk>, source_path: &str, text: String, metadata: ElementMetadata) {
    let chunk_id = make_chunk_id(source_path, chunks.len() as u64, &text);
    chunks.push(Chunk {
        chunk_id,
        text,
        metadata,
    });
}

fn char_windows(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }
    chars
        .chunks(size)
        .map(|window| window.iter().collect())
        .collect()
}

fn split_evenly(text: &str, parts: usize) -> Vec<String> {
    if parts <= 1 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    let size = chars.len().div_ceil(parts).max(1);
    let mut pieces: Vec<String> = chars
        .chunks(size)
        .map(|window| window.iter().collect())
        .collect();
    pieces.resize(parts, String::new());
    pieces
}

fn make_chunk_id(source_path: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
