use crate::parser::DocumentParser;
use crate::{IngestError, SourceElement};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub fn discover_filing_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub path: PathBuf,
    pub elements: Vec<SourceElement>,
}

#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub documents: Vec<ParsedDocument>,
    pub skipped_files: Vec<SkippedFile>,
}

impl ParseReport {
    pub fn element_count(&self) -> usize {
        self.documents
            .iter()
            .map(|document| document.elements.len())
            .sum()
    }
}

/// Parses a single file, or every file under a directory. Files that fail to
/// parse are reported in `skipped_files` and contribute no elements.
pub fn parse_path(parser: &dyn DocumentParser, path: &Path) -> Result<ParseReport, IngestError> {
    if !path.exists() {
        return Err(IngestError::MissingPath(path.to_path_buf()));
    }

    let files = if path.is_dir() {
        discover_filing_files(path)
    } else {
        vec![path.to_path_buf()]
    };

    let mut report = ParseReport::default();
    for file in files {
        match parser.parse_file(&file) {
            Ok(elements) => {
                debug!(path = %file.display(), elements = elements.len(), "parsed file");
                report.documents.push(ParsedDocument {
                    path: file,
                    elements,
                });
            }
            Err(error) => {
                warn!(path = %file.display(), %error, "skipping unparseable file");
                report.skipped_files.push(SkippedFile {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{discover_filing_files, parse_path};
    use crate::parser::FilingParser;
    use crate::IngestError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discover_filing_files_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("8-K").join("0001");
        fs::create_dir_all(&nested)?;

        fs::write(base.join("b.txt"), "Overview")?;
        fs::write(nested.join("a.txt"), "Overview")?;

        let files = discover_filing_files(base);
        assert_eq!(files.len(), 2);
        assert!(files[0] < files[1]);
        Ok(())
    }

    #[test]
    fn missing_target_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let parser = FilingParser::new()?;

        let result = parse_path(&parser, &dir.path().join("absent"));
        assert!(matches!(result, Err(IngestError::MissingPath(_))));
        Ok(())
    }

    #[test]
    fn single_file_is_parsed_alone() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file = dir.path().join("filing.txt");
        fs::write(&file, "Results of Operations\n\nRevenue increased by ten percent this year.")?;
        fs::write(dir.path().join("other.txt"), "Unrelated sibling.")?;
        let parser = FilingParser::new()?;

        let report = parse_path(&parser, &file)?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].path, file);
        assert_eq!(report.element_count(), 2);
        Ok(())
    }

    #[test]
    fn unparseable_files_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("exhibit.zip"), b"PK\x03\x04")?;
        fs::write(dir.path().join("filing.txt"), "Revenue increased by ten percent this year.")?;
        let parser = FilingParser::new()?;

        let report = parse_path(&parser, dir.path())?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("exhibit.zip")
        );
        Ok(())
    }
}
