use crate::error::StoreError;
use crate::models::EnrichedRecord;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub trait RecordStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored at `location` yet.
    fn load(&self, location: &Path) -> Result<Option<Vec<EnrichedRecord>>, StoreError>;

    /// Replaces whatever is stored at `location` with `records`.
    fn store(&self, location: &Path, records: &[EnrichedRecord]) -> Result<(), StoreError>;
}

/// Stores the collection as one pretty-printed JSON array. Writes land in a
/// sibling temp file that is renamed over the target once synced.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFileStore;

impl JsonFileStore {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(location: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: location.to_path_buf(),
        source,
    }
}

impl RecordStore for JsonFileStore {
    fn load(&self, location: &Path) -> Result<Option<Vec<EnrichedRecord>>, StoreError> {
        let bytes = match fs::read(location) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(io_error(location)(error)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                path: location.to_path_buf(),
                source,
            })
    }

    fn store(&self, location: &Path, records: &[EnrichedRecord]) -> Result<(), StoreError> {
        let parent = location
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_error(location))?;

        let mut encoded = serde_json::to_vec_pretty(records)?;
        encoded.push(b'\n');

        let mut temp = NamedTempFile::new_in(parent).map_err(io_error(location))?;
        temp.write_all(&encoded).map_err(io_error(location))?;
        temp.as_file().sync_all().map_err(io_error(location))?;
        temp.persist(location)
            .map_err(|error| io_error(location)(error.error))?;

        Ok(())
    }
}
