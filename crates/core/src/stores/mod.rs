pub mod qdrant;
pub mod sqlite;

pub use qdrant::{QdrantStore, DEFAULT_QDRANT_COLLECTION};
pub use sqlite::{SqliteTableLoader, DEFAULT_SQLITE_PATH};
