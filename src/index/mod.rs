//! Per-document semantic indexes: content parsing, chunking, persistence, and
//! the TTL-cached storage handle that serves warm reads.

pub mod cache;
pub mod chunker;
pub mod content;
pub mod storage;

pub use cache::{DocumentIndexCache, DocumentIndexEntry, STORAGE_CONTEXT_KEY};
pub use content::{DocumentContentSource, LocalFileContentSource};
pub use storage::{IndexStorage, SemanticIndex, SqliteIndexStorage, StorageContext, StorageLocation};
