//! Project indexing: a file metadata index, an inverted content index, and
//! the incremental indexer that keeps both in sync with the filesystem.

mod content_index;
mod file_index;
mod indexer;

pub use content_index::{
    ContentIndex, ContentIndexConfig, DocumentMeta, SearchHit, SearchOptions,
};
pub use file_index::{FileIndex, FileInfo, QueryKind, QueryOptions, QueryResult};
pub use indexer::{
    ChangeEvent, Indexer, IndexerConfig, IndexerEvent, IndexerProgress, IndexerStatus,
};
