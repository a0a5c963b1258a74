//! The incremental indexer: walks project roots into the file and content
//! indexes, reacts to file-system change events, and reports progress.
//!
//! A collector walks the roots on the blocking pool, applying exclude globs
//! and the size cap, and feeds a bounded job channel drained by a small
//! worker pool. Workers read file contents and update both indexes; the
//! per-file term map is built outside the index lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use keystorm_core::{Error, Result};
use tokio::sync::mpsc;

use crate::metrics;

use super::content_index::ContentIndex;
use super::file_index::{FileIndex, FileInfo};

pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/vendor/**",
    "**/__pycache__/**",
    "**/dist/**",
    "**/build/**",
];

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub excludes: Vec<String>,
    pub max_file_size: u64,
    pub workers: usize,
    /// Progress events fire every this many indexed files.
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            max_file_size: 10 * 1024 * 1024,
            workers: 4,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexerStatus {
    Idle = 0,
    Indexing = 1,
    Error = 2,
    Stopped = 3,
}

impl IndexerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IndexerStatus::Indexing,
            2 => IndexerStatus::Error,
            3 => IndexerStatus::Stopped,
            _ => IndexerStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexerProgress {
    pub total_files: u64,
    pub indexed_files: u64,
    pub error_count: u64,
    pub bytes_indexed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub current_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum IndexerEvent {
    Started,
    Progress(IndexerProgress),
    FileIndexed(PathBuf),
    FileError { path: PathBuf, error: String },
    Completed(IndexerProgress),
    Error(String),
}

/// File-system change notification consumed by `process_change`.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

type EventHandler = Arc<dyn Fn(&IndexerEvent) + Send + Sync>;

pub struct Indexer {
    config: IndexerConfig,
    excludes: globset::GlobSet,
    file_index: Arc<FileIndex>,
    content_index: Arc<ContentIndex>,
    status: AtomicU8,
    progress: Mutex<IndexerProgress>,
    handlers: RwLock<Vec<EventHandler>>,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        file_index: Arc<FileIndex>,
        content_index: Arc<ContentIndex>,
    ) -> Result<Arc<Self>> {
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in &config.excludes {
            builder.add(
                globset::Glob::new(pattern).map_err(|e| Error::InvalidQuery(e.to_string()))?,
            );
        }
        let excludes = builder
            .build()
            .map_err(|e| Error::InvalidQuery(e.to_string()))?;
        Ok(Arc::new(Self {
            config,
            excludes,
            file_index,
            content_index,
            status: AtomicU8::new(IndexerStatus::Idle as u8),
            progress: Mutex::new(IndexerProgress::default()),
            handlers: RwLock::new(Vec::new()),
        }))
    }

    pub fn status(&self) -> IndexerStatus {
        IndexerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn progress(&self) -> IndexerProgress {
        self.progress.lock().unwrap().clone()
    }

    pub fn file_index(&self) -> &Arc<FileIndex> {
        &self.file_index
    }

    pub fn content_index(&self) -> &Arc<ContentIndex> {
        &self.content_index
    }

    /// Register an event handler; events fan out to every handler.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&IndexerEvent) + Send + Sync + 'static,
    {
        self.handlers.write().unwrap().push(Arc::new(handler));
    }

    fn emit(&self, event: IndexerEvent) {
        let handlers = self.handlers.read().unwrap().clone();
        for handler in handlers {
            handler(&event);
        }
    }

    /// Stop the indexer. Terminal: no further walks or change processing.
    pub fn stop(&self) {
        self.status
            .store(IndexerStatus::Stopped as u8, Ordering::Release);
    }

    fn excluded(&self, path: &Path) -> bool {
        self.excludes.is_match(path)
    }

    /// Walk `roots` and index every acceptable file.
    pub async fn index_all(self: &Arc<Self>, roots: &[PathBuf]) -> Result<()> {
        match self.status() {
            IndexerStatus::Indexing => {
                return Err(Error::InvalidOperation("indexing is already running".into()))
            }
            IndexerStatus::Stopped => {
                return Err(Error::InvalidOperation("indexer is stopped".into()))
            }
            IndexerStatus::Idle | IndexerStatus::Error => {}
        }
        self.status
            .store(IndexerStatus::Indexing as u8, Ordering::Release);
        {
            let mut progress = self.progress.lock().unwrap();
            *progress = IndexerProgress {
                started_at: Some(Utc::now()),
                ..Default::default()
            };
        }
        self.emit(IndexerEvent::Started);

        let (jobs_tx, jobs_rx) = mpsc::channel::<(PathBuf, std::fs::Metadata)>(
            self.config.workers.max(1) * 4,
        );
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));

        let mut workers = Vec::new();
        for _ in 0..self.config.workers.max(1) {
            let indexer = Arc::clone(self);
            let jobs_rx = Arc::clone(&jobs_rx);
            workers.push(tokio::spawn(async move {
                loop {
                    let job = jobs_rx.lock().await.recv().await;
                    let Some((path, metadata)) = job else { break };
                    if indexer.status() == IndexerStatus::Stopped {
                        break;
                    }
                    indexer.index_one(&path, &metadata).await;
                }
            }));
        }

        let collector = {
            let indexer = Arc::clone(self);
            let roots = roots.to_vec();
            tokio::task::spawn_blocking(move || indexer.collect(&roots, jobs_tx))
        };

        let collect_result = collector.await.unwrap_or_else(|e| {
            Err(Error::InvalidOperation(format!("collector panicked: {e}")))
        });
        for worker in workers {
            let _ = worker.await;
        }

        match collect_result {
            Ok(()) => {
                if self.status() != IndexerStatus::Stopped {
                    self.status.store(IndexerStatus::Idle as u8, Ordering::Release);
                }
                let progress = self.progress();
                self.emit(IndexerEvent::Completed(progress));
                Ok(())
            }
            Err(err) => {
                self.status
                    .store(IndexerStatus::Error as u8, Ordering::Release);
                self.emit(IndexerEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Blocking walk over the roots, feeding the job channel.
    fn collect(
        &self,
        roots: &[PathBuf],
        jobs: mpsc::Sender<(PathBuf, std::fs::Metadata)>,
    ) -> Result<()> {
        for root in roots {
            if !root.exists() {
                return Err(Error::NotFound(root.display().to_string()));
            }
            let walker = ignore::WalkBuilder::new(root)
                .standard_filters(false)
                .hidden(false)
                .follow_links(false)
                .build();
            for entry in walker {
                if self.status() == IndexerStatus::Stopped {
                    return Ok(());
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let mut progress = self.progress.lock().unwrap();
                        progress.error_count += 1;
                        drop(progress);
                        tracing::debug!(%err, "walk error");
                        continue;
                    }
                };
                let path = entry.path();
                if self.excluded(path) {
                    continue;
                }
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if !metadata.is_file() {
                    continue;
                }
                if metadata.len() > self.config.max_file_size {
                    continue;
                }
                {
                    let mut progress = self.progress.lock().unwrap();
                    progress.total_files += 1;
                }
                if jobs.blocking_send((path.to_path_buf(), metadata)).is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Index a single file into both indexes and update progress.
    async fn index_one(&self, path: &Path, metadata: &std::fs::Metadata) {
        {
            let mut progress = self.progress.lock().unwrap();
            progress.current_file = Some(path.to_path_buf());
        }

        self.file_index
            .add(FileInfo::from_metadata(path.to_path_buf(), metadata))
            .ok();

        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                // Only text content reaches the inverted index.
                if let Ok(content) = String::from_utf8(bytes) {
                    self.content_index.index_document(path, &content);
                }
                let (indexed, emit_progress) = {
                    let mut progress = self.progress.lock().unwrap();
                    progress.indexed_files += 1;
                    progress.bytes_indexed += size;
                    progress.last_update = Some(Utc::now());
                    (
                        progress.indexed_files,
                        progress.indexed_files % self.config.batch_size.max(1) as u64 == 0,
                    )
                };
                metrics::inc(&metrics::global().files_indexed);
                self.emit(IndexerEvent::FileIndexed(path.to_path_buf()));
                if emit_progress {
                    tracing::debug!(indexed, "indexing progress");
                    self.emit(IndexerEvent::Progress(self.progress()));
                }
            }
            Err(err) => {
                {
                    let mut progress = self.progress.lock().unwrap();
                    progress.error_count += 1;
                    progress.last_update = Some(Utc::now());
                }
                self.emit(IndexerEvent::FileError {
                    path: path.to_path_buf(),
                    error: err.to_string(),
                });
            }
        }
    }

    /// Apply one file-system change to both indexes.
    pub async fn process_change(&self, event: ChangeEvent) -> Result<()> {
        if self.status() == IndexerStatus::Stopped {
            return Err(Error::InvalidOperation("indexer is stopped".into()));
        }
        match event {
            ChangeEvent::Created(path) | ChangeEvent::Modified(path) => {
                self.reindex_path(&path).await
            }
            ChangeEvent::Deleted(path) => {
                self.file_index.remove(&path).ok();
                self.content_index.remove_document(&path);
                Ok(())
            }
            ChangeEvent::Renamed { from, to } => {
                self.file_index.remove(&from).ok();
                self.content_index.remove_document(&from);
                self.reindex_path(&to).await
            }
        }
    }

    async fn reindex_path(&self, path: &Path) -> Result<()> {
        if self.excluded(path) {
            return Ok(());
        }
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() || metadata.len() > self.config.max_file_size {
            return Ok(());
        }
        self.index_one(path, &metadata).await;
        Ok(())
    }

    /// Stream both indexes into caller-supplied sinks; callers can wrap the
    /// sinks with compression or checksumming.
    pub fn save<W1, W2>(&self, file_index_sink: &mut W1, content_sink: &mut W2) -> Result<()>
    where
        W1: std::io::Write,
        W2: std::io::Write,
    {
        self.file_index.save(file_index_sink)?;
        self.content_index.save(content_sink)?;
        Ok(())
    }

    /// Restore both indexes from caller-supplied sources.
    pub fn load<R1, R2>(&self, file_index_source: &mut R1, content_source: &mut R2) -> Result<()>
    where
        R1: std::io::Read,
        R2: std::io::Read,
    {
        self.file_index.load_from(file_index_source)?;
        self.content_index.load(content_source)?;
        Ok(())
    }
}
