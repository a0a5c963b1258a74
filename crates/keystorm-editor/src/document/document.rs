//! A single open document: content, identity, and modification state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use keystorm_core::events::{topics, BufferChange};
use keystorm_core::{Error, Result, ScratchKey};

use crate::bus::EventPayload;
use crate::engine::{EditResult, Engine, StringEngine};

use super::{language_for_path, normalize_path};

/// Identity of a document within the manager: an absolute path for
/// file-backed documents, a scratch key otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    Path(PathBuf),
    Scratch(ScratchKey),
}

impl DocumentKey {
    pub fn for_path(path: &Path) -> Self {
        DocumentKey::Path(normalize_path(path))
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKey::Path(path) => write!(f, "{}", path.display()),
            DocumentKey::Scratch(key) => write!(f, "{key}"),
        }
    }
}

/// Sink edits flow through on their way to the event bus. Installed by the
/// manager so every engine mutation emits a buffer-change event.
pub type ChangeSink = Arc<dyn Fn(&str, EventPayload) + Send + Sync>;

/// Sentinel for "no cursor".
const NO_CURSOR: u64 = u64::MAX;

pub struct Document {
    key: DocumentKey,
    display_name: String,
    language_id: &'static str,
    read_only: AtomicBool,
    lsp_opened: AtomicBool,
    modified: AtomicBool,
    revision: AtomicU64,
    primary_cursor: AtomicU64,
    engine: RwLock<StringEngine>,
    change_sink: RwLock<Option<ChangeSink>>,
}

impl Document {
    /// A file-backed document. `path` must already be normalized.
    pub fn new_file(path: PathBuf, content: String) -> Self {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let language_id = language_for_path(&path);
        Self {
            key: DocumentKey::Path(path),
            display_name,
            language_id,
            read_only: AtomicBool::new(false),
            lsp_opened: AtomicBool::new(false),
            modified: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            primary_cursor: AtomicU64::new(0),
            engine: RwLock::new(StringEngine::from_text(content)),
            change_sink: RwLock::new(None),
        }
    }

    /// A scratch document with an empty path and a `Untitled-N` name.
    pub fn new_scratch(key: ScratchKey) -> Self {
        Self {
            key: DocumentKey::Scratch(key),
            display_name: key.to_string(),
            language_id: "plaintext",
            read_only: AtomicBool::new(false),
            lsp_opened: AtomicBool::new(false),
            modified: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            primary_cursor: AtomicU64::new(0),
            engine: RwLock::new(StringEngine::new()),
            change_sink: RwLock::new(None),
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The backing file path; empty for scratch documents.
    pub fn path(&self) -> Option<&Path> {
        match &self.key {
            DocumentKey::Path(path) => Some(path),
            DocumentKey::Scratch(_) => None,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn language_id(&self) -> &'static str {
        self.language_id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn is_lsp_opened(&self) -> bool {
        self.lsp_opened.load(Ordering::Acquire)
    }

    pub fn set_lsp_opened(&self, opened: bool) {
        self.lsp_opened.store(opened, Ordering::Release);
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    /// Set or clear the modified flag. The first transition to modified
    /// emits `document.modified`.
    pub fn set_modified(&self, modified: bool) {
        let was = self.modified.swap(modified, Ordering::AcqRel);
        if modified && !was {
            self.emit(
                topics::DOCUMENT_MODIFIED,
                EventPayload::Custom(serde_json::json!({
                    "document": self.key.to_string(),
                })),
            );
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Primary cursor offset, if the document has a cursor.
    pub fn cursor(&self) -> Option<usize> {
        match self.primary_cursor.load(Ordering::Acquire) {
            NO_CURSOR => None,
            offset => Some(offset as usize),
        }
    }

    /// Move the primary cursor, clamped to the content length.
    pub fn set_cursor(&self, offset: usize) {
        let max = self.len_bytes();
        self.primary_cursor
            .store(offset.min(max) as u64, Ordering::Release);
    }

    pub fn clear_cursor(&self) {
        self.primary_cursor.store(NO_CURSOR, Ordering::Release);
    }

    /// Primary cursor as a 0-based (line, column) point.
    pub fn cursor_point(&self) -> Option<(usize, usize)> {
        let offset = self.cursor()?;
        Some(self.engine.read().unwrap().offset_to_point(offset))
    }

    /// The first `max_lines` lines of content, for the renderer.
    pub fn visible_lines(&self, max_lines: usize) -> Vec<String> {
        let engine = self.engine.read().unwrap();
        engine
            .text()
            .lines()
            .take(max_lines)
            .map(str::to_string)
            .collect()
    }

    pub(super) fn set_change_sink(&self, sink: ChangeSink) {
        *self.change_sink.write().unwrap() = Some(sink);
    }

    fn emit(&self, topic: &str, payload: EventPayload) {
        let sink = self.change_sink.read().unwrap();
        if let Some(sink) = sink.as_ref() {
            sink(topic, payload);
        }
    }

    /// The path recorded in buffer-change payloads; empty for scratch.
    fn change_path(&self) -> PathBuf {
        self.path().map(Path::to_path_buf).unwrap_or_default()
    }

    fn apply_edit(
        &self,
        topic: &'static str,
        edit: impl FnOnce(&mut StringEngine) -> Result<(EditResult, String, String)>,
    ) -> Result<EditResult> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (result, old_text, new_text) = {
            let mut engine = self.engine.write().unwrap();
            edit(&mut engine)?
        };
        self.revision.store(result.revision, Ordering::Release);
        self.set_modified(true);

        let end_offset = if new_text.is_empty() {
            result.end_offset_before
        } else {
            result.start_offset + result.new_len
        };
        self.emit(
            topic,
            EventPayload::Buffer(BufferChange {
                path: self.change_path(),
                start_offset: result.start_offset,
                end_offset,
                text: new_text,
                old_text,
            }),
        );
        Ok(result)
    }
}

impl Engine for Document {
    fn text(&self) -> String {
        self.engine.read().unwrap().text().to_string()
    }

    fn len_bytes(&self) -> usize {
        self.engine.read().unwrap().len()
    }

    fn revision(&self) -> u64 {
        Document::revision(self)
    }

    fn insert(&self, offset: usize, text: &str) -> Result<EditResult> {
        let text = text.to_string();
        self.apply_edit(topics::BUFFER_INSERTED, move |engine| {
            let result = engine.insert(offset, &text)?;
            Ok((result, String::new(), text))
        })
    }

    fn delete(&self, start: usize, end: usize) -> Result<EditResult> {
        self.apply_edit(topics::BUFFER_DELETED, move |engine| {
            let old_text = engine.slice(start, end)?.to_string();
            let result = engine.delete(start, end)?;
            Ok((result, old_text, String::new()))
        })
    }

    fn replace(&self, start: usize, end: usize, text: &str) -> Result<EditResult> {
        let text = text.to_string();
        self.apply_edit(topics::BUFFER_REPLACED, move |engine| {
            let old_text = engine.slice(start, end)?.to_string();
            let result = engine.replace(start, end, &text)?;
            Ok((result, old_text, text))
        })
    }
}

impl crate::engine::Cursors for Document {
    fn primary(&self) -> Option<usize> {
        self.cursor()
    }

    fn set_primary(&self, offset: usize) {
        self.set_cursor(offset);
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("key", &self.key)
            .field("display_name", &self.display_name)
            .field("language_id", &self.language_id)
            .field("modified", &self.is_modified())
            .field("revision", &self.revision())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edits_bump_revision_by_one_and_mark_modified() {
        let doc = Document::new_file(PathBuf::from("/tmp/a.txt"), "world".into());
        assert!(!doc.is_modified());
        assert_eq!(doc.revision(), 0);

        doc.insert(0, "hello ").unwrap();
        assert_eq!(doc.revision(), 1);
        assert!(doc.is_modified());

        doc.delete(0, 6).unwrap();
        assert_eq!(doc.revision(), 2);
        assert_eq!(doc.text(), "world");
    }

    #[test]
    fn test_read_only_rejects_edits() {
        let doc = Document::new_file(PathBuf::from("/tmp/a.txt"), "text".into());
        doc.set_read_only(true);
        assert!(matches!(doc.insert(0, "x"), Err(Error::ReadOnly)));
        assert_eq!(doc.revision(), 0);
        assert!(!doc.is_modified());
    }

    #[test]
    fn test_change_sink_receives_buffer_change() {
        let doc = Document::new_file(PathBuf::from("/tmp/a.txt"), String::new());
        let seen = Arc::new(RwLock::new(Vec::<(String, BufferChange)>::new()));
        let sink_seen = Arc::clone(&seen);
        doc.set_change_sink(Arc::new(move |topic, payload| {
            if let EventPayload::Buffer(change) = payload {
                sink_seen.write().unwrap().push((topic.to_string(), change));
            }
        }));

        doc.insert(0, "Hi ").unwrap();

        let seen = seen.read().unwrap();
        assert_eq!(seen.len(), 1);
        let (topic, change) = &seen[0];
        assert_eq!(topic, topics::BUFFER_INSERTED);
        assert_eq!(change.path, PathBuf::from("/tmp/a.txt"));
        assert_eq!(change.start_offset, 0);
        assert_eq!(change.end_offset, 3);
        assert_eq!(change.text, "Hi ");
        assert_eq!(change.old_text, "");
    }

    #[test]
    fn test_delete_payload_carries_old_text() {
        let doc = Document::new_file(PathBuf::from("/tmp/a.txt"), "abcdef".into());
        let seen = Arc::new(RwLock::new(Vec::<BufferChange>::new()));
        let sink_seen = Arc::clone(&seen);
        doc.set_change_sink(Arc::new(move |_, payload| {
            if let EventPayload::Buffer(change) = payload {
                sink_seen.write().unwrap().push(change);
            }
        }));

        doc.delete(1, 4).unwrap();
        let seen = seen.read().unwrap();
        assert_eq!(seen[0].old_text, "bcd");
        assert_eq!(seen[0].start_offset, 1);
        assert_eq!(seen[0].end_offset, 4);
        assert_eq!(seen[0].text, "");
    }

    #[test]
    fn test_scratch_documents_have_empty_path() {
        let doc = Document::new_scratch(ScratchKey(1));
        assert_eq!(doc.path(), None);
        assert_eq!(doc.display_name(), "Untitled");
        assert_eq!(Document::new_scratch(ScratchKey(3)).display_name(), "Untitled-3");
    }

    #[test]
    fn test_cursor_clamps_to_length() {
        let doc = Document::new_file(PathBuf::from("/tmp/a.txt"), "abc".into());
        doc.set_cursor(100);
        assert_eq!(doc.cursor(), Some(3));
        doc.clear_cursor();
        assert_eq!(doc.cursor(), None);
    }
}
