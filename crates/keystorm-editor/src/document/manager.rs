//! The document manager: registry, active-document tracking, cycling.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use keystorm_core::events::{topics, FileAction, FileEvent};
use keystorm_core::{Error, Result, ScratchKey};

use crate::bus::{EventBus, EventPayload};
use crate::engine::Engine;

use super::document::{ChangeSink, Document, DocumentKey};

#[derive(Default)]
struct Registry {
    docs: HashMap<DocumentKey, Arc<Document>>,
    /// Insertion order; drives `next`/`previous` cycling and the
    /// close-transfers-to-tail rule.
    order: Vec<DocumentKey>,
}

pub struct DocumentManager {
    registry: RwLock<Registry>,
    /// Snapshot pointer to the active document, readable without touching
    /// the registry lock.
    active: RwLock<Option<Arc<Document>>>,
    scratch_counter: AtomicU64,
    bus: RwLock<Option<Arc<EventBus>>>,
}

impl DocumentManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            active: RwLock::new(None),
            scratch_counter: AtomicU64::new(0),
            bus: RwLock::new(None),
        }
    }

    /// Wire the manager to the bus. Documents registered from here on emit
    /// buffer-change and file events.
    pub fn set_bus(&self, bus: Arc<EventBus>) {
        *self.bus.write().unwrap() = Some(bus);
    }

    /// Open `path`, normalizing to absolute. Re-opening an already-open
    /// path returns the existing document and leaves the count unchanged.
    pub fn open(&self, path: &Path) -> Result<Arc<Document>> {
        let key = DocumentKey::for_path(path);
        if let Some(existing) = self.get(&key) {
            self.activate(Arc::clone(&existing));
            return Ok(existing);
        }

        let DocumentKey::Path(normalized) = &key else {
            unreachable!("for_path always yields a path key");
        };
        let content = std::fs::read_to_string(normalized).map_err(|source| Error::OpenFailure {
            path: normalized.clone(),
            source,
        })?;

        let doc = Arc::new(Document::new_file(normalized.clone(), content));
        self.register(key.clone(), Arc::clone(&doc));
        self.publish(
            topics::FILE_OPENED,
            EventPayload::File(FileEvent {
                path: normalized.clone(),
                action: FileAction::Opened,
            }),
        );
        Ok(doc)
    }

    /// Create a scratch document named from the monotonic counter
    /// (`Untitled`, `Untitled-2`, …). Names are never reused in a session.
    pub fn create_scratch(&self) -> Arc<Document> {
        let n = self.scratch_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let key = ScratchKey(n);
        let doc = Arc::new(Document::new_scratch(key));
        self.register(DocumentKey::Scratch(key), Arc::clone(&doc));
        doc
    }

    /// Close a document. Closing the active document transfers activity to
    /// the document at the tail of the insertion order, or to none.
    pub fn close(&self, key: &DocumentKey) -> Result<()> {
        let (doc, new_active) = {
            let mut registry = self.registry.write().unwrap();
            let doc = registry
                .docs
                .remove(key)
                .ok_or_else(|| Error::DocumentNotFound(key.to_string()))?;
            registry.order.retain(|k| k != key);
            let tail = registry
                .order
                .last()
                .and_then(|k| registry.docs.get(k).cloned());
            (doc, tail)
        };

        let was_active = {
            let active = self.active.read().unwrap();
            active
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &doc))
        };
        if was_active {
            match new_active {
                Some(next) => self.activate(next),
                None => *self.active.write().unwrap() = None,
            }
        }

        self.publish(
            topics::FILE_CLOSED,
            EventPayload::File(FileEvent {
                path: doc.path().map(Path::to_path_buf).unwrap_or_default(),
                action: FileAction::Closed,
            }),
        );
        Ok(())
    }

    /// Write a document back to its file and clear the modified flag.
    pub fn save(&self, key: &DocumentKey) -> Result<()> {
        let doc = self
            .get(key)
            .ok_or_else(|| Error::DocumentNotFound(key.to_string()))?;
        let path = doc.path().ok_or(Error::NoFilePath)?.to_path_buf();
        std::fs::write(&path, doc.text())?;
        doc.set_modified(false);
        self.publish(
            topics::FILE_SAVED,
            EventPayload::File(FileEvent {
                path,
                action: FileAction::Saved,
            }),
        );
        Ok(())
    }

    pub fn active(&self) -> Option<Arc<Document>> {
        self.active.read().unwrap().clone()
    }

    pub fn set_active(&self, key: &DocumentKey) -> Result<()> {
        let doc = self
            .get(key)
            .ok_or_else(|| Error::DocumentNotFound(key.to_string()))?;
        self.activate(doc);
        Ok(())
    }

    /// Cycle to the next document in insertion order, wrapping around.
    pub fn next(&self) -> Option<Arc<Document>> {
        self.cycle(1)
    }

    /// Cycle to the previous document in insertion order, wrapping around.
    pub fn previous(&self) -> Option<Arc<Document>> {
        self.cycle(-1)
    }

    pub fn get(&self, key: &DocumentKey) -> Option<Arc<Document>> {
        self.registry.read().unwrap().docs.get(key).cloned()
    }

    /// All documents in insertion order.
    pub fn all(&self) -> Vec<Arc<Document>> {
        let registry = self.registry.read().unwrap();
        registry
            .order
            .iter()
            .filter_map(|k| registry.docs.get(k).cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.registry.read().unwrap().docs.len()
    }

    pub fn dirty_documents(&self) -> Vec<Arc<Document>> {
        self.all().into_iter().filter(|d| d.is_modified()).collect()
    }

    pub fn has_dirty(&self) -> bool {
        self.all().iter().any(|d| d.is_modified())
    }

    fn register(&self, key: DocumentKey, doc: Arc<Document>) {
        if let Some(sink) = self.make_sink() {
            doc.set_change_sink(sink);
        }
        {
            let mut registry = self.registry.write().unwrap();
            registry.docs.insert(key.clone(), Arc::clone(&doc));
            registry.order.push(key);
        }
        self.activate(doc);
    }

    fn activate(&self, doc: Arc<Document>) {
        let already_active = {
            let active = self.active.read().unwrap();
            active
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &doc))
        };
        if already_active {
            return;
        }
        *self.active.write().unwrap() = Some(Arc::clone(&doc));
        self.publish(
            topics::DOCUMENT_ACTIVATED,
            EventPayload::Custom(serde_json::json!({
                "document": doc.key().to_string(),
            })),
        );
    }

    fn cycle(&self, step: isize) -> Option<Arc<Document>> {
        let target = {
            let registry = self.registry.read().unwrap();
            if registry.order.is_empty() {
                return None;
            }
            let len = registry.order.len() as isize;
            let current = self.active.read().unwrap();
            let index = current
                .as_ref()
                .and_then(|doc| registry.order.iter().position(|k| k == doc.key()))
                .unwrap_or(0) as isize;
            let next = (index + step).rem_euclid(len) as usize;
            registry.docs.get(&registry.order[next]).cloned()
        };
        let doc = target?;
        self.activate(Arc::clone(&doc));
        Some(doc)
    }

    fn make_sink(&self) -> Option<ChangeSink> {
        let bus = self.bus.read().unwrap().clone()?;
        Some(Arc::new(move |topic: &str, payload: EventPayload| {
            if let Err(err) = bus.publish(topic, payload) {
                tracing::trace!(%topic, %err, "dropped document event");
            }
        }))
    }

    fn publish(&self, topic: &str, payload: EventPayload) {
        let bus = self.bus.read().unwrap().clone();
        if let Some(bus) = bus {
            if let Err(err) = bus.publish(topic, payload) {
                tracing::trace!(%topic, %err, "dropped document event");
            }
        }
    }
}

impl Default for DocumentManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SubscribeOptions;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write_files(dir: &TempDir, names: &[&str]) -> Vec<std::path::PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, format!("contents of {name}")).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_scratch_document_is_active_and_named_untitled() {
        let manager = DocumentManager::new();
        let doc = manager.create_scratch();
        assert_eq!(doc.display_name(), "Untitled");
        assert_eq!(manager.count(), 1);
        assert!(Arc::ptr_eq(&manager.active().unwrap(), &doc));
    }

    #[test]
    fn test_scratch_names_are_never_reused() {
        let manager = DocumentManager::new();
        let first = manager.create_scratch();
        let second = manager.create_scratch();
        assert_eq!(first.display_name(), "Untitled");
        assert_eq!(second.display_name(), "Untitled-2");

        manager.close(&second.key().clone()).unwrap();
        let third = manager.create_scratch();
        assert_eq!(third.display_name(), "Untitled-3");
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &["a.txt"]);

        let manager = DocumentManager::new();
        let first = manager.open(&paths[0]).unwrap();
        let second = manager.open(&paths[0]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_open_unreadable_wraps_io_error() {
        let manager = DocumentManager::new();
        let err = manager
            .open(Path::new("/no/such/keystorm/file.txt"))
            .unwrap_err();
        assert!(matches!(err, Error::OpenFailure { .. }));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_open_order_and_cycling() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &["a.txt", "b.txt", "c.txt"]);

        let manager = DocumentManager::new();
        for path in &paths {
            manager.open(path).unwrap();
        }
        assert_eq!(manager.active().unwrap().display_name(), "c.txt");

        // next wraps c -> a -> b -> c
        assert_eq!(manager.next().unwrap().display_name(), "a.txt");
        assert_eq!(manager.next().unwrap().display_name(), "b.txt");
        assert_eq!(manager.next().unwrap().display_name(), "c.txt");

        // previous cycles in reverse
        assert_eq!(manager.previous().unwrap().display_name(), "b.txt");
        assert_eq!(manager.previous().unwrap().display_name(), "a.txt");
        assert_eq!(manager.previous().unwrap().display_name(), "c.txt");
    }

    #[test]
    fn test_close_transfers_active_to_tail() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &["a.txt", "b.txt", "c.txt"]);

        let manager = DocumentManager::new();
        for path in &paths {
            manager.open(path).unwrap();
        }
        let active = manager.active().unwrap();
        assert_eq!(active.display_name(), "c.txt");

        manager.close(&active.key().clone()).unwrap();
        assert_eq!(manager.active().unwrap().display_name(), "b.txt");
        assert_eq!(manager.count(), 2);

        manager.close(&manager.active().unwrap().key().clone()).unwrap();
        manager.close(&manager.active().unwrap().key().clone()).unwrap();
        assert!(manager.active().is_none());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_close_unknown_is_not_found() {
        let manager = DocumentManager::new();
        let err = manager
            .close(&DocumentKey::Scratch(ScratchKey(42)))
            .unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[test]
    fn test_dirty_tracking_matches_modified_flags() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &["a.txt", "b.txt"]);

        let manager = DocumentManager::new();
        let a = manager.open(&paths[0]).unwrap();
        let _b = manager.open(&paths[1]).unwrap();
        assert!(!manager.has_dirty());
        assert!(manager.dirty_documents().is_empty());

        a.insert(0, "x").unwrap();
        assert!(manager.has_dirty());
        let dirty = manager.dirty_documents();
        assert_eq!(dirty.len(), 1);
        assert!(Arc::ptr_eq(&dirty[0], &a));
    }

    #[test]
    fn test_save_clears_modified_and_writes_content() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &["a.txt"]);

        let manager = DocumentManager::new();
        let doc = manager.open(&paths[0]).unwrap();
        doc.replace(0, doc.len_bytes(), "rewritten").unwrap();
        assert!(doc.is_modified());

        manager.save(&doc.key().clone()).unwrap();
        assert!(!doc.is_modified());
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "rewritten");
    }

    #[test]
    fn test_save_scratch_has_no_file_path() {
        let manager = DocumentManager::new();
        let doc = manager.create_scratch();
        let err = manager.save(&doc.key().clone()).unwrap_err();
        assert!(matches!(err, Error::NoFilePath));
    }

    #[tokio::test]
    async fn test_edit_publishes_buffer_change_on_bus() {
        let bus = EventBus::new();
        bus.start().unwrap();

        let manager = DocumentManager::new();
        manager.set_bus(Arc::clone(&bus));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe("buffer.content.*", SubscribeOptions::sync(0), move |event| {
            if let EventPayload::Buffer(change) = &event.payload {
                sink.lock().unwrap().push(change.clone());
            }
        });

        let doc = manager.open(&path).unwrap();
        doc.insert(0, "Hi ").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].start_offset, 0);
        assert_eq!(seen[0].end_offset, 3);
        assert_eq!(seen[0].text, "Hi ");
        assert!(seen[0].path.ends_with("a.txt"));
    }
}
