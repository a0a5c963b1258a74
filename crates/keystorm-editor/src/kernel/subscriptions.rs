//! Cross-component wiring over the event bus.
//!
//! Subscriptions installed after bootstrap: buffer changes mark the renderer
//! dirty (sync, low priority) and feed the LSP full-sync path (async); file
//! events drive LSP open/close and project re-indexing; config changes apply
//! at high priority before anything else sees the frame; mode changes and
//! diagnostics refresh the status view.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use keystorm_core::events::{topics, FileAction};
use url::Url;

use crate::bus::{EventBus, EventPayload, SubscribeOptions, Subscription};
use crate::document::{DocumentKey, DocumentManager};
use crate::engine::Engine;
use crate::index::{ChangeEvent, Indexer};
use crate::lsp::LspManager;

pub struct WiringContext {
    pub bus: Arc<EventBus>,
    pub documents: Arc<DocumentManager>,
    pub lsp: Arc<LspManager>,
    pub indexer: Option<Arc<Indexer>>,
    pub lsp_autostart: bool,
    pub render_dirty: Arc<AtomicBool>,
    /// Per-path diagnostics counts for the status view.
    pub diagnostics: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

pub fn wire_subscriptions(ctx: &WiringContext) -> Vec<Subscription> {
    let mut subs = Vec::new();

    // Buffer edits invalidate the next frame. Low priority: every other
    // synchronous reaction to the edit runs first.
    {
        let dirty = Arc::clone(&ctx.render_dirty);
        subs.push(ctx.bus.subscribe(
            topics::BUFFER_CONTENT_ALL,
            SubscribeOptions::sync(-10),
            move |_| {
                dirty.store(true, Ordering::Release);
            },
        ));
    }

    // Buffer edits resync the document to its language server as a full
    // replacement; the supervisor keeps the shadow copy from the same call.
    {
        let documents = Arc::clone(&ctx.documents);
        let lsp = Arc::clone(&ctx.lsp);
        subs.push(ctx.bus.subscribe(
            topics::BUFFER_CONTENT_ALL,
            SubscribeOptions::async_(0),
            move |event| {
                let EventPayload::Buffer(change) = &event.payload else {
                    return;
                };
                if change.path.as_os_str().is_empty() {
                    return;
                }
                let Some(doc) = documents.get(&DocumentKey::Path(change.path.clone())) else {
                    return;
                };
                let Ok(uri) = Url::from_file_path(&change.path) else {
                    return;
                };
                if !doc.is_lsp_opened() {
                    return;
                }
                let lsp = Arc::clone(&lsp);
                let language = doc.language_id().to_string();
                let text = doc.text();
                tokio::spawn(async move {
                    if let Err(err) = lsp.change_document(&language, &uri, None, &text).await {
                        tracing::trace!(%language, %err, "lsp change not delivered");
                    }
                });
            },
        ));
    }

    // File lifecycle -> LSP didOpen/didClose.
    {
        let documents = Arc::clone(&ctx.documents);
        let lsp = Arc::clone(&ctx.lsp);
        let autostart = ctx.lsp_autostart;
        subs.push(ctx.bus.subscribe(
            topics::FILE_ALL,
            SubscribeOptions::async_(0),
            move |event| {
                let EventPayload::File(file_event) = &event.payload else {
                    return;
                };
                if file_event.path.as_os_str().is_empty() {
                    return;
                }
                let Ok(uri) = Url::from_file_path(&file_event.path) else {
                    return;
                };
                match file_event.action {
                    FileAction::Opened if autostart => {
                        let Some(doc) =
                            documents.get(&DocumentKey::Path(file_event.path.clone()))
                        else {
                            return;
                        };
                        let lsp = Arc::clone(&lsp);
                        let language = doc.language_id().to_string();
                        let text = doc.text();
                        tokio::spawn(async move {
                            match lsp.open_document(&language, &uri, &text).await {
                                Ok(()) => doc.set_lsp_opened(true),
                                Err(err) => {
                                    tracing::debug!(%language, %err, "lsp open not delivered")
                                }
                            }
                        });
                    }
                    FileAction::Closed => {
                        let lsp = Arc::clone(&lsp);
                        let path = file_event.path.clone();
                        tokio::spawn(async move {
                            let language = crate::document::language_for_path(&path);
                            if let Err(err) = lsp.close_document(language, &uri).await {
                                tracing::trace!(%language, %err, "lsp close not delivered");
                            }
                        });
                    }
                    _ => {}
                }
            },
        ));
    }

    // Config changes apply before any same-frame consumers (high priority).
    {
        let dirty = Arc::clone(&ctx.render_dirty);
        subs.push(ctx.bus.subscribe(
            topics::CONFIG_CHANGED_ALL,
            SubscribeOptions::sync(10),
            move |event| {
                if let EventPayload::Config(change) = &event.payload {
                    tracing::info!(key = %change.key, "configuration changed");
                }
                dirty.store(true, Ordering::Release);
            },
        ));
    }

    // Mode changes refresh the status line.
    {
        let dirty = Arc::clone(&ctx.render_dirty);
        subs.push(ctx.bus.subscribe(
            topics::MODE_CHANGED,
            SubscribeOptions::sync(0),
            move |_| {
                dirty.store(true, Ordering::Release);
            },
        ));
    }

    // Diagnostics feed the status view asynchronously.
    {
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let dirty = Arc::clone(&ctx.render_dirty);
        subs.push(ctx.bus.subscribe(
            topics::LSP_DIAGNOSTICS,
            SubscribeOptions::async_(0),
            move |event| {
                let EventPayload::Diagnostics(diag) = &event.payload else {
                    return;
                };
                let count = diag.diagnostics.as_array().map(Vec::len).unwrap_or(0);
                diagnostics
                    .lock()
                    .unwrap()
                    .insert(diag.path.clone(), count);
                dirty.store(true, Ordering::Release);
            },
        ));
    }

    // Saved files re-enter the project index.
    if let Some(indexer) = &ctx.indexer {
        let indexer = Arc::clone(indexer);
        subs.push(ctx.bus.subscribe(
            topics::FILE_ALL,
            SubscribeOptions::async_(-10),
            move |event| {
                let EventPayload::File(file_event) = &event.payload else {
                    return;
                };
                if file_event.action != FileAction::Saved {
                    return;
                }
                let indexer = Arc::clone(&indexer);
                let path = file_event.path.clone();
                tokio::spawn(async move {
                    if let Err(err) = indexer.process_change(ChangeEvent::Modified(path)).await {
                        tracing::debug!(%err, "reindex after save failed");
                    }
                });
            },
        ));
    }

    subs
}

/// Keep the dispatcher's engine and cursor capabilities pointed at the
/// active document.
pub fn wire_active_document(
    bus: &Arc<EventBus>,
    documents: &Arc<DocumentManager>,
    dispatcher: &Arc<crate::dispatch::Dispatcher>,
) -> Subscription {
    let documents = Arc::clone(documents);
    let dispatcher = Arc::clone(dispatcher);
    bus.subscribe(
        topics::DOCUMENT_ACTIVATED,
        SubscribeOptions::sync(0),
        move |_| {
            if let Some(doc) = documents.active() {
                dispatcher.set_engine(Arc::clone(&doc) as Arc<dyn Engine>);
                dispatcher.set_cursors(doc as Arc<dyn crate::engine::Cursors>);
            } else {
                dispatcher.clear_engine();
            }
        },
    )
}

/// Convenience used by the kernel when wiring happens after documents are
/// already open.
pub fn sync_active_document(
    documents: &Arc<DocumentManager>,
    dispatcher: &Arc<crate::dispatch::Dispatcher>,
) {
    if let Some(doc) = documents.active() {
        dispatcher.set_engine(Arc::clone(&doc) as Arc<dyn Engine>);
        dispatcher.set_cursors(doc as Arc<dyn crate::engine::Cursors>);
    }
}
