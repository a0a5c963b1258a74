//! The application kernel: bootstrap ordering, the frame-driven event loop,
//! input handling, and shutdown.
//!
//! The loop is single-threaded and cooperative: it selects over the
//! shutdown signal, the bounded input channel fed by a dedicated polling
//! task, and the frame ticker. Everything else (async bus delivery, LSP
//! monitors, index workers) runs on its own task and talks back through
//! channels or the bus.

pub mod hooks;
mod subscriptions;

pub use hooks::{HookRegistry, LifecycleEvent};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use keystorm_core::{Action, ActionStatus, Error, Result};
use tokio::sync::{mpsc, watch};

use crate::bus::{EventBus, Subscription};
use crate::config::Config;
use crate::dispatch::{CursorHandler, Dispatcher, EditorHandler, History};
use crate::document::DocumentManager;
use crate::engine::Engine;
use crate::index::{Indexer, IndexerStatus};
use crate::lsp::LspManager;
use crate::metrics;
use crate::mode::{register_default_modes, ModeContext, ModeManager, UnmappedResult};
use crate::terminal::{Backend, BackendEvent, Frame};

/// Capacity of the channel between the input poller and the event loop.
const INPUT_CHANNEL_CAPACITY: usize = 100;
/// Overall budget for tearing down subordinate components.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

const STATE_CREATED: u8 = 0;
const STATE_BOOTSTRAPPED: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_SHUT_DOWN: u8 = 3;

/// Why the event loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A quit action ended the loop.
    Quit,
    /// The shutdown signal ended the loop.
    ShutdownSignal,
}

/// Teardown steps registered during bootstrap, executed in reverse order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownStep {
    Bus,
    Indexer,
    Lsp,
    Subscriptions,
}

pub struct Kernel {
    config: Config,
    bus: Arc<EventBus>,
    documents: Arc<DocumentManager>,
    modes: Arc<ModeManager>,
    dispatcher: Arc<Dispatcher>,
    lsp: Arc<LspManager>,
    indexer: Mutex<Option<Arc<Indexer>>>,
    plugins: HookRegistry,
    integrations: HookRegistry,
    backend: Arc<Mutex<Box<dyn Backend>>>,
    state: AtomicU8,
    quit: AtomicBool,
    render_dirty: Arc<AtomicBool>,
    diagnostics: Arc<Mutex<HashMap<PathBuf, usize>>>,
    status_message: Mutex<Option<String>>,
    subscriptions: Mutex<Vec<Subscription>>,
    teardown: Mutex<Vec<TeardownStep>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Kernel {
    pub fn new(config: Config, backend: Box<dyn Backend>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            lsp: Arc::new(LspManager::new(config.supervisor_config())),
            config,
            bus: EventBus::new(),
            documents: Arc::new(DocumentManager::new()),
            modes: Arc::new(ModeManager::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            indexer: Mutex::new(None),
            plugins: HookRegistry::new("plugins"),
            integrations: HookRegistry::new("integrations"),
            backend: Arc::new(Mutex::new(backend)),
            state: AtomicU8::new(STATE_CREATED),
            quit: AtomicBool::new(false),
            render_dirty: Arc::new(AtomicBool::new(true)),
            diagnostics: Arc::new(Mutex::new(HashMap::new())),
            status_message: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            teardown: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn documents(&self) -> &Arc<DocumentManager> {
        &self.documents
    }

    pub fn modes(&self) -> &Arc<ModeManager> {
        &self.modes
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn lsp(&self) -> &Arc<LspManager> {
        &self.lsp
    }

    pub fn indexer(&self) -> Option<Arc<Indexer>> {
        self.indexer.lock().unwrap().clone()
    }

    pub fn plugins(&self) -> &HookRegistry {
        &self.plugins
    }

    pub fn integrations(&self) -> &HookRegistry {
        &self.integrations
    }

    pub fn status_message(&self) -> Option<String> {
        self.status_message.lock().unwrap().clone()
    }

    fn set_status(&self, message: impl Into<String>) {
        *self.status_message.lock().unwrap() = Some(message.into());
        self.render_dirty.store(true, Ordering::Release);
    }

    /// Bring every component up in dependency order. Each successful step
    /// registers its teardown; a fatal failure leaves already-started
    /// components for `shutdown` to unwind. Non-fatal steps (project index,
    /// LSP registration) log and continue with the capability disabled.
    pub async fn bootstrap(
        self: &Arc<Self>,
        initial_files: &[PathBuf],
        project_root: Option<PathBuf>,
    ) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != STATE_CREATED {
            return Err(Error::AlreadyRunning);
        }

        self.backend
            .lock()
            .unwrap()
            .init()
            .map_err(|e| Error::Initialization {
                component: "backend".into(),
                reason: e.to_string(),
            })?;

        // 1. Event bus
        self.bus.start().map_err(|e| Error::Initialization {
            component: "event bus".into(),
            reason: e.to_string(),
        })?;
        self.teardown.lock().unwrap().push(TeardownStep::Bus);

        // 2. Configuration is already resolved; log the effective core knobs.
        tracing::info!(
            fps = self.config.editor.target_fps,
            lsp_servers = self.config.lsp.servers.len(),
            "configuration loaded"
        );

        // 3. Mode machine
        register_default_modes(&self.modes);
        self.modes.set_bus(Arc::clone(&self.bus));
        self.modes
            .set_initial("normal")
            .map_err(|e| Error::Initialization {
                component: "mode manager".into(),
                reason: e.to_string(),
            })?;

        // 4. Dispatcher and default handlers
        self.dispatcher
            .register_namespace(Arc::new(EditorHandler::new()));
        self.dispatcher.register_namespace(Arc::new(CursorHandler));
        self.dispatcher.set_history(Arc::new(History::new()));
        self.dispatcher.set_mode_manager(Arc::clone(&self.modes));
        {
            let documents = Arc::clone(&self.documents);
            self.dispatcher.register_handler_fn("file.save", move |_, _| {
                let Some(doc) = documents.active() else {
                    return keystorm_core::ActionResult::error(
                        Error::NoActiveDocument.to_string(),
                    );
                };
                match documents.save(&doc.key().clone()) {
                    Ok(()) => keystorm_core::ActionResult::ok().with_message("saved"),
                    Err(err) => keystorm_core::ActionResult::error(err.to_string()),
                }
            });
        }
        self.dispatcher.register_handler_fn("command.run", |action, _| {
            let cmd = action.args.text.as_deref().unwrap_or_default();
            keystorm_core::ActionResult::error(format!("unknown command: {cmd}"))
        });

        // 5. Optional project index
        if let Some(root) = &project_root {
            if self.config.index.enabled {
                match Indexer::new(
                    self.config.indexer_config(),
                    Arc::new(crate::index::FileIndex::new()),
                    Arc::new(crate::index::ContentIndex::with_defaults()),
                ) {
                    Ok(indexer) => {
                        *self.indexer.lock().unwrap() = Some(Arc::clone(&indexer));
                        self.teardown.lock().unwrap().push(TeardownStep::Indexer);
                        let root = root.clone();
                        tokio::spawn(async move {
                            if let Err(err) = indexer.index_all(&[root]).await {
                                tracing::warn!(%err, "project indexing failed");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(%err, "project index disabled");
                    }
                }
            }
        }

        // 6. LSP manager with configured servers (started lazily per language)
        self.lsp.set_bus(Arc::clone(&self.bus));
        self.lsp.register_configured(&self.config.lsp.servers);
        self.teardown.lock().unwrap().push(TeardownStep::Lsp);

        // 7 & 8. Plugin and integration lifecycle hooks have nothing to
        // start; they fire once bootstrap completes.

        // 9. Documents
        self.documents.set_bus(Arc::clone(&self.bus));
        for path in initial_files {
            if let Err(err) = self.documents.open(path) {
                tracing::warn!(path = %path.display(), %err, "could not open initial file");
                self.set_status(err.to_string());
            }
        }
        if self.documents.count() == 0 {
            self.documents.create_scratch();
        }

        // Event subscriptions wire the components together last.
        let wiring = subscriptions::WiringContext {
            bus: Arc::clone(&self.bus),
            documents: Arc::clone(&self.documents),
            lsp: Arc::clone(&self.lsp),
            indexer: self.indexer(),
            lsp_autostart: self.config.lsp.autostart,
            render_dirty: Arc::clone(&self.render_dirty),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let mut subs = subscriptions::wire_subscriptions(&wiring);
        subs.push(subscriptions::wire_active_document(
            &self.bus,
            &self.documents,
            &self.dispatcher,
        ));
        *self.subscriptions.lock().unwrap() = subs;
        self.teardown
            .lock()
            .unwrap()
            .push(TeardownStep::Subscriptions);
        subscriptions::sync_active_document(&self.documents, &self.dispatcher);

        self.plugins.run_hooks(LifecycleEvent::BootstrapComplete);
        self.integrations.run_hooks(LifecycleEvent::BootstrapComplete);

        self.state.store(STATE_BOOTSTRAPPED, Ordering::SeqCst);
        tracing::info!("kernel bootstrap complete");
        Ok(())
    }

    /// Run the event loop until a quit action or the shutdown signal.
    pub async fn run(self: &Arc<Self>) -> Result<RunOutcome> {
        match self.state.compare_exchange(
            STATE_BOOTSTRAPPED,
            STATE_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Err(Error::AlreadyRunning),
            Err(_) => return Err(Error::NotRunning),
        }

        let (input_tx, mut input_rx) = mpsc::channel::<BackendEvent>(INPUT_CHANNEL_CAPACITY);
        let poller = self.spawn_input_poller(input_tx);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.frame_duration());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();

        let outcome = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break RunOutcome::ShutdownSignal,
                event = input_rx.recv() => {
                    match event {
                        Some(event) => self.process_input(event).await,
                        None => break RunOutcome::ShutdownSignal,
                    }
                    if self.quit.load(Ordering::SeqCst) {
                        break RunOutcome::Quit;
                    }
                }
                _ = ticker.tick() => {
                    let delta = last_frame.elapsed();
                    last_frame = Instant::now();
                    self.on_frame_tick(delta);
                }
            }
        };

        // Unblock and retire the poller.
        let _ = self.shutdown_tx.send(true);
        drop(input_rx);
        let _ = tokio::time::timeout(Duration::from_millis(200), poller).await;

        tracing::info!(?outcome, "event loop finished");
        Ok(outcome)
    }

    fn spawn_input_poller(
        self: &Arc<Self>,
        input_tx: mpsc::Sender<BackendEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::task::spawn_blocking(move || {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let polled = backend
                    .lock()
                    .unwrap()
                    .poll_event(Duration::from_millis(10));
                match polled {
                    Ok(Some(event)) => {
                        if input_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(%err, "input poll failed");
                        std::thread::sleep(Duration::from_millis(50));
                    }
                }
            }
        })
    }

    /// Translate one backend event and route it through the mode machine
    /// and dispatcher.
    pub async fn process_input(self: &Arc<Self>, event: BackendEvent) {
        match event {
            BackendEvent::Key(key) => {
                metrics::inc(&metrics::global().keys_processed);
                let Some(mode) = self.modes.current() else {
                    return;
                };
                let ctx = {
                    let active = self.documents.active();
                    ModeContext {
                        has_document: active.is_some(),
                        read_only: active.map(|d| d.is_read_only()).unwrap_or(false),
                    }
                };
                match mode.handle_key(&key, &ctx) {
                    UnmappedResult::Action(action) => self.handle_action(action).await,
                    UnmappedResult::InsertText(text) => self.insert_text(&text),
                    UnmappedResult::None => {}
                }
                self.render_dirty.store(true, Ordering::Release);
            }
            BackendEvent::Paste(text) => {
                self.insert_text(&text);
                self.render_dirty.store(true, Ordering::Release);
            }
            BackendEvent::Resize { .. } => {
                self.render_dirty.store(true, Ordering::Release);
            }
            BackendEvent::Mouse { .. } | BackendEvent::Focus(_) => {}
        }
    }

    /// Route an action: mode changes and quit are intercepted here, the
    /// rest goes through the dispatcher.
    pub async fn handle_action(self: &Arc<Self>, action: Action) {
        if let Some(target) = action.mode_switch_target() {
            if let Err(err) = self.modes.switch(target) {
                tracing::warn!(%target, %err, "mode switch failed");
                self.set_status(err.to_string());
            }
            return;
        }
        if action.is_quit() {
            let force = action.name == "app.quit!";
            if let Err(err) = self.try_quit(force) {
                self.set_status(err.to_string());
            }
            return;
        }

        let result = self.dispatcher.dispatch(&action);
        match result.status {
            Some(ActionStatus::Ok) => {
                // A decorated success on an editing action is evidence the
                // document changed, even if the handler bypassed the engine.
                if action.is_editing_action() && !result.edits.is_empty() {
                    if let Some(doc) = self.documents.active() {
                        doc.set_modified(true);
                    }
                }
                if let Some(message) = result.message {
                    self.set_status(message);
                }
            }
            Some(ActionStatus::Error) => {
                let message = result
                    .error
                    .or(result.message)
                    .unwrap_or_else(|| "action failed".to_string());
                tracing::warn!(action = %action.name, %message, "action error");
                self.set_status(message);
            }
            Some(ActionStatus::NotHandled) | None => {
                tracing::debug!(action = %action.name, "action not handled");
            }
        }
    }

    /// Insert literal text at the primary cursor of the active document.
    /// No-op when there is no document, the document is read-only, or it
    /// has no cursor.
    pub fn insert_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let Some(doc) = self.documents.active() else {
            return;
        };
        if doc.is_read_only() {
            return;
        }
        let Some(cursor) = doc.cursor() else {
            return;
        };
        match doc.insert(cursor, text) {
            Ok(_) => doc.set_cursor(cursor + text.len()),
            Err(err) => {
                tracing::warn!(%err, "text insert failed");
                self.set_status(err.to_string());
            }
        }
    }

    /// Quit unless unsaved changes exist; `force` overrides.
    pub fn try_quit(&self, force: bool) -> Result<()> {
        if !force {
            let dirty = self.documents.dirty_documents().len();
            if dirty > 0 {
                return Err(Error::UnsavedChanges(dirty));
            }
        }
        self.quit.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_frame_tick(&self, _delta: Duration) {
        if !self.render_dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let frame = self.compose_frame();
        if let Err(err) = self.backend.lock().unwrap().draw(&frame) {
            tracing::warn!(%err, "draw failed");
        }
        metrics::inc(&metrics::global().frames_rendered);
    }

    /// Build the frame for the current active document and mode.
    pub fn compose_frame(&self) -> Frame {
        let (_, height) = self
            .backend
            .lock()
            .unwrap()
            .size()
            .unwrap_or((80, 24));
        let text_rows = height.saturating_sub(1) as usize;

        let mode = self.modes.current();
        let mode_label = mode
            .as_ref()
            .map(|m| m.display_name().to_string())
            .unwrap_or_default();

        let (lines, doc_label, cursor) = match self.documents.active() {
            Some(doc) => {
                let marker = if doc.is_modified() { " [+]" } else { "" };
                let label = format!("{}{}", doc.display_name(), marker);
                let cursor = doc
                    .cursor_point()
                    .map(|(line, col)| (col as u16, line as u16));
                (doc.visible_lines(text_rows), label, cursor)
            }
            None => (Vec::new(), String::from("[no document]"), None),
        };

        let diagnostics: usize = self.diagnostics.lock().unwrap().values().sum();
        let mut status = format!("-- {mode_label} -- {doc_label}");
        if diagnostics > 0 {
            status.push_str(&format!("  !{diagnostics}"));
        }
        if let Some(message) = self.status_message() {
            status.push_str("  ");
            status.push_str(&message);
        }

        Frame {
            lines,
            status,
            cursor,
            cursor_style: mode.map(|m| m.cursor_style()),
        }
    }

    /// Tear down in reverse bootstrap order within the shutdown budget.
    /// Idempotent; stragglers past the budget are abandoned.
    pub async fn shutdown(self: &Arc<Self>) -> Result<()> {
        let prev = self.state.swap(STATE_SHUT_DOWN, Ordering::SeqCst);
        if prev == STATE_SHUT_DOWN {
            return Ok(());
        }

        self.plugins.run_hooks(LifecycleEvent::BeforeShutdown);
        self.integrations.run_hooks(LifecycleEvent::BeforeShutdown);

        let _ = self.shutdown_tx.send(true);
        let deadline = Instant::now() + SHUTDOWN_BUDGET;
        let remaining = |deadline: Instant| deadline.saturating_duration_since(Instant::now());

        let steps: Vec<TeardownStep> = {
            let mut teardown = self.teardown.lock().unwrap();
            teardown.drain(..).rev().collect()
        };
        for step in steps {
            match step {
                TeardownStep::Subscriptions => {
                    let subs: Vec<Subscription> =
                        self.subscriptions.lock().unwrap().drain(..).collect();
                    for sub in subs {
                        self.bus.unsubscribe(sub);
                    }
                }
                TeardownStep::Lsp => {
                    self.lsp.shutdown_all(remaining(deadline)).await;
                }
                TeardownStep::Indexer => {
                    if let Some(indexer) = self.indexer() {
                        indexer.stop();
                        debug_assert_eq!(indexer.status(), IndexerStatus::Stopped);
                    }
                }
                TeardownStep::Bus => {
                    if let Err(err) = self.bus.stop(remaining(deadline)).await {
                        tracing::warn!(%err, "event bus did not drain in time");
                    }
                }
            }
        }

        if let Err(err) = self.backend.lock().unwrap().shutdown() {
            tracing::warn!(%err, "backend shutdown failed");
        }
        tracing::info!("kernel shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::TestBackend;
    use keystorm_core::events::{topics, ModeChange};
    use keystorm_core::{KeyCode, KeyEvent, Modifiers};

    async fn booted_kernel(files: &[PathBuf]) -> Arc<Kernel> {
        let mut config = Config::default();
        config.lsp.autostart = false;
        let backend = TestBackend::new((80, 24));
        let kernel = Kernel::new(config, Box::new(backend));
        kernel.bootstrap(files, None).await.unwrap();
        kernel
    }

    #[tokio::test]
    async fn test_bootstrap_with_no_files_creates_scratch() {
        let kernel = booted_kernel(&[]).await;
        assert_eq!(kernel.documents().count(), 1);
        let active = kernel.documents().active().unwrap();
        assert_eq!(active.display_name(), "Untitled");
        assert!(kernel.modes().is_mode("normal"));
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_twice_fails() {
        let kernel = booted_kernel(&[]).await;
        let err = kernel.bootstrap(&[], None).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mode_action_is_intercepted() {
        let kernel = booted_kernel(&[]).await;

        let seen = Arc::new(Mutex::new(Vec::<ModeChange>::new()));
        let sink = Arc::clone(&seen);
        kernel.bus().subscribe(
            topics::MODE_CHANGED,
            crate::bus::SubscribeOptions::sync(0),
            move |event| {
                if let crate::bus::EventPayload::Mode(change) = &event.payload {
                    sink.lock().unwrap().push(change.clone());
                }
            },
        );

        // 'i' in normal mode resolves to mode.insert, which the kernel
        // translates into a mode switch rather than a dispatch.
        kernel
            .process_input(BackendEvent::Key(KeyEvent::rune('i')))
            .await;
        assert!(kernel.modes().is_mode("insert"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].previous_mode, "normal");
        assert_eq!(seen[0].current_mode, "insert");
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_mode_types_into_active_document() {
        let kernel = booted_kernel(&[]).await;
        kernel
            .process_input(BackendEvent::Key(KeyEvent::rune('i')))
            .await;
        for c in "hi".chars() {
            kernel
                .process_input(BackendEvent::Key(KeyEvent::rune(c)))
                .await;
        }

        let doc = kernel.documents().active().unwrap();
        assert_eq!(doc.text(), "hi");
        assert!(doc.is_modified());
        assert_eq!(doc.revision(), 2);
        assert_eq!(doc.cursor(), Some(2));
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_only_document_ignores_literal_text() {
        let kernel = booted_kernel(&[]).await;
        let doc = kernel.documents().active().unwrap();
        doc.set_read_only(true);

        kernel.insert_text("nope");
        assert_eq!(doc.text(), "");
        assert!(!doc.is_modified());
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_quit_with_dirty_document_requires_force() {
        let kernel = booted_kernel(&[]).await;
        let doc = kernel.documents().active().unwrap();
        doc.insert(0, "unsaved").unwrap();

        let err = kernel.try_quit(false).unwrap_err();
        assert!(matches!(err, Error::UnsavedChanges(1)));
        assert!(!kernel.quit.load(Ordering::SeqCst));

        kernel.try_quit(true).unwrap();
        assert!(kernel.quit.load(Ordering::SeqCst));
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_quit_action_via_command_mode() {
        let kernel = booted_kernel(&[]).await;
        // :q<Enter>
        kernel
            .process_input(BackendEvent::Key(KeyEvent::rune(':')))
            .await;
        assert!(kernel.modes().is_mode("command"));
        kernel
            .process_input(BackendEvent::Key(KeyEvent::rune('q')))
            .await;
        kernel
            .process_input(BackendEvent::Key(KeyEvent::new(
                KeyCode::Enter,
                Modifiers::NONE,
            )))
            .await;
        assert!(kernel.quit.load(Ordering::SeqCst));
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let kernel = booted_kernel(&[]).await;
        kernel.shutdown().await.unwrap();
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_compose_frame_shows_mode_and_document() {
        let kernel = booted_kernel(&[]).await;
        let doc = kernel.documents().active().unwrap();
        doc.insert(0, "line one\nline two").unwrap();

        let frame = kernel.compose_frame();
        assert_eq!(frame.lines[0], "line one");
        assert_eq!(frame.lines[1], "line two");
        assert!(frame.status.contains("NORMAL"));
        assert!(frame.status.contains("Untitled"));
        assert!(frame.status.contains("[+]"), "status: {}", frame.status);
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_editing_action_marks_dirty_via_dispatch() {
        let kernel = booted_kernel(&[]).await;
        let doc = kernel.documents().active().unwrap();
        doc.insert(0, "abc").unwrap();
        doc.set_modified(false);
        doc.set_cursor(0);

        kernel
            .handle_action(Action::new("editor.delete"))
            .await;
        assert_eq!(doc.text(), "bc");
        assert!(doc.is_modified());
        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_quits_on_scripted_keys() {
        let mut config = Config::default();
        config.lsp.autostart = false;
        let backend = TestBackend::new((80, 24));
        // Script ":q!" + Enter before the loop starts.
        backend.push_key(KeyCode::Rune(':'), Modifiers::NONE);
        backend.push_key(KeyCode::Rune('q'), Modifiers::NONE);
        backend.push_key(KeyCode::Rune('!'), Modifiers::NONE);
        backend.push_key(KeyCode::Enter, Modifiers::NONE);

        let kernel = Kernel::new(config, Box::new(backend));
        kernel.bootstrap(&[], None).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), kernel.run())
            .await
            .expect("run loop did not quit")
            .unwrap();
        assert_eq!(outcome, RunOutcome::Quit);
        kernel.shutdown().await.unwrap();
    }
}
