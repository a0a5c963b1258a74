//! Language-server supervision: crash recovery with exponential backoff and
//! document re-synchronization.
//!
//! State machine: Idle -> Running on start; Running -> Restarting when the
//! monitor observes a server exit; Restarting -> Running once a fresh server
//! is up and the tracked documents have been replayed onto it; Restarting ->
//! Failed when the restart counter exceeds `max_restarts`; any state ->
//! Stopped on explicit stop, which is terminal. The state field is atomic so
//! readers never take a lock.
//!
//! Lock order: the server-management mutex is always acquired before the
//! document-tracking lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use keystorm_core::events::topics;
use keystorm_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use crate::bus::{EventBus, EventPayload};
use crate::metrics;

use super::server::{LanguageServer, ServerExit, ServerFactory, TextRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SupervisorState {
    Idle = 0,
    Running = 1,
    Restarting = 2,
    Failed = 3,
    Stopped = 4,
}

impl SupervisorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SupervisorState::Running,
            2 => SupervisorState::Restarting,
            3 => SupervisorState::Failed,
            4 => SupervisorState::Stopped,
            _ => SupervisorState::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_restarts: u32,
    /// A Running phase longer than this resets the restart counter.
    pub reset_window: Duration,
    /// Overall budget for replaying tracked documents after a restart.
    pub resync_budget: Duration,
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_restarts: 5,
            reset_window: Duration::from_secs(300),
            resync_budget: Duration::from_secs(30),
            event_capacity: 32,
        }
    }
}

/// Content shadow kept for post-crash replay. `content` reflects the most
/// recent full-sync replacement; ranged changes do not update it.
#[derive(Debug, Clone)]
pub struct TrackedDocument {
    pub language_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEventKind {
    Crash,
    Restarting,
    Recovered,
    Failed,
}

/// Best-effort notification emitted on the bounded event channel. Dropped
/// silently when the channel is full.
#[derive(Debug, Clone)]
pub struct SupervisorEvent {
    pub kind: SupervisorEventKind,
    pub language_id: String,
    pub error: Option<String>,
    pub attempt: u32,
    pub next_retry: Option<Duration>,
}

struct ServerSlot {
    current: Option<Arc<dyn LanguageServer>>,
    restart_count: u32,
    last_start: Option<Instant>,
    monitor: Option<JoinHandle<()>>,
}

pub struct Supervisor {
    language_id: String,
    config: SupervisorConfig,
    factory: Arc<dyn ServerFactory>,
    state: AtomicU8,
    /// Server management; acquired before `documents`.
    server: tokio::sync::Mutex<ServerSlot>,
    documents: RwLock<HashMap<Url, TrackedDocument>>,
    events_tx: mpsc::Sender<SupervisorEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SupervisorEvent>>>,
    stop_tx: watch::Sender<bool>,
    bus: RwLock<Option<Arc<EventBus>>>,
}

impl Supervisor {
    pub fn new(
        language_id: impl Into<String>,
        factory: Arc<dyn ServerFactory>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            language_id: language_id.into(),
            config,
            factory,
            state: AtomicU8::new(SupervisorState::Idle as u8),
            server: tokio::sync::Mutex::new(ServerSlot {
                current: None,
                restart_count: 0,
                last_start: None,
                monitor: None,
            }),
            documents: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            stop_tx,
            bus: RwLock::new(None),
        })
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Diagnostics from supervised servers are forwarded to this bus.
    pub fn set_bus(&self, bus: Arc<EventBus>) {
        *self.bus.write().unwrap() = Some(bus);
    }

    /// Lock-free state read.
    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Take the event channel receiver. Yields once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SupervisorEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub fn restart_count(&self) -> u32 {
        // Best-effort read for status display; the slot lock is only held
        // for bookkeeping updates.
        match self.server.try_lock() {
            Ok(slot) => slot.restart_count,
            Err(_) => 0,
        }
    }

    pub fn tracked_documents(&self) -> Vec<Url> {
        self.documents.read().unwrap().keys().cloned().collect()
    }

    /// Backoff delay before restart attempt `n` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.config.initial_backoff;
        }
        let exp = self.config.multiplier.powi(attempt as i32 - 1);
        let delay = self.config.initial_backoff.as_secs_f64() * exp;
        Duration::from_secs_f64(delay.min(self.config.max_backoff.as_secs_f64()))
    }

    /// Start the server and the exit monitor.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        match self.state() {
            SupervisorState::Idle => {}
            SupervisorState::Running | SupervisorState::Restarting => {
                return Err(Error::ServerAlreadyRunning)
            }
            SupervisorState::Stopped | SupervisorState::Failed => {
                return Err(Error::InvalidOperation(format!(
                    "supervisor for {} is {:?}",
                    self.language_id,
                    self.state()
                )))
            }
        }

        let spawned = self.factory.spawn().await?;
        spawned.server.initialize().await?;

        let mut slot = self.server.lock().await;
        slot.current = Some(Arc::clone(&spawned.server));
        slot.last_start = Some(Instant::now());
        self.spawn_diagnostics_forwarder(spawned.diagnostics);
        self.set_state(SupervisorState::Running);

        let monitor = tokio::spawn(Arc::clone(self).run_monitor(spawned.exit));
        slot.monitor = Some(monitor);
        tracing::info!(language = %self.language_id, "language server started");
        Ok(())
    }

    /// Stop supervision. Terminal and idempotent.
    pub async fn stop(&self) -> Result<()> {
        let prev = self
            .state
            .swap(SupervisorState::Stopped as u8, Ordering::AcqRel);
        if prev == SupervisorState::Stopped as u8 {
            return Ok(());
        }
        let _ = self.stop_tx.send(true);

        let (server, monitor) = {
            let mut slot = self.server.lock().await;
            (slot.current.take(), slot.monitor.take())
        };
        if let Some(server) = server {
            let _ = tokio::time::timeout(Duration::from_secs(2), server.shutdown()).await;
        }
        if let Some(monitor) = monitor {
            // The monitor observes the stop signal; give it a moment, then
            // abandon it.
            let _ = tokio::time::timeout(Duration::from_secs(1), monitor).await;
        }
        tracing::info!(language = %self.language_id, "language server supervision stopped");
        Ok(())
    }

    /// Track and forward a document open.
    pub async fn open_document(&self, uri: &Url, language_id: &str, text: &str) -> Result<()> {
        let slot = self.server.lock().await;
        self.documents.write().unwrap().insert(
            uri.clone(),
            TrackedDocument {
                language_id: language_id.to_string(),
                content: text.to_string(),
            },
        );
        match &slot.current {
            Some(server) => server.open_document(uri, language_id, text).await,
            None => Err(Error::ServerNotReady),
        }
    }

    /// Track and forward a document change. A change without a range is a
    /// full replacement and updates the tracked content; ranged changes are
    /// forwarded untracked.
    pub async fn change_document(
        &self,
        uri: &Url,
        range: Option<TextRange>,
        text: &str,
    ) -> Result<()> {
        let slot = self.server.lock().await;
        if range.is_none() {
            if let Some(doc) = self.documents.write().unwrap().get_mut(uri) {
                doc.content = text.to_string();
            }
        }
        match &slot.current {
            Some(server) => server.change_document(uri, range, text).await,
            None => Err(Error::ServerNotReady),
        }
    }

    /// Untrack and forward a document close.
    pub async fn close_document(&self, uri: &Url) -> Result<()> {
        let slot = self.server.lock().await;
        self.documents.write().unwrap().remove(uri);
        match &slot.current {
            Some(server) => server.close_document(uri).await,
            None => Err(Error::ServerNotReady),
        }
    }

    async fn run_monitor(self: Arc<Self>, mut exit_rx: oneshot::Receiver<ServerExit>) {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            let exit = tokio::select! {
                exit = &mut exit_rx => exit.unwrap_or_else(|_| ServerExit {
                    code: None,
                    message: "exit channel closed".to_string(),
                }),
                _ = stop_rx.changed() => return,
            };
            if self.state() == SupervisorState::Stopped {
                return;
            }
            tracing::warn!(
                language = %self.language_id,
                code = ?exit.code,
                message = %exit.message,
                "language server exited"
            );
            match self.recover(exit, &mut stop_rx).await {
                Some(next_exit) => exit_rx = next_exit,
                None => return,
            }
        }
    }

    /// Restart loop. Returns the new server's exit channel on recovery, or
    /// None when the supervisor reached Failed or Stopped.
    async fn recover(
        &self,
        exit: ServerExit,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Option<oneshot::Receiver<ServerExit>> {
        self.set_state(SupervisorState::Restarting);
        let mut crash_message = Some(exit.message);

        loop {
            if self.state() == SupervisorState::Stopped {
                return None;
            }

            let attempt = {
                let mut slot = self.server.lock().await;
                slot.current = None;
                if let Some(last_start) = slot.last_start {
                    if last_start.elapsed() > self.config.reset_window {
                        slot.restart_count = 0;
                    }
                }
                slot.restart_count += 1;
                slot.restart_count
            };

            self.emit(SupervisorEventKind::Crash, attempt, crash_message.take(), None);

            if attempt > self.config.max_restarts {
                self.set_state(SupervisorState::Failed);
                self.emit(SupervisorEventKind::Failed, attempt, None, None);
                tracing::error!(
                    language = %self.language_id,
                    attempts = attempt,
                    "language server gave up restarting"
                );
                return None;
            }

            let delay = self.backoff_delay(attempt);
            self.emit(SupervisorEventKind::Restarting, attempt, None, Some(delay));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => return None,
            }

            match self.respawn().await {
                Ok(mut new_exit) => {
                    // A server that is already gone counts as the next
                    // crash; recovery is only announced once the fresh
                    // server outlives the resync.
                    match new_exit.try_recv() {
                        Ok(exit) => {
                            crash_message = Some(exit.message);
                            continue;
                        }
                        Err(oneshot::error::TryRecvError::Closed) => {
                            crash_message = Some("exit channel closed".to_string());
                            continue;
                        }
                        Err(oneshot::error::TryRecvError::Empty) => {
                            self.set_state(SupervisorState::Running);
                            self.emit(SupervisorEventKind::Recovered, attempt, None, None);
                            tracing::info!(
                                language = %self.language_id,
                                attempt,
                                "language server recovered"
                            );
                            return Some(new_exit);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        language = %self.language_id,
                        attempt,
                        %err,
                        "restart attempt failed"
                    );
                    crash_message = Some(err.to_string());
                }
            }
        }
    }

    /// Spawn a fresh server and replay tracked documents onto it before it
    /// becomes current. No forward traffic reaches the new server until the
    /// replay is done.
    async fn respawn(&self) -> Result<oneshot::Receiver<ServerExit>> {
        let spawned = self.factory.spawn().await?;
        spawned.server.initialize().await?;
        self.resync(spawned.server.as_ref()).await;

        let mut slot = self.server.lock().await;
        slot.current = Some(Arc::clone(&spawned.server));
        slot.last_start = Some(Instant::now());
        drop(slot);

        self.spawn_diagnostics_forwarder(spawned.diagnostics);
        metrics::inc(&metrics::global().lsp_restarts);
        Ok(spawned.exit)
    }

    async fn resync(&self, server: &dyn LanguageServer) {
        let docs: Vec<(Url, TrackedDocument)> = self
            .documents
            .read()
            .unwrap()
            .iter()
            .map(|(uri, doc)| (uri.clone(), doc.clone()))
            .collect();
        if docs.is_empty() {
            return;
        }

        let replay = async {
            for (uri, doc) in &docs {
                if let Err(err) = server
                    .open_document(uri, &doc.language_id, &doc.content)
                    .await
                {
                    tracing::warn!(%uri, %err, "document resync failed");
                }
            }
        };
        if tokio::time::timeout(self.config.resync_budget, replay)
            .await
            .is_err()
        {
            tracing::warn!(
                language = %self.language_id,
                budget = ?self.config.resync_budget,
                "document resync exceeded its budget"
            );
        }
    }

    fn emit(
        &self,
        kind: SupervisorEventKind,
        attempt: u32,
        error: Option<String>,
        next_retry: Option<Duration>,
    ) {
        let event = SupervisorEvent {
            kind,
            language_id: self.language_id.clone(),
            error,
            attempt,
            next_retry,
        };
        // Best effort: full channel drops the notification.
        let _ = self.events_tx.try_send(event);
    }

    fn spawn_diagnostics_forwarder(
        &self,
        diagnostics: Option<mpsc::UnboundedReceiver<keystorm_core::events::DiagnosticsEvent>>,
    ) {
        let Some(mut diagnostics) = diagnostics else {
            return;
        };
        let Some(bus) = self.bus.read().unwrap().clone() else {
            return;
        };
        tokio::spawn(async move {
            while let Some(event) = diagnostics.recv().await {
                if bus
                    .publish(topics::LSP_DIAGNOSTICS, EventPayload::Diagnostics(event))
                    .is_err()
                {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::server::SpawnedServer;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    /// Records document traffic per spawned instance.
    struct FakeServer {
        spawn_index: usize,
        log: Arc<Mutex<Vec<(usize, String, String)>>>,
    }

    #[async_trait]
    impl LanguageServer for FakeServer {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn request(&self, _: &str, _: Value, _: Duration) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn open_document(&self, uri: &Url, _language_id: &str, text: &str) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((self.spawn_index, uri.to_string(), text.to_string()));
            Ok(())
        }

        async fn change_document(
            &self,
            uri: &Url,
            _range: Option<TextRange>,
            text: &str,
        ) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((self.spawn_index, uri.to_string(), text.to_string()));
            Ok(())
        }

        async fn close_document(&self, _: &Url) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeFactory {
        spawns: AtomicUsize,
        /// Spawns with index < this value exit immediately.
        immediate_exits: usize,
        log: Arc<Mutex<Vec<(usize, String, String)>>>,
        exit_controls: Mutex<Vec<oneshot::Sender<ServerExit>>>,
    }

    impl FakeFactory {
        fn new(immediate_exits: usize) -> Arc<Self> {
            Arc::new(Self {
                spawns: AtomicUsize::new(0),
                immediate_exits,
                log: Arc::new(Mutex::new(Vec::new())),
                exit_controls: Mutex::new(Vec::new()),
            })
        }

        fn spawn_count(&self) -> usize {
            self.spawns.load(Ordering::SeqCst)
        }

        /// Crash the most recent surviving server.
        fn crash_current(&self) {
            if let Some(tx) = self.exit_controls.lock().unwrap().pop() {
                let _ = tx.send(ServerExit {
                    code: Some(1),
                    message: "induced crash".to_string(),
                });
            }
        }
    }

    #[async_trait]
    impl ServerFactory for FakeFactory {
        async fn spawn(&self) -> Result<SpawnedServer> {
            let index = self.spawns.fetch_add(1, Ordering::SeqCst);
            let (exit_tx, exit_rx) = oneshot::channel();
            if index < self.immediate_exits {
                let _ = exit_tx.send(ServerExit {
                    code: Some(1),
                    message: format!("spawn {index} exited immediately"),
                });
            } else {
                self.exit_controls.lock().unwrap().push(exit_tx);
            }
            Ok(SpawnedServer {
                server: Arc::new(FakeServer {
                    spawn_index: index,
                    log: Arc::clone(&self.log),
                }),
                exit: exit_rx,
                diagnostics: None,
            })
        }
    }

    fn fast_config(max_restarts: u32) -> SupervisorConfig {
        SupervisorConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_restarts,
            reset_window: Duration::from_secs(300),
            resync_budget: Duration::from_secs(30),
            event_capacity: 32,
        }
    }

    async fn collect_until_terminal(
        events: &mut mpsc::Receiver<SupervisorEvent>,
        terminal: SupervisorEventKind,
    ) -> Vec<SupervisorEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for supervisor event")
                .expect("event channel closed");
            let kind = event.kind;
            seen.push(event);
            if kind == terminal {
                return seen;
            }
        }
    }

    #[test]
    fn test_backoff_delays() {
        let supervisor = Supervisor::new(
            "rust",
            FakeFactory::new(0),
            SupervisorConfig::default(),
        );
        assert_eq!(supervisor.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(supervisor.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(supervisor.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(supervisor.backoff_delay(3), Duration::from_secs(4));
        // Clamped to the maximum
        assert_eq!(supervisor.backoff_delay(30), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_loop_produces_spec_event_sequence() {
        let factory = FakeFactory::new(usize::MAX);
        let supervisor = Supervisor::new("go", Arc::clone(&factory) as Arc<dyn ServerFactory>, fast_config(2));
        let mut events = supervisor.take_events().unwrap();

        supervisor.start().await.unwrap();

        let seen = collect_until_terminal(&mut events, SupervisorEventKind::Failed).await;
        let summary: Vec<(SupervisorEventKind, u32)> =
            seen.iter().map(|e| (e.kind, e.attempt)).collect();
        assert_eq!(
            summary,
            vec![
                (SupervisorEventKind::Crash, 1),
                (SupervisorEventKind::Restarting, 1),
                (SupervisorEventKind::Crash, 2),
                (SupervisorEventKind::Restarting, 2),
                (SupervisorEventKind::Crash, 3),
                (SupervisorEventKind::Failed, 3),
            ]
        );

        assert_eq!(supervisor.state(), SupervisorState::Failed);
        // Restart delays follow the exponential schedule
        assert_eq!(seen[1].next_retry, Some(Duration::from_millis(10)));
        assert_eq!(seen[3].next_retry, Some(Duration::from_millis(20)));
        // Initial spawn plus max_restarts attempts, never more
        assert_eq!(factory.spawn_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_restarts_after_failed() {
        let factory = FakeFactory::new(usize::MAX);
        let supervisor = Supervisor::new("go", Arc::clone(&factory) as Arc<dyn ServerFactory>, fast_config(1));
        let mut events = supervisor.take_events().unwrap();

        supervisor.start().await.unwrap();
        collect_until_terminal(&mut events, SupervisorEventKind::Failed).await;

        let spawns = factory.spawn_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(factory.spawn_count(), spawns, "failed supervisor must not respawn");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_documents_replay_before_recovery() {
        let factory = FakeFactory::new(0);
        let supervisor = Supervisor::new(
            "rust",
            Arc::clone(&factory) as Arc<dyn ServerFactory>,
            fast_config(5),
        );
        let mut events = supervisor.take_events().unwrap();
        supervisor.start().await.unwrap();

        let uri_a = Url::parse("file:///tmp/a.rs").unwrap();
        let uri_b = Url::parse("file:///tmp/b.rs").unwrap();
        supervisor.open_document(&uri_a, "rust", "fn a() {}").await.unwrap();
        supervisor.open_document(&uri_b, "rust", "fn b() {}").await.unwrap();

        factory.crash_current();
        let seen = collect_until_terminal(&mut events, SupervisorEventKind::Recovered).await;
        assert_eq!(seen.last().unwrap().kind, SupervisorEventKind::Recovered);
        assert_eq!(supervisor.state(), SupervisorState::Running);

        // Both documents were replayed onto the second spawn (index 1)
        let log = factory.log.lock().unwrap();
        let replayed: Vec<&String> = log
            .iter()
            .filter(|(spawn, _, _)| *spawn == 1)
            .map(|(_, uri, _)| uri)
            .collect();
        assert_eq!(replayed.len(), 2);
        assert!(replayed.iter().any(|u| u.ends_with("a.rs")));
        assert!(replayed.iter().any(|u| u.ends_with("b.rs")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_window_clears_restart_counter() {
        let factory = FakeFactory::new(0);
        let mut config = fast_config(2);
        config.reset_window = Duration::from_secs(10);
        let supervisor = Supervisor::new("rust", Arc::clone(&factory) as Arc<dyn ServerFactory>, config);
        let mut events = supervisor.take_events().unwrap();
        supervisor.start().await.unwrap();

        factory.crash_current();
        let seen = collect_until_terminal(&mut events, SupervisorEventKind::Recovered).await;
        assert_eq!(seen[0].attempt, 1);

        // Outlive the reset window, then crash again: the counter restarts.
        tokio::time::sleep(Duration::from_secs(11)).await;
        factory.crash_current();
        let seen = collect_until_terminal(&mut events, SupervisorEventKind::Recovered).await;
        assert_eq!(seen[0].kind, SupervisorEventKind::Crash);
        assert_eq!(seen[0].attempt, 1, "counter resets after a long Running phase");
    }

    #[tokio::test]
    async fn test_open_before_start_tracks_but_not_ready() {
        let factory = FakeFactory::new(0);
        let supervisor = Supervisor::new(
            "rust",
            Arc::clone(&factory) as Arc<dyn ServerFactory>,
            SupervisorConfig::default(),
        );

        let uri = Url::parse("file:///tmp/a.rs").unwrap();
        let err = supervisor
            .open_document(&uri, "rust", "fn a() {}")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServerNotReady));
        assert_eq!(supervisor.tracked_documents(), vec![uri]);
    }

    #[tokio::test]
    async fn test_full_change_updates_tracked_content_ranged_does_not() {
        let factory = FakeFactory::new(0);
        let supervisor = Supervisor::new(
            "rust",
            Arc::clone(&factory) as Arc<dyn ServerFactory>,
            SupervisorConfig::default(),
        );
        supervisor.start().await.unwrap();

        let uri = Url::parse("file:///x.go").unwrap();
        supervisor.open_document(&uri, "go", "func hello() {}").await.unwrap();

        supervisor
            .change_document(&uri, None, "func greet() {}")
            .await
            .unwrap();
        {
            let docs = supervisor.documents.read().unwrap();
            assert_eq!(docs.get(&uri).unwrap().content, "func greet() {}");
        }

        let range = TextRange {
            start_line: 0,
            start_character: 5,
            end_line: 0,
            end_character: 10,
        };
        supervisor
            .change_document(&uri, Some(range), "shout")
            .await
            .unwrap();
        {
            let docs = supervisor.documents.read().unwrap();
            assert_eq!(
                docs.get(&uri).unwrap().content,
                "func greet() {}",
                "ranged changes must not touch the shadow copy"
            );
        }
    }

    #[tokio::test]
    async fn test_stop_is_terminal_and_idempotent() {
        let factory = FakeFactory::new(0);
        let supervisor = Supervisor::new(
            "rust",
            Arc::clone(&factory) as Arc<dyn ServerFactory>,
            SupervisorConfig::default(),
        );
        supervisor.start().await.unwrap();

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        assert!(matches!(supervisor.start().await, Err(Error::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_start_twice_is_already_running() {
        let factory = FakeFactory::new(0);
        let supervisor = Supervisor::new(
            "rust",
            Arc::clone(&factory) as Arc<dyn ServerFactory>,
            SupervisorConfig::default(),
        );
        supervisor.start().await.unwrap();
        assert!(matches!(
            supervisor.start().await,
            Err(Error::ServerAlreadyRunning)
        ));
        supervisor.stop().await.unwrap();
    }
}
