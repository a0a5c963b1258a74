//! Action dispatch: namespace routing and execution-context assembly.
//!
//! Handlers own a namespace (`editor` in `editor.insert`); single-action
//! functions can also be registered by full name and win over namespace
//! handlers. The capabilities a handler sees (engine, cursors, history,
//! mode manager) are swappable at runtime because the active document
//! changes under the dispatcher.

mod editor_handler;
mod history;

pub use editor_handler::{CursorHandler, EditorHandler};
pub use history::{AppliedEdit, History};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use keystorm_core::{Action, ActionResult};

use crate::engine::{Cursors, Engine};
use crate::metrics;
use crate::mode::ModeManager;
use crate::services::panic_message;

/// Capabilities assembled for one dispatch.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub engine: Option<Arc<dyn Engine>>,
    pub cursors: Option<Arc<dyn Cursors>>,
    pub history: Option<Arc<History>>,
    pub mode_manager: Option<Arc<ModeManager>>,
    /// Free-form input context supplied by `dispatch_with_context`.
    pub input: Option<serde_json::Value>,
}

pub trait ActionHandler: Send + Sync {
    /// The namespace this handler owns.
    fn namespace(&self) -> &str;

    fn handle(&self, action: &Action, ctx: &ExecutionContext) -> ActionResult;
}

type HandlerFn = Arc<dyn Fn(&Action, &ExecutionContext) -> ActionResult + Send + Sync>;

pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
    /// Full action name -> function, consulted before namespace handlers.
    fns: RwLock<HashMap<String, HandlerFn>>,
    engine: RwLock<Option<Arc<dyn Engine>>>,
    cursors: RwLock<Option<Arc<dyn Cursors>>>,
    history: RwLock<Option<Arc<History>>>,
    mode_manager: RwLock<Option<Arc<ModeManager>>>,
    recover_panics: AtomicBool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            fns: RwLock::new(HashMap::new()),
            engine: RwLock::new(None),
            cursors: RwLock::new(None),
            history: RwLock::new(None),
            mode_manager: RwLock::new(None),
            recover_panics: AtomicBool::new(true),
        }
    }

    /// Register a namespace handler. A duplicate registration replaces the
    /// previous handler (last wins) and logs the override.
    pub fn register_namespace(&self, handler: Arc<dyn ActionHandler>) {
        let namespace = handler.namespace().to_string();
        let previous = self
            .handlers
            .write()
            .unwrap()
            .insert(namespace.clone(), handler);
        if previous.is_some() {
            tracing::warn!(%namespace, "namespace handler replaced");
        }
    }

    /// Register a function for a single fully-qualified action name.
    pub fn register_handler_fn<F>(&self, name: &str, f: F)
    where
        F: Fn(&Action, &ExecutionContext) -> ActionResult + Send + Sync + 'static,
    {
        self.fns
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::new(f));
    }

    pub fn set_engine(&self, engine: Arc<dyn Engine>) {
        *self.engine.write().unwrap() = Some(engine);
    }

    pub fn clear_engine(&self) {
        *self.engine.write().unwrap() = None;
    }

    pub fn set_cursors(&self, cursors: Arc<dyn Cursors>) {
        *self.cursors.write().unwrap() = Some(cursors);
    }

    pub fn set_history(&self, history: Arc<History>) {
        *self.history.write().unwrap() = Some(history);
    }

    pub fn set_mode_manager(&self, modes: Arc<ModeManager>) {
        *self.mode_manager.write().unwrap() = Some(modes);
    }

    /// Whether handler panics are caught and converted to error results.
    pub fn set_recover_panics(&self, recover: bool) {
        self.recover_panics.store(recover, Ordering::SeqCst);
    }

    pub fn dispatch(&self, action: &Action) -> ActionResult {
        self.dispatch_with_context(action, None)
    }

    pub fn dispatch_with_context(
        &self,
        action: &Action,
        input: Option<serde_json::Value>,
    ) -> ActionResult {
        metrics::inc(&metrics::global().actions_dispatched);
        let ctx = ExecutionContext {
            engine: self.engine.read().unwrap().clone(),
            cursors: self.cursors.read().unwrap().clone(),
            history: self.history.read().unwrap().clone(),
            mode_manager: self.mode_manager.read().unwrap().clone(),
            input,
        };

        let by_name = self.fns.read().unwrap().get(&action.name).cloned();
        if let Some(f) = by_name {
            return self.invoke(action, || f(action, &ctx));
        }

        let handler = self
            .handlers
            .read()
            .unwrap()
            .get(action.namespace())
            .cloned();
        match handler {
            Some(handler) => self.invoke(action, || handler.handle(action, &ctx)),
            None => ActionResult::not_handled(),
        }
    }

    fn invoke<F>(&self, action: &Action, f: F) -> ActionResult
    where
        F: FnOnce() -> ActionResult,
    {
        if !self.recover_panics.load(Ordering::SeqCst) {
            return f();
        }
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                metrics::inc(&metrics::global().handler_panics);
                tracing::error!(action = %action.name, %message, "action handler panicked");
                ActionResult::error(format!("recovered panic: {message}"))
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
