//! The modal state machine.
//!
//! A [`Mode`] decides what an unmapped key means: an action to dispatch,
//! literal text to insert, or nothing. The [`ModeManager`] holds the
//! registered modes and the single current mode; there is no mode stack.

mod defaults;

pub use defaults::{register_default_modes, CommandMode, InsertMode, NormalMode, ReplaceMode, VisualMode};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use keystorm_core::events::{topics, ModeChange};
use keystorm_core::{Action, Error, KeyEvent, Result};

use crate::bus::{EventBus, EventPayload};

/// Outcome of feeding a key to the current mode.
#[derive(Debug, Clone, PartialEq)]
pub enum UnmappedResult {
    /// Dispatch this action.
    Action(Action),
    /// Insert literal text at the primary cursor.
    InsertText(String),
    /// The key means nothing in this mode.
    None,
}

/// Cursor shape a mode requests from the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStyle {
    Block,
    Bar,
    Underline,
}

/// Context handed to a mode alongside each key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeContext {
    pub has_document: bool,
    pub read_only: bool,
}

pub trait Mode: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    fn cursor_style(&self) -> CursorStyle {
        CursorStyle::Block
    }

    /// Resolve an unmapped key.
    fn handle_key(&self, key: &KeyEvent, ctx: &ModeContext) -> UnmappedResult;

    /// Called when the mode becomes current. Failure aborts the switch.
    fn on_enter(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the mode stops being current. Failure aborts the switch.
    fn on_exit(&self) -> Result<()> {
        Ok(())
    }
}

pub struct ModeManager {
    modes: RwLock<HashMap<String, Arc<dyn Mode>>>,
    current: RwLock<Option<Arc<dyn Mode>>>,
    bus: RwLock<Option<Arc<EventBus>>>,
}

impl ModeManager {
    pub fn new() -> Self {
        Self {
            modes: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            bus: RwLock::new(None),
        }
    }

    pub fn set_bus(&self, bus: Arc<EventBus>) {
        *self.bus.write().unwrap() = Some(bus);
    }

    pub fn register(&self, mode: Arc<dyn Mode>) {
        self.modes
            .write()
            .unwrap()
            .insert(mode.name().to_string(), mode);
    }

    /// Install the bootstrap mode. Usable exactly once; later changes go
    /// through [`switch`](Self::switch).
    pub fn set_initial(&self, name: &str) -> Result<()> {
        if self.current.read().unwrap().is_some() {
            return Err(Error::InvalidOperation(
                "initial mode is already set".into(),
            ));
        }
        let mode = self
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("mode {name}")))?;
        mode.on_enter()?;
        *self.current.write().unwrap() = Some(mode);
        Ok(())
    }

    /// Switch to another registered mode, running the previous mode's exit
    /// and the new mode's enter. Any failure leaves the previous mode
    /// current.
    pub fn switch(&self, name: &str) -> Result<()> {
        let next = self
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("mode {name}")))?;
        let previous = self.current.read().unwrap().clone();

        if let Some(prev) = &previous {
            if prev.name() == name {
                return Ok(());
            }
            prev.on_exit()?;
        }

        if let Err(err) = next.on_enter() {
            // Roll back: the previous mode stays current.
            if let Some(prev) = &previous {
                if let Err(reenter) = prev.on_enter() {
                    tracing::error!(mode = prev.name(), %reenter, "mode rollback re-enter failed");
                }
            }
            return Err(err);
        }

        *self.current.write().unwrap() = Some(Arc::clone(&next));

        let previous_name = previous.map(|m| m.name().to_string()).unwrap_or_default();
        let bus = self.bus.read().unwrap().clone();
        if let Some(bus) = bus {
            let change = ModeChange {
                previous_mode: previous_name,
                current_mode: name.to_string(),
            };
            if let Err(err) = bus.publish(topics::MODE_CHANGED, EventPayload::Mode(change)) {
                tracing::trace!(%err, "dropped mode change event");
            }
        }
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<dyn Mode>> {
        self.current.read().unwrap().clone()
    }

    pub fn current_name(&self) -> Option<String> {
        self.current().map(|m| m.name().to_string())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Mode>> {
        self.modes.read().unwrap().get(name).cloned()
    }

    /// Registered mode names, sorted for stable display.
    pub fn modes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modes.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_mode(&self, name: &str) -> bool {
        self.current_name().as_deref() == Some(name)
    }

    pub fn is_any_mode(&self, names: &[&str]) -> bool {
        match self.current_name() {
            Some(current) => names.iter().any(|n| *n == current),
            None => false,
        }
    }
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}
