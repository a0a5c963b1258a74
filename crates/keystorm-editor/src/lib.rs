//! Keystorm: a terminal modal text editor core.
//!
//! The crate is organized leaf-to-root: the event bus and indexes have no
//! in-crate dependencies, the document/mode/dispatch layer builds on the
//! engine seam, the LSP supervisor and incremental indexer react to bus
//! traffic, and the kernel wires everything together and runs the event loop.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod engine;
pub mod index;
pub mod kernel;
pub mod lsp;
pub mod metrics;
pub mod mode;
pub mod services;
pub mod terminal;

pub use keystorm_core::{Action, ActionResult, Error, KeyCode, KeyEvent, Modifiers, Result};
