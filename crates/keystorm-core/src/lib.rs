use serde::{Deserialize, Serialize};

/// Unique key for a scratch (unnamed) document, allocated from a monotonic
/// counter. Retired keys are never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScratchKey(pub u64);

impl std::fmt::Display for ScratchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 <= 1 {
            write!(f, "Untitled")
        } else {
            write!(f, "Untitled-{}", self.0)
        }
    }
}

pub mod action;
pub mod error;
pub mod events;
pub mod key;

pub use action::{Action, ActionArgs, ActionResult, ActionStatus, EditDescriptor};
pub use error::{Error, Result};
pub use key::{KeyCode, KeyEvent, Modifiers};
