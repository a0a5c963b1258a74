//! Bus topics and event payloads exposed to subscribers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed list of topics the core publishes.
pub mod topics {
    pub const BUFFER_INSERTED: &str = "buffer.content.inserted";
    pub const BUFFER_DELETED: &str = "buffer.content.deleted";
    pub const BUFFER_REPLACED: &str = "buffer.content.replaced";
    /// Pattern matching all buffer content changes.
    pub const BUFFER_CONTENT_ALL: &str = "buffer.content.*";

    pub const CONFIG_CHANGED_UI: &str = "config.changed.ui";
    pub const CONFIG_CHANGED_THEME: &str = "config.changed.ui.theme";
    pub const CONFIG_CHANGED_KEYMAPS: &str = "config.changed.keymaps";
    pub const CONFIG_CHANGED_ALL: &str = "config.changed.*";

    pub const MODE_CHANGED: &str = "mode.changed";

    pub const FILE_OPENED: &str = "file.opened";
    pub const FILE_CLOSED: &str = "file.closed";
    pub const FILE_SAVED: &str = "file.saved";
    pub const FILE_ALL: &str = "file.*";

    pub const LSP_DIAGNOSTICS: &str = "lsp.diagnostics";
    pub const LSP_COMPLETION: &str = "lsp.completion";
    pub const LSP_HOVER: &str = "lsp.hover";
    pub const LSP_ALL: &str = "lsp.*";

    pub const DOCUMENT_MODIFIED: &str = "document.modified";
    pub const DOCUMENT_ACTIVATED: &str = "document.activated";
}

/// Incremental-range payload published for every buffer edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferChange {
    pub path: PathBuf,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    pub old_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub previous_mode: String,
    pub current_mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Opened,
    Closed,
    Saved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub action: FileAction,
}

/// Diagnostics forwarded from a language server. The diagnostic list is
/// opaque to the core; subscribers interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsEvent {
    pub path: PathBuf,
    pub diagnostics: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_change_round_trips_through_json() {
        let change = BufferChange {
            path: PathBuf::from("/tmp/a.txt"),
            start_offset: 0,
            end_offset: 3,
            text: "Hi ".to_string(),
            old_text: String::new(),
        };
        let json = serde_json::to_string(&change).unwrap();
        let back: BufferChange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }
}
