//! Actions: the unit of work routed through the dispatcher.
//!
//! An action is a namespace-qualified name plus a count and structured
//! arguments. The namespace is the first dotted segment (`editor` in
//! `editor.insert`); the dispatcher routes on it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direction argument for movement and edit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Backward,
}

/// Named arguments carried by an action.
///
/// Handlers dispatch on named fields, never on positions; anything beyond
/// `text` and `direction` goes through the open-ended `extra` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl ActionArgs {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A namespace-qualified action with an optional repeat count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub args: ActionArgs,
}

fn default_count() -> u32 {
    1
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 1,
            args: ActionArgs::default(),
        }
    }

    pub fn with_args(name: impl Into<String>, args: ActionArgs) -> Self {
        Self {
            name: name.into(),
            count: 1,
            args,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count.max(1);
        self
    }

    /// The first dotted segment, or the whole name if there is no dot.
    pub fn namespace(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Everything after the first dot, or the whole name if there is no dot.
    pub fn local_name(&self) -> &str {
        match self.name.split_once('.') {
            Some((_, rest)) => rest,
            None => &self.name,
        }
    }

    /// True if this action denotes content-modifying intent. The kernel uses
    /// this to set the modified flag on the active document.
    pub fn is_editing_action(&self) -> bool {
        EDITING_ACTION_PREFIXES
            .iter()
            .any(|prefix| self.name.starts_with(prefix))
    }

    /// If this is one of the mode-change actions the kernel intercepts,
    /// returns the target mode name.
    pub fn mode_switch_target(&self) -> Option<&str> {
        match self.name.as_str() {
            "mode.normal" => Some("normal"),
            "mode.insert" => Some("insert"),
            "mode.visual" => Some("visual"),
            "mode.command" => Some("command"),
            "mode.replace" => Some("replace"),
            _ => None,
        }
    }

    /// True for the quit actions the kernel intercepts before dispatch.
    pub fn is_quit(&self) -> bool {
        matches!(self.name.as_str(), "quit" | "app.quit" | "app.quit!")
    }
}

/// Action-name prefixes that denote content-modifying intent. Detection is
/// prefix-based over the full dotted name; the list is closed.
pub const EDITING_ACTION_PREFIXES: &[&str] = &[
    "editor.insert",
    "editor.delete",
    "editor.backspace",
    "editor.newline",
    "editor.indent",
    "editor.unindent",
    "editor.yank",
    "editor.paste",
    "editor.change",
    "editor.substitute",
    "editor.replace",
    "editor.join",
    "editor.toggle",
];

/// Outcome status of a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Ok,
    Error,
    NotHandled,
}

/// One applied edit, in (old, new) terms. The kernel treats a non-empty edit
/// list on a success as evidence to mark the document modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDescriptor {
    pub old_text: String,
    pub new_text: String,
}

/// Result record returned from action dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: Option<ActionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<EditDescriptor>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            status: Some(ActionStatus::Ok),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: Some(ActionStatus::Error),
            error: Some(message),
            ..Default::default()
        }
    }

    pub fn not_handled() -> Self {
        Self {
            status: Some(ActionStatus::NotHandled),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_edit(mut self, old_text: impl Into<String>, new_text: impl Into<String>) -> Self {
        self.edits.push(EditDescriptor {
            old_text: old_text.into(),
            new_text: new_text.into(),
        });
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Some(ActionStatus::Ok)
    }

    pub fn is_handled(&self) -> bool {
        self.status != Some(ActionStatus::NotHandled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_and_local_name() {
        let a = Action::new("editor.insert.before");
        assert_eq!(a.namespace(), "editor");
        assert_eq!(a.local_name(), "insert.before");

        let bare = Action::new("quit");
        assert_eq!(bare.namespace(), "quit");
        assert_eq!(bare.local_name(), "quit");
    }

    #[test]
    fn test_editing_detection_is_prefix_based() {
        assert!(Action::new("editor.insert").is_editing_action());
        assert!(Action::new("editor.insert.line_below").is_editing_action());
        assert!(Action::new("editor.toggle_comment").is_editing_action());
        assert!(!Action::new("editor.move").is_editing_action());
        assert!(!Action::new("file.save").is_editing_action());
    }

    #[test]
    fn test_mode_switch_targets() {
        assert_eq!(Action::new("mode.insert").mode_switch_target(), Some("insert"));
        assert_eq!(Action::new("mode.visual").mode_switch_target(), Some("visual"));
        assert_eq!(Action::new("mode.unknown").mode_switch_target(), None);
        assert_eq!(Action::new("editor.insert").mode_switch_target(), None);
    }

    #[test]
    fn test_count_never_zero() {
        assert_eq!(Action::new("editor.delete").with_count(0).count, 1);
        assert_eq!(Action::new("editor.delete").with_count(4).count, 4);
    }

    #[test]
    fn test_result_builders() {
        let res = ActionResult::ok()
            .with_edit("", "Hi ")
            .with_message("inserted");
        assert!(res.is_ok());
        assert_eq!(res.edits.len(), 1);
        assert_eq!(res.edits[0].new_text, "Hi ");

        let err = ActionResult::error("boom");
        assert_eq!(err.status, Some(ActionStatus::Error));
        assert_eq!(err.error.as_deref(), Some("boom"));

        assert!(!ActionResult::not_handled().is_handled());
    }
}
