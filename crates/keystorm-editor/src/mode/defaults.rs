//! The built-in modes.
//!
//! These implement the mode-to-action contract only: keys resolve to
//! namespace-qualified actions or literal text. Keybinding languages and
//! user remapping live outside the core.

use std::sync::Mutex;

use keystorm_core::{Action, ActionArgs, KeyCode, KeyEvent};

use super::{CursorStyle, Mode, ModeContext, ModeManager, UnmappedResult};

/// Register the five built-in modes.
pub fn register_default_modes(manager: &ModeManager) {
    manager.register(std::sync::Arc::new(NormalMode));
    manager.register(std::sync::Arc::new(InsertMode));
    manager.register(std::sync::Arc::new(VisualMode));
    manager.register(std::sync::Arc::new(CommandMode::new()));
    manager.register(std::sync::Arc::new(ReplaceMode));
}

pub struct NormalMode;

impl Mode for NormalMode {
    fn name(&self) -> &str {
        "normal"
    }

    fn display_name(&self) -> &str {
        "NORMAL"
    }

    fn handle_key(&self, key: &KeyEvent, _ctx: &ModeContext) -> UnmappedResult {
        match key.printable() {
            Some('i') => UnmappedResult::Action(Action::new("mode.insert")),
            Some('v') => UnmappedResult::Action(Action::new("mode.visual")),
            Some(':') => UnmappedResult::Action(Action::new("mode.command")),
            Some('R') => UnmappedResult::Action(Action::new("mode.replace")),
            Some('x') => UnmappedResult::Action(Action::new("editor.delete")),
            Some('u') => UnmappedResult::Action(Action::new("editor.undo")),
            Some('p') => UnmappedResult::Action(Action::new("editor.paste")),
            Some('h') => movement(keystorm_core::action::Direction::Left),
            Some('j') => movement(keystorm_core::action::Direction::Down),
            Some('k') => movement(keystorm_core::action::Direction::Up),
            Some('l') => movement(keystorm_core::action::Direction::Right),
            _ => UnmappedResult::None,
        }
    }
}

fn movement(direction: keystorm_core::action::Direction) -> UnmappedResult {
    let args = ActionArgs {
        direction: Some(direction),
        ..Default::default()
    };
    UnmappedResult::Action(Action::with_args("cursor.move", args))
}

pub struct InsertMode;

impl Mode for InsertMode {
    fn name(&self) -> &str {
        "insert"
    }

    fn display_name(&self) -> &str {
        "INSERT"
    }

    fn cursor_style(&self) -> CursorStyle {
        CursorStyle::Bar
    }

    fn handle_key(&self, key: &KeyEvent, ctx: &ModeContext) -> UnmappedResult {
        if ctx.read_only {
            return match key.code {
                KeyCode::Escape => UnmappedResult::Action(Action::new("mode.normal")),
                _ => UnmappedResult::None,
            };
        }
        match key.code {
            KeyCode::Escape => UnmappedResult::Action(Action::new("mode.normal")),
            KeyCode::Enter => UnmappedResult::Action(Action::new("editor.newline")),
            KeyCode::Backspace => UnmappedResult::Action(Action::new("editor.backspace")),
            KeyCode::Tab => UnmappedResult::InsertText("\t".to_string()),
            _ => match key.printable() {
                Some(c) => UnmappedResult::InsertText(c.to_string()),
                None => UnmappedResult::None,
            },
        }
    }
}

pub struct VisualMode;

impl Mode for VisualMode {
    fn name(&self) -> &str {
        "visual"
    }

    fn display_name(&self) -> &str {
        "VISUAL"
    }

    fn cursor_style(&self) -> CursorStyle {
        CursorStyle::Underline
    }

    fn handle_key(&self, key: &KeyEvent, _ctx: &ModeContext) -> UnmappedResult {
        match key.code {
            KeyCode::Escape => UnmappedResult::Action(Action::new("mode.normal")),
            _ => match key.printable() {
                Some('d') | Some('x') => UnmappedResult::Action(Action::new("editor.delete")),
                Some('y') => UnmappedResult::Action(Action::new("editor.yank")),
                _ => UnmappedResult::None,
            },
        }
    }
}

pub struct ReplaceMode;

impl Mode for ReplaceMode {
    fn name(&self) -> &str {
        "replace"
    }

    fn display_name(&self) -> &str {
        "REPLACE"
    }

    fn cursor_style(&self) -> CursorStyle {
        CursorStyle::Underline
    }

    fn handle_key(&self, key: &KeyEvent, _ctx: &ModeContext) -> UnmappedResult {
        match key.code {
            KeyCode::Escape => UnmappedResult::Action(Action::new("mode.normal")),
            KeyCode::Backspace => UnmappedResult::Action(Action::new("editor.backspace")),
            _ => match key.printable() {
                Some(c) => UnmappedResult::Action(Action::with_args(
                    "editor.replace",
                    ActionArgs::text(c.to_string()),
                )),
                None => UnmappedResult::None,
            },
        }
    }
}

/// Command-line mode. Typed characters accumulate in an internal buffer;
/// Enter resolves the buffer to an action.
pub struct CommandMode {
    buffer: Mutex<String>,
}

impl CommandMode {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(String::new()),
        }
    }

    /// The pending command line, for the status renderer.
    pub fn pending(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }

    fn resolve(command: &str) -> UnmappedResult {
        match command.trim() {
            "" => UnmappedResult::Action(Action::new("mode.normal")),
            "q" => UnmappedResult::Action(Action::new("app.quit")),
            "q!" => UnmappedResult::Action(Action::new("app.quit!")),
            "w" => UnmappedResult::Action(Action::new("file.save")),
            other => {
                let args = ActionArgs::text(other.to_string());
                UnmappedResult::Action(Action::with_args("command.run", args))
            }
        }
    }
}

impl Default for CommandMode {
    fn default() -> Self {
        Self::new()
    }
}

impl Mode for CommandMode {
    fn name(&self) -> &str {
        "command"
    }

    fn display_name(&self) -> &str {
        "COMMAND"
    }

    fn cursor_style(&self) -> CursorStyle {
        CursorStyle::Bar
    }

    fn handle_key(&self, key: &KeyEvent, _ctx: &ModeContext) -> UnmappedResult {
        match key.code {
            KeyCode::Escape => {
                self.buffer.lock().unwrap().clear();
                UnmappedResult::Action(Action::new("mode.normal"))
            }
            KeyCode::Enter => {
                let command = std::mem::take(&mut *self.buffer.lock().unwrap());
                Self::resolve(&command)
            }
            KeyCode::Backspace => {
                self.buffer.lock().unwrap().pop();
                UnmappedResult::None
            }
            _ => match key.printable() {
                Some(c) => {
                    self.buffer.lock().unwrap().push(c);
                    UnmappedResult::None
                }
                None => UnmappedResult::None,
            },
        }
    }

    fn on_exit(&self) -> keystorm_core::Result<()> {
        self.buffer.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystorm_core::Modifiers;

    fn key(c: char) -> KeyEvent {
        KeyEvent::rune(c)
    }

    fn ctx() -> ModeContext {
        ModeContext {
            has_document: true,
            read_only: false,
        }
    }

    #[test]
    fn test_normal_mode_maps_mode_changes() {
        let mode = NormalMode;
        assert_eq!(
            mode.handle_key(&key('i'), &ctx()),
            UnmappedResult::Action(Action::new("mode.insert"))
        );
        assert_eq!(
            mode.handle_key(&key(':'), &ctx()),
            UnmappedResult::Action(Action::new("mode.command"))
        );
        assert_eq!(mode.handle_key(&key('z'), &ctx()), UnmappedResult::None);
    }

    #[test]
    fn test_insert_mode_inserts_printable_runes() {
        let mode = InsertMode;
        assert_eq!(
            mode.handle_key(&key('a'), &ctx()),
            UnmappedResult::InsertText("a".to_string())
        );
        assert_eq!(
            mode.handle_key(&KeyEvent::new(KeyCode::Escape, Modifiers::NONE), &ctx()),
            UnmappedResult::Action(Action::new("mode.normal"))
        );
        assert_eq!(
            mode.handle_key(&KeyEvent::new(KeyCode::Enter, Modifiers::NONE), &ctx()),
            UnmappedResult::Action(Action::new("editor.newline"))
        );
        // Control chords do not insert
        assert_eq!(
            mode.handle_key(&KeyEvent::new(KeyCode::Rune('a'), Modifiers::CTRL), &ctx()),
            UnmappedResult::None
        );
    }

    #[test]
    fn test_insert_mode_read_only_only_escapes() {
        let mode = InsertMode;
        let ro = ModeContext {
            has_document: true,
            read_only: true,
        };
        assert_eq!(mode.handle_key(&key('a'), &ro), UnmappedResult::None);
        assert_eq!(
            mode.handle_key(&KeyEvent::new(KeyCode::Escape, Modifiers::NONE), &ro),
            UnmappedResult::Action(Action::new("mode.normal"))
        );
    }

    #[test]
    fn test_command_mode_accumulates_and_resolves() {
        let mode = CommandMode::new();
        mode.handle_key(&key('q'), &ctx());
        assert_eq!(mode.pending(), "q");

        let result = mode.handle_key(&KeyEvent::new(KeyCode::Enter, Modifiers::NONE), &ctx());
        assert_eq!(result, UnmappedResult::Action(Action::new("app.quit")));
        assert_eq!(mode.pending(), "");
    }

    #[test]
    fn test_command_mode_force_quit_and_save() {
        let mode = CommandMode::new();
        for c in "q!".chars() {
            mode.handle_key(&key(c), &ctx());
        }
        let result = mode.handle_key(&KeyEvent::new(KeyCode::Enter, Modifiers::NONE), &ctx());
        assert_eq!(result, UnmappedResult::Action(Action::new("app.quit!")));

        for c in "w".chars() {
            mode.handle_key(&key(c), &ctx());
        }
        let result = mode.handle_key(&KeyEvent::new(KeyCode::Enter, Modifiers::NONE), &ctx());
        assert_eq!(result, UnmappedResult::Action(Action::new("file.save")));
    }

    #[test]
    fn test_command_mode_escape_clears_buffer() {
        let mode = CommandMode::new();
        mode.handle_key(&key('w'), &ctx());
        let result = mode.handle_key(&KeyEvent::new(KeyCode::Escape, Modifiers::NONE), &ctx());
        assert_eq!(result, UnmappedResult::Action(Action::new("mode.normal")));
        assert_eq!(mode.pending(), "");
    }

    #[test]
    fn test_replace_mode_emits_replace_actions() {
        let mode = ReplaceMode;
        let result = mode.handle_key(&key('x'), &ctx());
        match result {
            UnmappedResult::Action(action) => {
                assert_eq!(action.name, "editor.replace");
                assert_eq!(action.args.text.as_deref(), Some("x"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
