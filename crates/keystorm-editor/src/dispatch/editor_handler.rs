//! Built-in handlers for the `editor` and `cursor` namespaces.

use std::sync::{Arc, Mutex};

use keystorm_core::action::Direction;
use keystorm_core::{Action, ActionResult, Error};

use crate::engine::{Cursors, Engine};

use super::{ActionHandler, AppliedEdit, ExecutionContext};

/// Text-editing operations against the active document's engine.
pub struct EditorHandler {
    /// Yank register shared by yank/paste.
    register: Mutex<String>,
}

impl EditorHandler {
    pub fn new() -> Self {
        Self {
            register: Mutex::new(String::new()),
        }
    }

    fn capabilities<'a>(
        ctx: &'a ExecutionContext,
    ) -> Result<(&'a Arc<dyn Engine>, &'a Arc<dyn Cursors>), ActionResult> {
        match (&ctx.engine, &ctx.cursors) {
            (Some(engine), Some(cursors)) => Ok((engine, cursors)),
            _ => Err(ActionResult::error(Error::NoActiveDocument.to_string())),
        }
    }

    fn record(
        ctx: &ExecutionContext,
        result: &mut ActionResult,
        start_offset: usize,
        old_text: String,
        new_text: String,
    ) {
        if let Some(history) = &ctx.history {
            history.record(AppliedEdit {
                start_offset,
                old_text: old_text.clone(),
                new_text: new_text.clone(),
            });
        }
        result.edits.push(keystorm_core::action::EditDescriptor {
            old_text,
            new_text,
        });
    }

    fn insert_text(
        engine: &Arc<dyn Engine>,
        cursors: &Arc<dyn Cursors>,
        ctx: &ExecutionContext,
        result: &mut ActionResult,
        text: &str,
    ) -> Result<(), ActionResult> {
        let offset = cursors.primary().unwrap_or(0);
        engine
            .insert(offset, text)
            .map_err(|e| ActionResult::error(e.to_string()))?;
        cursors.set_primary(offset + text.len());
        Self::record(ctx, result, offset, String::new(), text.to_string());
        Ok(())
    }

    fn delete_forward(
        engine: &Arc<dyn Engine>,
        cursors: &Arc<dyn Cursors>,
        ctx: &ExecutionContext,
        result: &mut ActionResult,
    ) -> Result<(), ActionResult> {
        let offset = cursors.primary().unwrap_or(0);
        let text = engine.text();
        let Some(c) = text.get(offset..).and_then(|rest| rest.chars().next()) else {
            return Ok(());
        };
        let end = offset + c.len_utf8();
        engine
            .delete(offset, end)
            .map_err(|e| ActionResult::error(e.to_string()))?;
        Self::record(ctx, result, offset, c.to_string(), String::new());
        Ok(())
    }

    fn backspace(
        engine: &Arc<dyn Engine>,
        cursors: &Arc<dyn Cursors>,
        ctx: &ExecutionContext,
        result: &mut ActionResult,
    ) -> Result<(), ActionResult> {
        let offset = cursors.primary().unwrap_or(0);
        if offset == 0 {
            return Ok(());
        }
        let text = engine.text();
        let Some(c) = text.get(..offset).and_then(|head| head.chars().next_back()) else {
            return Ok(());
        };
        let start = offset - c.len_utf8();
        engine
            .delete(start, offset)
            .map_err(|e| ActionResult::error(e.to_string()))?;
        cursors.set_primary(start);
        Self::record(ctx, result, start, c.to_string(), String::new());
        Ok(())
    }

    fn undo(ctx: &ExecutionContext, engine: &Arc<dyn Engine>) -> ActionResult {
        let Some(history) = &ctx.history else {
            return ActionResult::error("history is not available");
        };
        let Some(edit) = history.pop() else {
            return ActionResult::ok().with_message("nothing to undo");
        };
        let end = edit.start_offset + edit.new_text.len();
        let applied = if edit.new_text.is_empty() {
            engine.insert(edit.start_offset, &edit.old_text)
        } else {
            engine.replace(edit.start_offset, end, &edit.old_text)
        };
        match applied {
            Ok(_) => ActionResult::ok()
                .with_message("undone")
                .with_edit(edit.new_text, edit.old_text),
            Err(e) => ActionResult::error(e.to_string()),
        }
    }

    /// Byte range of the line containing `offset`, excluding the newline.
    fn line_bounds(text: &str, offset: usize) -> (usize, usize) {
        let offset = offset.min(text.len());
        let start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let end = text[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or(text.len());
        (start, end)
    }
}

impl Default for EditorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHandler for EditorHandler {
    fn namespace(&self) -> &str {
        "editor"
    }

    fn handle(&self, action: &Action, ctx: &ExecutionContext) -> ActionResult {
        let (engine, cursors) = match Self::capabilities(ctx) {
            Ok(caps) => caps,
            Err(result) => return result,
        };
        let mut result = ActionResult::ok();

        match action.local_name() {
            "insert" => {
                let Some(text) = action.args.text.as_deref() else {
                    return ActionResult::error("insert requires a text argument");
                };
                for _ in 0..action.count {
                    if let Err(err) = Self::insert_text(engine, cursors, ctx, &mut result, text) {
                        return err;
                    }
                }
            }
            "newline" => {
                for _ in 0..action.count {
                    if let Err(err) = Self::insert_text(engine, cursors, ctx, &mut result, "\n") {
                        return err;
                    }
                }
            }
            "delete" => {
                for _ in 0..action.count {
                    if let Err(err) = Self::delete_forward(engine, cursors, ctx, &mut result) {
                        return err;
                    }
                }
            }
            "backspace" => {
                for _ in 0..action.count {
                    if let Err(err) = Self::backspace(engine, cursors, ctx, &mut result) {
                        return err;
                    }
                }
            }
            "replace" => {
                let Some(text) = action.args.text.as_deref() else {
                    return ActionResult::error("replace requires a text argument");
                };
                let offset = cursors.primary().unwrap_or(0);
                let current = engine.text();
                let Some(c) = current.get(offset..).and_then(|rest| rest.chars().next()) else {
                    return ActionResult::ok().with_message("nothing to replace");
                };
                let end = offset + c.len_utf8();
                if let Err(e) = engine.replace(offset, end, text) {
                    return ActionResult::error(e.to_string());
                }
                cursors.set_primary(offset + text.len());
                Self::record(ctx, &mut result, offset, c.to_string(), text.to_string());
            }
            "indent" => {
                let offset = cursors.primary().unwrap_or(0);
                let (line_start, _) = Self::line_bounds(&engine.text(), offset);
                if let Err(e) = engine.insert(line_start, "    ") {
                    return ActionResult::error(e.to_string());
                }
                cursors.set_primary(offset + 4);
                Self::record(ctx, &mut result, line_start, String::new(), "    ".into());
            }
            "unindent" => {
                let offset = cursors.primary().unwrap_or(0);
                let text = engine.text();
                let (line_start, line_end) = Self::line_bounds(&text, offset);
                let line = &text[line_start..line_end];
                let strip = if line.starts_with('\t') {
                    1
                } else {
                    line.bytes().take(4).take_while(|b| *b == b' ').count()
                };
                if strip == 0 {
                    return ActionResult::ok();
                }
                let removed = line[..strip].to_string();
                if let Err(e) = engine.delete(line_start, line_start + strip) {
                    return ActionResult::error(e.to_string());
                }
                cursors.set_primary(offset.saturating_sub(strip));
                Self::record(ctx, &mut result, line_start, removed, String::new());
            }
            "join" => {
                let text = engine.text();
                let offset = cursors.primary().unwrap_or(0);
                let (_, line_end) = Self::line_bounds(&text, offset);
                if line_end >= text.len() {
                    return ActionResult::ok().with_message("no line below");
                }
                if let Err(e) = engine.replace(line_end, line_end + 1, " ") {
                    return ActionResult::error(e.to_string());
                }
                Self::record(ctx, &mut result, line_end, "\n".into(), " ".into());
            }
            "yank" => {
                let text = engine.text();
                let offset = cursors.primary().unwrap_or(0);
                let (start, end) = Self::line_bounds(&text, offset);
                *self.register.lock().unwrap() = text[start..end].to_string();
                return ActionResult::ok().with_message("yanked line");
            }
            "paste" => {
                let register = self.register.lock().unwrap().clone();
                if register.is_empty() {
                    return ActionResult::ok().with_message("register empty");
                }
                for _ in 0..action.count {
                    if let Err(err) =
                        Self::insert_text(engine, cursors, ctx, &mut result, &register)
                    {
                        return err;
                    }
                }
            }
            "undo" => return Self::undo(ctx, engine),
            _ => return ActionResult::not_handled(),
        }

        result
    }
}

/// Primary-cursor movement for the `cursor` namespace.
pub struct CursorHandler;

impl ActionHandler for CursorHandler {
    fn namespace(&self) -> &str {
        "cursor"
    }

    fn handle(&self, action: &Action, ctx: &ExecutionContext) -> ActionResult {
        let (engine, cursors) = match EditorHandler::capabilities(ctx) {
            Ok(caps) => caps,
            Err(result) => return result,
        };
        if action.local_name() != "move" {
            return ActionResult::not_handled();
        }
        let Some(direction) = action.args.direction else {
            return ActionResult::error("move requires a direction argument");
        };

        let text = engine.text();
        let mut offset = cursors.primary().unwrap_or(0).min(text.len());
        for _ in 0..action.count {
            offset = match direction {
                Direction::Left | Direction::Backward => text[..offset]
                    .chars()
                    .next_back()
                    .map(|c| offset - c.len_utf8())
                    .unwrap_or(0),
                Direction::Right | Direction::Forward => text[offset..]
                    .chars()
                    .next()
                    .map(|c| offset + c.len_utf8())
                    .unwrap_or(offset),
                Direction::Up => {
                    let (start, _) = EditorHandler::line_bounds(&text, offset);
                    if start == 0 {
                        offset
                    } else {
                        let column = offset - start;
                        let (prev_start, prev_end) = EditorHandler::line_bounds(&text, start - 1);
                        prev_start + column.min(prev_end - prev_start)
                    }
                }
                Direction::Down => {
                    let (start, end) = EditorHandler::line_bounds(&text, offset);
                    if end >= text.len() {
                        offset
                    } else {
                        let column = offset - start;
                        let (next_start, next_end) = EditorHandler::line_bounds(&text, end + 1);
                        next_start + column.min(next_end - next_start)
                    }
                }
            };
        }
        cursors.set_primary(offset);
        ActionResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, History};
    use crate::document::Document;
    use keystorm_core::{ActionArgs, ActionStatus};
    use std::path::PathBuf;

    fn dispatcher_with_doc(content: &str) -> (Dispatcher, Arc<Document>) {
        let doc = Arc::new(Document::new_file(
            PathBuf::from("/tmp/test.txt"),
            content.to_string(),
        ));
        let dispatcher = Dispatcher::new();
        dispatcher.register_namespace(Arc::new(EditorHandler::new()));
        dispatcher.register_namespace(Arc::new(CursorHandler));
        dispatcher.set_engine(Arc::clone(&doc) as Arc<dyn Engine>);
        dispatcher.set_cursors(Arc::clone(&doc) as Arc<dyn Cursors>);
        dispatcher.set_history(Arc::new(History::new()));
        (dispatcher, doc)
    }

    #[test]
    fn test_insert_at_cursor_advances_cursor() {
        let (dispatcher, doc) = dispatcher_with_doc("world");
        doc.set_cursor(0);

        let action = Action::with_args("editor.insert", ActionArgs::text("Hi "));
        let result = dispatcher.dispatch(&action);
        assert!(result.is_ok(), "result: {result:?}");
        assert_eq!(doc.text(), "Hi world");
        assert_eq!(doc.cursor(), Some(3));
        assert_eq!(result.edits.len(), 1);
        assert_eq!(result.edits[0].new_text, "Hi ");
    }

    #[test]
    fn test_delete_respects_count() {
        let (dispatcher, doc) = dispatcher_with_doc("abcdef");
        doc.set_cursor(0);

        let action = Action::new("editor.delete").with_count(3);
        let result = dispatcher.dispatch(&action);
        assert!(result.is_ok());
        assert_eq!(doc.text(), "def");
        assert_eq!(result.edits.len(), 3);
    }

    #[test]
    fn test_backspace_at_start_is_noop() {
        let (dispatcher, doc) = dispatcher_with_doc("abc");
        doc.set_cursor(0);
        let result = dispatcher.dispatch(&Action::new("editor.backspace"));
        assert!(result.is_ok());
        assert_eq!(doc.text(), "abc");
        assert!(result.edits.is_empty());
    }

    #[test]
    fn test_backspace_removes_previous_char() {
        let (dispatcher, doc) = dispatcher_with_doc("abc");
        doc.set_cursor(2);
        dispatcher.dispatch(&Action::new("editor.backspace"));
        assert_eq!(doc.text(), "ac");
        assert_eq!(doc.cursor(), Some(1));
    }

    #[test]
    fn test_undo_reverts_last_insert() {
        let (dispatcher, doc) = dispatcher_with_doc("world");
        doc.set_cursor(0);
        dispatcher.dispatch(&Action::with_args("editor.insert", ActionArgs::text("Hi ")));
        assert_eq!(doc.text(), "Hi world");

        let result = dispatcher.dispatch(&Action::new("editor.undo"));
        assert!(result.is_ok());
        assert_eq!(doc.text(), "world");
    }

    #[test]
    fn test_undo_reverts_delete() {
        let (dispatcher, doc) = dispatcher_with_doc("abc");
        doc.set_cursor(1);
        dispatcher.dispatch(&Action::new("editor.delete"));
        assert_eq!(doc.text(), "ac");

        dispatcher.dispatch(&Action::new("editor.undo"));
        assert_eq!(doc.text(), "abc");
    }

    #[test]
    fn test_yank_then_paste_duplicates_line() {
        let (dispatcher, doc) = dispatcher_with_doc("one\ntwo");
        doc.set_cursor(0);
        dispatcher.dispatch(&Action::new("editor.yank"));
        doc.set_cursor(0);
        let result = dispatcher.dispatch(&Action::new("editor.paste"));
        assert!(result.is_ok());
        assert_eq!(doc.text(), "oneone\ntwo");
    }

    #[test]
    fn test_join_merges_lines() {
        let (dispatcher, doc) = dispatcher_with_doc("one\ntwo");
        doc.set_cursor(0);
        dispatcher.dispatch(&Action::new("editor.join"));
        assert_eq!(doc.text(), "one two");
    }

    #[test]
    fn test_replace_swaps_single_char() {
        let (dispatcher, doc) = dispatcher_with_doc("cat");
        doc.set_cursor(0);
        let action = Action::with_args("editor.replace", ActionArgs::text("b"));
        dispatcher.dispatch(&action);
        assert_eq!(doc.text(), "bat");
    }

    #[test]
    fn test_indent_and_unindent() {
        let (dispatcher, doc) = dispatcher_with_doc("line");
        doc.set_cursor(2);
        dispatcher.dispatch(&Action::new("editor.indent"));
        assert_eq!(doc.text(), "    line");

        dispatcher.dispatch(&Action::new("editor.unindent"));
        assert_eq!(doc.text(), "line");
    }

    #[test]
    fn test_cursor_moves_with_boundaries() {
        let (dispatcher, doc) = dispatcher_with_doc("ab\ncd");
        doc.set_cursor(0);

        let right = Action::with_args(
            "cursor.move",
            ActionArgs {
                direction: Some(Direction::Right),
                ..Default::default()
            },
        );
        dispatcher.dispatch(&right);
        assert_eq!(doc.cursor(), Some(1));

        let down = Action::with_args(
            "cursor.move",
            ActionArgs {
                direction: Some(Direction::Down),
                ..Default::default()
            },
        );
        dispatcher.dispatch(&down);
        assert_eq!(doc.cursor(), Some(4), "column preserved on next line");

        let left = Action::with_args(
            "cursor.move",
            ActionArgs {
                direction: Some(Direction::Left),
                ..Default::default()
            },
        );
        dispatcher.dispatch(&left);
        assert_eq!(doc.cursor(), Some(3));
    }

    #[test]
    fn test_missing_document_yields_error() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_namespace(Arc::new(EditorHandler::new()));
        let result = dispatcher.dispatch(&Action::with_args("editor.insert", ActionArgs::text("x")));
        assert_eq!(result.status, Some(ActionStatus::Error));
    }

    #[test]
    fn test_unknown_editor_op_not_handled() {
        let (dispatcher, _doc) = dispatcher_with_doc("x");
        let result = dispatcher.dispatch(&Action::new("editor.frobnicate"));
        assert_eq!(result.status, Some(ActionStatus::NotHandled));
    }
}
