//! The text-storage seam.
//!
//! Documents own a [`StringEngine`]; the dispatcher borrows whatever engine
//! backs the active document through the [`Engine`] capability trait, which
//! is swapped at runtime as the active document changes.

use keystorm_core::{Error, Result};

/// Description of one applied edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditResult {
    /// Byte offset where the edit starts.
    pub start_offset: usize,
    /// Byte offset where the replaced range ended, before the edit.
    pub end_offset_before: usize,
    /// Length of the replacement text in bytes.
    pub new_len: usize,
    /// Engine revision after the edit was applied.
    pub revision: u64,
}

/// Capability trait over the active document's text storage. Implementations
/// use interior mutability; one edit bumps the revision by exactly one.
pub trait Engine: Send + Sync {
    fn text(&self) -> String;
    fn len_bytes(&self) -> usize;
    fn revision(&self) -> u64;
    fn insert(&self, offset: usize, text: &str) -> Result<EditResult>;
    fn delete(&self, start: usize, end: usize) -> Result<EditResult>;
    fn replace(&self, start: usize, end: usize, text: &str) -> Result<EditResult>;
}

/// Capability trait over the active document's cursors. Only the primary
/// cursor is part of the core contract.
pub trait Cursors: Send + Sync {
    fn primary(&self) -> Option<usize>;
    fn set_primary(&self, offset: usize);
}

/// Plain in-memory text buffer with a line-start index.
///
/// Offsets are byte offsets and must land on character boundaries. Points
/// are 0-based (line, column-in-bytes) pairs.
#[derive(Debug, Default)]
pub struct StringEngine {
    content: String,
    /// Byte offset of the start of each line. Always has at least one entry (0).
    line_starts: Vec<usize>,
    revision: u64,
}

impl StringEngine {
    pub fn new() -> Self {
        Self::from_text(String::new())
    }

    pub fn from_text(content: impl Into<String>) -> Self {
        let content = content.into();
        let line_starts = compute_line_starts(&content);
        Self {
            content,
            line_starts,
            revision: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<&str> {
        self.check_range(start, end)?;
        Ok(&self.content[start..end])
    }

    /// Convert a byte offset to a 0-based (line, column) point. Offsets past
    /// the end clamp to the final position.
    pub fn offset_to_point(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.content.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(insertion) => insertion - 1,
        };
        (line, offset - self.line_starts[line])
    }

    /// Convert a 0-based (line, column) point back to a byte offset.
    pub fn point_to_offset(&self, line: usize, column: usize) -> Option<usize> {
        let start = *self.line_starts.get(line)?;
        let end = self
            .line_starts
            .get(line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.content.len());
        let offset = start + column;
        (offset <= end).then_some(offset)
    }

    pub fn insert(&mut self, offset: usize, text: &str) -> Result<EditResult> {
        self.check_boundary(offset)?;
        self.content.insert_str(offset, text);
        self.committed(offset, offset, text.len())
    }

    pub fn delete(&mut self, start: usize, end: usize) -> Result<EditResult> {
        self.check_range(start, end)?;
        self.content.replace_range(start..end, "");
        self.committed(start, end, 0)
    }

    pub fn replace(&mut self, start: usize, end: usize, text: &str) -> Result<EditResult> {
        self.check_range(start, end)?;
        self.content.replace_range(start..end, text);
        self.committed(start, end, text.len())
    }

    fn committed(&mut self, start: usize, end_before: usize, new_len: usize) -> Result<EditResult> {
        self.line_starts = compute_line_starts(&self.content);
        self.revision += 1;
        Ok(EditResult {
            start_offset: start,
            end_offset_before: end_before,
            new_len,
            revision: self.revision,
        })
    }

    fn check_boundary(&self, offset: usize) -> Result<()> {
        if offset > self.content.len() || !self.content.is_char_boundary(offset) {
            return Err(Error::InvalidOperation(format!(
                "offset {offset} is not a character boundary (len {})",
                self.content.len()
            )));
        }
        Ok(())
    }

    fn check_range(&self, start: usize, end: usize) -> Result<()> {
        if start > end {
            return Err(Error::InvalidOperation(format!(
                "range start {start} is past end {end}"
            )));
        }
        self.check_boundary(start)?;
        self.check_boundary(end)
    }
}

fn compute_line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_revision() {
        let mut engine = StringEngine::from_text("world");
        let edit = engine.insert(0, "hello ").unwrap();
        assert_eq!(engine.text(), "hello world");
        assert_eq!(edit.start_offset, 0);
        assert_eq!(edit.end_offset_before, 0);
        assert_eq!(edit.new_len, 6);
        assert_eq!(edit.revision, 1);

        let edit = engine.insert(engine.len(), "!").unwrap();
        assert_eq!(edit.revision, 2);
        assert_eq!(engine.text(), "hello world!");
    }

    #[test]
    fn test_delete_and_replace() {
        let mut engine = StringEngine::from_text("hello cruel world");
        let edit = engine.delete(5, 11).unwrap();
        assert_eq!(engine.text(), "hello world");
        assert_eq!(edit.end_offset_before, 11);
        assert_eq!(edit.new_len, 0);

        engine.replace(0, 5, "goodbye").unwrap();
        assert_eq!(engine.text(), "goodbye world");
        assert_eq!(engine.revision(), 2);
    }

    #[test]
    fn test_rejects_non_boundary_offsets() {
        let mut engine = StringEngine::from_text("héllo");
        // 'é' is two bytes starting at offset 1
        assert!(engine.insert(2, "x").is_err());
        assert!(engine.delete(0, 2).is_err());
        assert!(engine.insert(10, "x").is_err());
        assert_eq!(engine.revision(), 0, "failed edits must not bump revision");
    }

    #[test]
    fn test_offset_point_round_trip() {
        let engine = StringEngine::from_text("one\ntwo\nthree");
        assert_eq!(engine.line_count(), 3);
        assert_eq!(engine.offset_to_point(0), (0, 0));
        assert_eq!(engine.offset_to_point(4), (1, 0));
        assert_eq!(engine.offset_to_point(6), (1, 2));
        assert_eq!(engine.offset_to_point(13), (2, 5));

        assert_eq!(engine.point_to_offset(1, 2), Some(6));
        assert_eq!(engine.point_to_offset(2, 5), Some(13));
        assert_eq!(engine.point_to_offset(0, 4), None);
        assert_eq!(engine.point_to_offset(9, 0), None);
    }

    #[test]
    fn test_line_starts_track_edits() {
        let mut engine = StringEngine::from_text("ab");
        engine.insert(1, "\n").unwrap();
        assert_eq!(engine.line_count(), 2);
        assert_eq!(engine.offset_to_point(2), (1, 0));
    }
}
