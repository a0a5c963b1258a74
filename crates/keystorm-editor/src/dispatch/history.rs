//! Linear edit history used by the editor handler's undo path.

use std::sync::Mutex;

/// One applied edit, recorded with enough context to invert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    pub start_offset: usize,
    pub old_text: String,
    pub new_text: String,
}

#[derive(Debug, Default)]
pub struct History {
    entries: Mutex<Vec<AppliedEdit>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, edit: AppliedEdit) {
        self.entries.lock().unwrap().push(edit);
    }

    /// Take the most recent edit off the stack.
    pub fn pop(&self) -> Option<AppliedEdit> {
        self.entries.lock().unwrap().pop()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_pop_lifo() {
        let history = History::new();
        history.record(AppliedEdit {
            start_offset: 0,
            old_text: String::new(),
            new_text: "a".into(),
        });
        history.record(AppliedEdit {
            start_offset: 1,
            old_text: String::new(),
            new_text: "b".into(),
        });

        assert_eq!(history.len(), 2);
        assert_eq!(history.pop().unwrap().new_text, "b");
        assert_eq!(history.pop().unwrap().new_text, "a");
        assert!(history.pop().is_none());
    }
}
