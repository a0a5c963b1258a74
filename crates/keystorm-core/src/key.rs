//! Key events as the kernel sees them, after backend translation.

use serde::{Deserialize, Serialize};

/// A decoded key, independent of any terminal backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    /// A printable character (possibly with modifiers attached to the event).
    Rune(char),
    Escape,
    Enter,
    Tab,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    /// Function keys F1..F12.
    F(u8),
}

/// Modifier bits, `|`-composable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const CTRL: Modifiers = Modifiers(1 << 0);
    pub const ALT: Modifiers = Modifiers(1 << 1);
    pub const SHIFT: Modifiers = Modifiers(1 << 2);
    pub const META: Modifiers = Modifiers(1 << 3);

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

/// A key press delivered to the mode machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(code: KeyCode, modifiers: Modifiers) -> Self {
        Self { code, modifiers }
    }

    pub fn rune(c: char) -> Self {
        Self::new(KeyCode::Rune(c), Modifiers::NONE)
    }

    /// The character this event inserts, if it is a plain printable key.
    pub fn printable(&self) -> Option<char> {
        match self.code {
            KeyCode::Rune(c)
                if !self.modifiers.contains(Modifiers::CTRL)
                    && !self.modifiers.contains(Modifiers::ALT)
                    && !self.modifiers.contains(Modifiers::META) =>
            {
                Some(c)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifiers.contains(Modifiers::CTRL) {
            write!(f, "C-")?;
        }
        if self.modifiers.contains(Modifiers::ALT) {
            write!(f, "A-")?;
        }
        if self.modifiers.contains(Modifiers::SHIFT) {
            write!(f, "S-")?;
        }
        if self.modifiers.contains(Modifiers::META) {
            write!(f, "M-")?;
        }
        match self.code {
            KeyCode::Rune(c) => write!(f, "{c}"),
            KeyCode::F(n) => write!(f, "F{n}"),
            ref other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifiers_compose() {
        let mods = Modifiers::CTRL | Modifiers::SHIFT;
        assert!(mods.contains(Modifiers::CTRL));
        assert!(mods.contains(Modifiers::SHIFT));
        assert!(!mods.contains(Modifiers::ALT));
    }

    #[test]
    fn test_printable_excludes_control_chords() {
        assert_eq!(KeyEvent::rune('a').printable(), Some('a'));
        let ctrl_a = KeyEvent::new(KeyCode::Rune('a'), Modifiers::CTRL);
        assert_eq!(ctrl_a.printable(), None);
        // Shift alone still inserts (uppercase comes pre-composed from the backend)
        let shift_a = KeyEvent::new(KeyCode::Rune('A'), Modifiers::SHIFT);
        assert_eq!(shift_a.printable(), Some('A'));
    }

    #[test]
    fn test_display_formats_chords() {
        let ev = KeyEvent::new(KeyCode::Rune('x'), Modifiers::CTRL | Modifiers::ALT);
        assert_eq!(ev.to_string(), "C-A-x");
        assert_eq!(KeyEvent::new(KeyCode::F(5), Modifiers::NONE).to_string(), "F5");
    }
}
