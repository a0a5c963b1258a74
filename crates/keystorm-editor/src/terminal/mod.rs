//! The terminal backend capability the kernel consumes.
//!
//! The core never renders text itself; it hands a [`Frame`] to whatever
//! [`Backend`] is installed. [`CrosstermBackend`] is the real terminal;
//! [`TestBackend`] replays scripted events and records frames for tests.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::event::{
    Event as CrosstermEvent, KeyCode as CtKeyCode, KeyEventKind, KeyModifiers as CtModifiers,
};
use keystorm_core::{KeyCode, KeyEvent, Modifiers, Result};

use crate::mode::CursorStyle;

/// Input produced by the backend, before kernel translation.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Key(KeyEvent),
    Resize { width: u16, height: u16 },
    Mouse { column: u16, row: u16 },
    Paste(String),
    Focus(bool),
}

/// What the kernel asks the backend to put on screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub lines: Vec<String>,
    pub status: String,
    pub cursor: Option<(u16, u16)>,
    pub cursor_style: Option<CursorStyle>,
}

pub trait Backend: Send {
    fn init(&mut self) -> Result<()>;

    fn shutdown(&mut self) -> Result<()>;

    /// Poll for the next input event, waiting at most `timeout`. Returns
    /// `Ok(None)` on timeout or after shutdown.
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<BackendEvent>>;

    fn size(&self) -> Result<(u16, u16)>;

    fn draw(&mut self, frame: &Frame) -> Result<()>;
}

/// Translate a crossterm key event into a core key event, normalizing the
/// control codes that denote ASCII control characters: Ctrl+H is Backspace,
/// Ctrl+I is Tab, Ctrl+J and Ctrl+M are Enter. Every other control letter
/// stays a rune with the Ctrl modifier set so handlers can key on the chord.
pub fn translate_key(key: crossterm::event::KeyEvent) -> Option<KeyEvent> {
    let mut modifiers = Modifiers::NONE;
    if key.modifiers.contains(CtModifiers::CONTROL) {
        modifiers |= Modifiers::CTRL;
    }
    if key.modifiers.contains(CtModifiers::ALT) {
        modifiers |= Modifiers::ALT;
    }
    if key.modifiers.contains(CtModifiers::SHIFT) {
        modifiers |= Modifiers::SHIFT;
    }
    if key.modifiers.contains(CtModifiers::SUPER) || key.modifiers.contains(CtModifiers::META) {
        modifiers |= Modifiers::META;
    }

    let code = match key.code {
        CtKeyCode::Char(c) if modifiers.contains(Modifiers::CTRL) => {
            match c.to_ascii_lowercase() {
                'h' => {
                    modifiers = Modifiers::NONE;
                    KeyCode::Backspace
                }
                'i' => {
                    modifiers = Modifiers::NONE;
                    KeyCode::Tab
                }
                'j' | 'm' => {
                    modifiers = Modifiers::NONE;
                    KeyCode::Enter
                }
                other => KeyCode::Rune(other),
            }
        }
        CtKeyCode::Char(c) => KeyCode::Rune(c),
        CtKeyCode::Esc => KeyCode::Escape,
        CtKeyCode::Enter => KeyCode::Enter,
        CtKeyCode::Tab => KeyCode::Tab,
        CtKeyCode::BackTab => {
            modifiers |= Modifiers::SHIFT;
            KeyCode::Tab
        }
        CtKeyCode::Backspace => KeyCode::Backspace,
        CtKeyCode::Delete => KeyCode::Delete,
        CtKeyCode::Insert => KeyCode::Insert,
        CtKeyCode::Home => KeyCode::Home,
        CtKeyCode::End => KeyCode::End,
        CtKeyCode::PageUp => KeyCode::PageUp,
        CtKeyCode::PageDown => KeyCode::PageDown,
        CtKeyCode::Up => KeyCode::Up,
        CtKeyCode::Down => KeyCode::Down,
        CtKeyCode::Left => KeyCode::Left,
        CtKeyCode::Right => KeyCode::Right,
        CtKeyCode::F(n) if (1..=12).contains(&n) => KeyCode::F(n),
        _ => return None,
    };
    Some(KeyEvent::new(code, modifiers))
}

fn translate_event(event: CrosstermEvent) -> Option<BackendEvent> {
    match event {
        CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => {
            translate_key(key).map(BackendEvent::Key)
        }
        CrosstermEvent::Resize(width, height) => Some(BackendEvent::Resize { width, height }),
        CrosstermEvent::Mouse(mouse) => Some(BackendEvent::Mouse {
            column: mouse.column,
            row: mouse.row,
        }),
        CrosstermEvent::Paste(text) => Some(BackendEvent::Paste(text)),
        CrosstermEvent::FocusGained => Some(BackendEvent::Focus(true)),
        CrosstermEvent::FocusLost => Some(BackendEvent::Focus(false)),
        _ => None,
    }
}

/// Restore the terminal no matter how we exit. Installed as part of the
/// panic hook so a crash does not leave raw mode on.
pub fn emergency_cleanup() {
    use crossterm::ExecutableCommand;
    let mut stdout = std::io::stdout();
    let _ = stdout.execute(crossterm::terminal::LeaveAlternateScreen);
    let _ = stdout.execute(crossterm::cursor::Show);
    let _ = crossterm::terminal::disable_raw_mode();
}

/// The real terminal, driven through crossterm.
pub struct CrosstermBackend {
    initialized: bool,
}

impl CrosstermBackend {
    pub fn new() -> Self {
        Self { initialized: false }
    }
}

impl Default for CrosstermBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CrosstermBackend {
    fn init(&mut self) -> Result<()> {
        use crossterm::ExecutableCommand;
        crossterm::terminal::enable_raw_mode()?;
        std::io::stdout().execute(crossterm::terminal::EnterAlternateScreen)?;
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        emergency_cleanup();
        Ok(())
    }

    fn poll_event(&mut self, timeout: Duration) -> Result<Option<BackendEvent>> {
        if !crossterm::event::poll(timeout)? {
            return Ok(None);
        }
        Ok(translate_event(crossterm::event::read()?))
    }

    fn size(&self) -> Result<(u16, u16)> {
        Ok(crossterm::terminal::size()?)
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        use crossterm::QueueableCommand;
        let mut stdout = std::io::stdout();
        let (width, height) = crossterm::terminal::size()?;

        stdout.queue(crossterm::terminal::Clear(
            crossterm::terminal::ClearType::All,
        ))?;
        let text_rows = height.saturating_sub(1);
        for (row, line) in frame.lines.iter().take(text_rows as usize).enumerate() {
            stdout.queue(crossterm::cursor::MoveTo(0, row as u16))?;
            let mut clipped = line.clone();
            clipped.truncate(width as usize);
            stdout.queue(crossterm::style::Print(clipped))?;
        }
        if height > 0 {
            stdout.queue(crossterm::cursor::MoveTo(0, height - 1))?;
            let mut status = frame.status.clone();
            status.truncate(width as usize);
            stdout.queue(crossterm::style::Print(status))?;
        }
        if let Some((x, y)) = frame.cursor {
            stdout.queue(crossterm::cursor::MoveTo(x, y))?;
            stdout.queue(crossterm::cursor::Show)?;
        }
        stdout.flush()?;
        Ok(())
    }
}

/// Scripted backend for tests: replays queued events, records frames.
pub struct TestBackend {
    events: Mutex<VecDeque<BackendEvent>>,
    pub frames: Arc<Mutex<Vec<Frame>>>,
    size: (u16, u16),
}

impl TestBackend {
    pub fn new(size: (u16, u16)) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            frames: Arc::new(Mutex::new(Vec::new())),
            size,
        }
    }

    pub fn push_event(&self, event: BackendEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    pub fn push_key(&self, code: KeyCode, modifiers: Modifiers) {
        self.push_event(BackendEvent::Key(KeyEvent::new(code, modifiers)));
    }

    pub fn frames_handle(&self) -> Arc<Mutex<Vec<Frame>>> {
        Arc::clone(&self.frames)
    }
}

impl Backend for TestBackend {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_event(&mut self, _timeout: Duration) -> Result<Option<BackendEvent>> {
        Ok(self.events.lock().unwrap().pop_front())
    }

    fn size(&self) -> Result<(u16, u16)> {
        Ok(self.size)
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}
