//! Error taxonomy shared across the editor core.
//!
//! Library code returns these typed errors so callers can branch on the kind
//! (prompt on unsaved changes, surface read-only writes, retry on NotReady).
//! The binary boundary wraps them in `anyhow` for reporting.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kernel is not running")]
    NotRunning,

    #[error("kernel is already running")]
    AlreadyRunning,

    #[error("no active document")]
    NoActiveDocument,

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("document already open: {0}")]
    DocumentAlreadyOpen(String),

    #[error("{0} document(s) have unsaved changes")]
    UnsavedChanges(usize),

    #[error("document has no file path")]
    NoFilePath,

    #[error("document is read-only")]
    ReadOnly,

    #[error("failed to initialize {component}: {reason}")]
    Initialization { component: String, reason: String },

    #[error("component not available: {0}")]
    ComponentNotAvailable(&'static str),

    #[error("shutdown exceeded its deadline")]
    ShutdownTimeout,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A handler panicked and the panic was recovered by the caller.
    #[error("recovered panic: {0}")]
    RecoveredPanic(String),

    #[error("language server is already running")]
    ServerAlreadyRunning,

    #[error("language server is not ready")]
    ServerNotReady,

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("index is closed")]
    IndexClosed,

    #[error("pattern too long: {len} bytes (max {max})")]
    PatternTooLong { len: usize, max: usize },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("failed to open {path}: {source}")]
    OpenFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures a UI should surface to the user rather than just log.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::UnsavedChanges(_) | Error::OpenFailure { .. } | Error::ReadOnly
        )
    }
}
