//! Tracing subscriber setup.
//!
//! File-based logging with environment-based filtering. The subscriber must
//! be installed before the terminal enters raw mode so startup failures are
//! still readable.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber with file logging.
///
/// Filtering comes from `RUST_LOG` with an INFO default. Returns false if a
/// subscriber was already installed or the log file could not be created.
pub fn init_global(log_file_path: &Path) -> bool {
    let Ok(log_file) = File::create(log_file_path) else {
        return false;
    };
    build_subscriber(log_file).try_init().is_ok()
}

/// Build the subscriber used by production and tests.
pub fn build_subscriber(log_file: File) -> impl tracing::Subscriber + Send + Sync {
    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let fmt_layer = fmt::layer().with_ansi(false).with_writer(Arc::new(log_file));

    tracing_subscriber::registry().with(fmt_layer).with(env_filter)
}

/// Initialize stdout logging once for tests that run with `RUST_LOG`.
pub fn init_for_tests() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stdout)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_subscriber_writes_to_file() {
        let log_file = tempfile::NamedTempFile::new().unwrap();
        let subscriber = build_subscriber(log_file.reopen().unwrap());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from the test");
        });

        let mut contents = String::new();
        log_file.as_file().try_clone().unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("hello from the test"), "log was: {contents}");
    }
}
