use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;

use keystorm::config::{self, Config};
use keystorm::kernel::{Kernel, RunOutcome};
use keystorm::services::tracing_setup;
use keystorm::terminal::{emergency_cleanup, CrosstermBackend};

/// A terminal modal text editor
#[derive(Parser, Debug)]
#[command(name = "keystorm")]
#[command(about = "A terminal modal text editor with LSP supervision", long_about = None)]
#[command(version)]
struct Args {
    /// Files to open; a single directory argument opens it as the project root
    #[arg(value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Path to configuration file (overrides the layered lookup)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to log file for editor diagnostics (default: system temp dir)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Disable language servers
    #[arg(long)]
    no_lsp: bool,

    /// Disable project indexing
    #[arg(long)]
    no_index: bool,

    /// Override the target frame rate
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,
}

/// Exit codes: 0 normal, 1 initialization failure, 2 runtime error,
/// 3 unsaved changes abandoned by a forced exit.
const EXIT_OK: u8 = 0;
const EXIT_INIT_FAILURE: u8 = 1;
const EXIT_RUNTIME_ERROR: u8 = 2;
const EXIT_UNSAVED_CHANGES: u8 = 3;

fn load_config(args: &Args) -> AnyhowResult<Config> {
    let mut config = if let Some(path) = &args.config {
        Config::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        let working_dir = std::env::current_dir().unwrap_or_default();
        Config::load_with_layers(config::user_config_dir().as_deref(), &working_dir)
    };

    if args.no_lsp {
        config.lsp.autostart = false;
        config.lsp.servers.clear();
    }
    if args.no_index {
        config.index.enabled = false;
    }
    if let Some(fps) = args.fps {
        config.editor.target_fps = fps.max(1);
    }
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_file = args
        .log_file
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("keystorm.log"));
    tracing_setup::init_global(&log_file);
    tracing::info!("editor starting");

    // Leave the terminal usable no matter how we exit.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        emergency_cleanup();
        original_hook(panic);
    }));

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };

    // A single directory argument opens it as the project root.
    let mut project_root = None;
    let mut initial_files = Vec::new();
    for path in &args.files {
        if path.is_dir() {
            project_root.get_or_insert_with(|| path.clone());
        } else {
            initial_files.push(path.clone());
        }
    }
    if project_root.is_none() {
        project_root = std::env::current_dir().ok();
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };

    let kernel = Kernel::new(config, Box::new(CrosstermBackend::new()));
    let code = runtime.block_on(async {
        if let Err(err) = kernel.bootstrap(&initial_files, project_root).await {
            tracing::error!(%err, "bootstrap failed");
            let _ = kernel.shutdown().await;
            eprintln!("Error: {err}");
            return EXIT_INIT_FAILURE;
        }

        let run_result = tokio::select! {
            result = kernel.run() => result,
            _ = tokio::signal::ctrl_c() => Ok(RunOutcome::ShutdownSignal),
        };

        let abandoned_dirty =
            matches!(run_result, Ok(RunOutcome::ShutdownSignal)) && kernel.documents().has_dirty();

        if let Err(err) = kernel.shutdown().await {
            tracing::warn!(%err, "shutdown reported an error");
        }

        match run_result {
            Ok(_) if abandoned_dirty => EXIT_UNSAVED_CHANGES,
            Ok(_) => EXIT_OK,
            Err(err) => {
                tracing::error!(%err, "event loop failed");
                eprintln!("Error: {err}");
                EXIT_RUNTIME_ERROR
            }
        }
    });

    tracing::info!(code, "editor exiting");
    ExitCode::from(code)
}
