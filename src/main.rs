//! CLI entry point for the versync update client.

use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use versync_core::{GlobalOptions, NullSink, ProgressSink, UpdateSession};

mod cli;
mod console;

use cli::Args;
use console::ConsoleSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "warn"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let program_dir = match &args.program_dir {
        Some(dir) => dir.clone(),
        None => default_program_dir()?,
    };
    let config_path = if args.config.is_absolute() {
        args.config.clone()
    } else {
        program_dir.join(&args.config)
    };

    let options = GlobalOptions::load(&config_path).context("failed to load configuration")?;
    let quiet = args.quiet || options.quiet_mode;

    info!(
        config = %config_path.display(),
        mirrors = options.server.len(),
        "versync starting"
    );

    let auto_exit = options.auto_exit;
    let no_throwing = options.no_throwing;
    let session = UpdateSession::new(options, program_dir);

    // Ctrl-C cancels the session; workers stop at their next await point.
    let cancel = session.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling update");
            cancel.cancel();
        }
    });

    let console = (!quiet).then(|| Arc::new(ConsoleSink::new()));
    let sink: Arc<dyn ProgressSink> = match &console {
        Some(console) => Arc::clone(console) as Arc<dyn ProgressSink>,
        None => Arc::new(NullSink),
    };

    let result = session.run(sink).await;

    if let Some(console) = &console {
        console.finish();
    }

    match result {
        Ok(summary) => {
            if !quiet {
                console::print_summary(&summary);
            }
            pause_before_exit(auto_exit);
            Ok(())
        }
        Err(error) if error.is_cancelled() => {
            info!("update cancelled");
            Ok(())
        }
        Err(error) if no_throwing => {
            // The wrapping launcher must keep starting the game even when
            // an update attempt fails; the next run reattempts it.
            error!(%error, "update failed; continuing because no-throwing is set");
            Ok(())
        }
        Err(error) => Err(anyhow::Error::new(error).context("update failed")),
    }
}

/// Returns the directory containing the running executable.
fn default_program_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the running executable")?;
    Ok(exe
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf))
}

/// Keeps the summary visible for double-click launches: waits for Enter
/// unless auto-exit is configured or output is not a terminal.
fn pause_before_exit(auto_exit: bool) {
    if auto_exit || !io::stdout().is_terminal() {
        return;
    }
    println!("Press Enter to exit...");
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}
