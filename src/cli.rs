//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Incremental update client for mirrored HTTP content channels.
///
/// Versync reconciles the locally installed version against the newest
/// published snapshot and downloads only the files that changed.
#[derive(Parser, Debug)]
#[command(name = "versync")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the JSON configuration file, resolved against the program
    /// directory when relative
    #[arg(short = 'f', long, default_value = "versync.json")]
    pub config: PathBuf,

    /// Directory holding the config and version marker (defaults to the
    /// executable's directory)
    #[arg(short = 'd', long)]
    pub program_dir: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress output regardless of the config's quiet-mode
    #[arg(short, long)]
    pub quiet: bool,
}
