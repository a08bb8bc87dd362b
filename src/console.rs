//! Terminal progress rendering and summary output.

use std::path::Path;

use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};
use versync_core::{ProgressSink, ProgressSnapshot, UpdateSummary};

/// Progress sink rendering one aggregate bar for the whole batch.
///
/// Sink callbacks only mutate in-memory bar state; indicatif redraws on
/// its own tick, so the download path is never blocked.
pub struct ConsoleSink {
    bar: ProgressBar,
}

impl ConsoleSink {
    /// Creates the aggregate progress bar.
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:30.green} {percent:>3}% {prefix} {msg}",
            )
            .expect("valid progress template"),
        );
        Self { bar }
    }

    /// Clears the bar so the summary prints on a clean line.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for ConsoleSink {
    fn file_progress(&self, file: &Path, _received: u64, _expected: u64, _speed: u64) {
        if let Some(name) = file.file_name() {
            self.bar.set_prefix(name.to_string_lossy().into_owned());
        }
    }

    fn batch_progress(&self, snapshot: &ProgressSnapshot) {
        self.bar.set_length(snapshot.bytes_expected.max(1));
        self.bar.set_position(snapshot.bytes_downloaded);
        self.bar.set_message(format!(
            "{}/{} files - {}/s",
            snapshot.tasks_completed,
            snapshot.tasks_total,
            format_size(snapshot.throughput, BINARY)
        ));
    }
}

/// Prints the end-of-session summary line.
pub fn print_summary(summary: &UpdateSummary) {
    if !summary.has_changes() {
        println!("All files are up to date (version {}).", summary.newest_version);
        return;
    }

    println!(
        "Updated to version {}: {} files downloaded ({}), {} files removed, {} directories created, {} removed.",
        summary.newest_version,
        summary.files_downloaded,
        format_size(summary.bytes_downloaded, BINARY),
        summary.files_removed,
        summary.dirs_created,
        summary.dirs_removed,
    );
}
