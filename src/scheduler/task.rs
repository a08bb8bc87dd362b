//! Download work unit.

use std::path::PathBuf;

/// Immutable unit of download work, created once per added file and
/// consumed exactly once by the scheduler.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Expected byte length of the file.
    pub expected_len: u64,

    /// Candidate URLs in fallback order.
    pub urls: Vec<String>,

    /// Destination path to write to.
    pub dest: PathBuf,
}
