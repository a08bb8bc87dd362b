//! End-to-end update session orchestration.
//!
//! A session resolves the locally installed version against the newest
//! published one, folds the intervening version manifests into a single
//! cumulative change-set, applies structural deletions and creations,
//! downloads the added files through the scheduler, and finally commits
//! the new version marker. The marker write is the durability point: any
//! failure or cancellation before it leaves the marker untouched, so the
//! next run resumes from the pre-update state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::GlobalOptions;
use crate::fetch::{FetchError, MirrorClient};
use crate::scheduler::{DownloadScheduler, DownloadTask, ProgressSink, SchedulerError};
use crate::version::VersionRecord;

/// Sentinel marker value for an installation that has no recorded version.
pub const NO_VERSION: &str = "none";

/// Sibling document listing all published version identifiers.
const ALL_VERSIONS_DOC: &str = "all-versions.txt";

/// Errors raised by an update session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A document fetch failed on every mirror.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The local version marker is not present in the published list, so
    /// no ordering can be established. No filesystem changes were made.
    #[error(
        "local version `{version}` is not in the published version list; cannot establish update order"
    )]
    UnknownVersion {
        /// The unrecognized marker value.
        version: String,
    },

    /// A manifest listed an added file without an expected length.
    #[error("cumulative manifest lists {path} without an expected length")]
    MissingLength {
        /// The file missing its size entry.
        path: String,
    },

    /// A configured mirror URL cannot resolve a sibling document path.
    #[error("mirror URL {url} cannot resolve sibling path {path}")]
    MirrorPath {
        /// The offending mirror URL.
        url: String,
        /// The sibling path being resolved.
        path: String,
    },

    /// The download batch failed.
    #[error(transparent)]
    Download(SchedulerError),

    /// File system error while mutating the installation.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The session was cancelled; never presented as a failure.
    #[error("update session cancelled")]
    Cancelled,
}

impl From<SchedulerError> for SessionError {
    fn from(error: SchedulerError) -> Self {
        match error {
            SchedulerError::Cancelled => Self::Cancelled,
            failed => Self::Download(failed),
        }
    }
}

impl SessionError {
    /// Returns true if the session stopped due to cancellation rather
    /// than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result of a completed update session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Version installed before the session.
    pub current_version: String,
    /// Version installed after the session.
    pub newest_version: String,
    /// Files deleted by structural application.
    pub files_removed: usize,
    /// Directories deleted by structural application.
    pub dirs_removed: usize,
    /// Directories created by structural application.
    pub dirs_created: usize,
    /// Files downloaded by the scheduler.
    pub files_downloaded: usize,
    /// Expected bytes across all downloaded files.
    pub bytes_downloaded: u64,
}

impl UpdateSummary {
    fn up_to_date(version: String) -> Self {
        Self {
            current_version: version.clone(),
            newest_version: version,
            files_removed: 0,
            dirs_removed: 0,
            dirs_created: 0,
            files_downloaded: 0,
            bytes_downloaded: 0,
        }
    }

    /// Returns true if the session changed anything on disk.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.files_removed + self.dirs_removed + self.dirs_created + self.files_downloaded > 0
    }
}

/// Drives one update session from version resolution to marker commit.
#[derive(Debug)]
pub struct UpdateSession {
    options: GlobalOptions,
    program_dir: PathBuf,
    update_dir: PathBuf,
    client: Arc<MirrorClient>,
    cancel: CancellationToken,
}

impl UpdateSession {
    /// Creates a session rooted at `program_dir` (where the version marker
    /// lives); the update applies to `base-path` resolved against it.
    #[must_use]
    pub fn new(options: GlobalOptions, program_dir: PathBuf) -> Self {
        let update_dir = if options.base_path.is_empty() {
            program_dir.clone()
        } else {
            program_dir.join(&options.base_path)
        };
        let client = Arc::new(MirrorClient::from_options(&options));
        Self {
            options,
            program_dir,
            update_dir,
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the token that cancels this session; fire it from a signal
    /// handler to stop all phases and workers cleanly.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the directory the update applies to.
    #[must_use]
    pub fn update_dir(&self) -> &Path {
        &self.update_dir
    }

    /// Runs the session to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on the first unrecoverable failure, or
    /// [`SessionError::Cancelled`] if the cancellation token fired. In
    /// both cases the version marker file is left untouched.
    #[instrument(skip(self, sink))]
    pub async fn run(&self, sink: Arc<dyn ProgressSink>) -> Result<UpdateSummary, SessionError> {
        let marker_path = self.program_dir.join(&self.options.version_file);

        // Resolve
        let current_version = read_marker(&marker_path).await?;
        let newest_version = self
            .guarded(async {
                Ok(self.client.fetch_text_multiple(&self.options.server).await?)
            })
            .await?
            .trim()
            .to_string();

        info!(current = %current_version, newest = %newest_version, "resolved versions");

        if current_version == newest_version {
            info!("already up to date");
            return Ok(UpdateSummary::up_to_date(current_version));
        }

        // Discover
        let list_urls = self.sibling_urls(ALL_VERSIONS_DOC)?;
        let all_versions: Vec<String> = self
            .guarded(async { Ok(self.client.fetch_text_multiple(&list_urls).await?) })
            .await?
            .lines()
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect();

        let position = all_versions
            .iter()
            .position(|version| *version == current_version);
        if position.is_none() && current_version != NO_VERSION {
            return Err(SessionError::UnknownVersion {
                version: current_version,
            });
        }

        // Collect
        let missing_versions = match position {
            Some(index) => &all_versions[index + 1..],
            None => &all_versions[..],
        };
        debug!(?missing_versions, ?all_versions, "versions to apply");

        let mut cumulative = VersionRecord::new();
        for version in missing_versions {
            let manifest_urls = self.sibling_urls(&format!("v-{version}.json"))?;
            let record: VersionRecord = self
                .guarded(async {
                    Ok(self
                        .client
                        .fetch_json_multiple(&manifest_urls, &format!("version manifest {version}"))
                        .await?)
                })
                .await?;
            cumulative.apply(record);
        }

        info!(
            removed_files = cumulative.removed_files.len(),
            removed_dirs = cumulative.removed_dirs.len(),
            added_files = cumulative.added_files.len(),
            added_dirs = cumulative.added_dirs.len(),
            "cumulative change-set computed"
        );

        // Apply structural changes
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.apply_structural(&cumulative).await?;

        // Download
        let tasks = self.build_tasks(&cumulative)?;
        let files_downloaded = tasks.len();
        let bytes_downloaded = tasks.iter().map(|task| task.expected_len).sum();
        if !tasks.is_empty() {
            info!(files = files_downloaded, "starting downloads");
            let scheduler = DownloadScheduler::new(
                Arc::clone(&self.client),
                self.options.effective_download_threads(),
                self.cancel.clone(),
            );
            scheduler.run(tasks, sink).await?;
        }

        // Commit
        write_marker(&marker_path, &newest_version).await?;
        info!(version = %newest_version, "version marker committed");

        Ok(UpdateSummary {
            current_version,
            newest_version,
            files_removed: cumulative.removed_files.len(),
            dirs_removed: cumulative.removed_dirs.len(),
            dirs_created: cumulative.added_dirs.len(),
            files_downloaded,
            bytes_downloaded,
        })
    }

    /// Races a phase against the cancellation token.
    async fn guarded<T>(
        &self,
        phase: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            result = phase => result,
        }
    }

    /// Resolves a sibling document path against every configured mirror.
    fn sibling_urls(&self, path: &str) -> Result<Vec<String>, SessionError> {
        self.options
            .server
            .iter()
            .map(|mirror| {
                Url::parse(mirror)
                    .ok()
                    .and_then(|base| base.join(path).ok())
                    .map(String::from)
                    .ok_or_else(|| SessionError::MirrorPath {
                        url: mirror.clone(),
                        path: path.to_string(),
                    })
            })
            .collect()
    }

    /// Deletes removed files and directories and creates added
    /// directories. Runs before any downloads; every operation tolerates
    /// already-applied state so a reattempted session is idempotent.
    async fn apply_structural(&self, cumulative: &VersionRecord) -> Result<(), SessionError> {
        let running_exe = std::env::current_exe().ok();

        for path in &cumulative.removed_files {
            let target = self.update_dir.join(path);
            if is_running_executable(&target, running_exe.as_deref()).await {
                warn!(path = %target.display(), "refusing to delete the running executable");
                continue;
            }
            match tokio::fs::remove_file(&target).await {
                Ok(()) => debug!(path = %target.display(), "removed file"),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(SessionError::Io { path: target, source }),
            }
        }

        for path in &cumulative.removed_dirs {
            let target = self.update_dir.join(path);
            match tokio::fs::remove_dir_all(&target).await {
                Ok(()) => debug!(path = %target.display(), "removed directory"),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(SessionError::Io { path: target, source }),
            }
        }

        for path in &cumulative.added_dirs {
            let target = self.update_dir.join(path);
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|source| SessionError::Io {
                    path: target.clone(),
                    source,
                })?;
            debug!(path = %target.display(), "created directory");
        }

        Ok(())
    }

    /// Builds one download task per added file.
    fn build_tasks(&self, cumulative: &VersionRecord) -> Result<Vec<DownloadTask>, SessionError> {
        let mut tasks = Vec::with_capacity(cumulative.added_files.len());
        for path in &cumulative.added_files {
            let expected_len = *cumulative.added_file_sizes.get(path).ok_or_else(|| {
                SessionError::MissingLength { path: path.clone() }
            })?;
            let urls = self.sibling_urls(&format!("snapshot/{path}"))?;
            tasks.push(DownloadTask {
                expected_len,
                urls,
                dest: self.update_dir.join(path),
            });
        }
        Ok(tasks)
    }
}

/// Compares a deletion target against the running executable.
async fn is_running_executable(target: &Path, running_exe: Option<&Path>) -> bool {
    let Some(exe) = running_exe else {
        return false;
    };
    match tokio::fs::canonicalize(target).await {
        Ok(canonical) => canonical == exe,
        // Nonexistent targets cannot be the running executable.
        Err(_) => false,
    }
}

/// Reads the local version marker, treating an absent file as the
/// `"none"` sentinel.
async fn read_marker(path: &Path) -> Result<String, SessionError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content.trim().to_string()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(NO_VERSION.to_string()),
        Err(source) => Err(SessionError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists the newest version marker. This is the session's durability
/// point.
async fn write_marker(path: &Path, version: &str) -> Result<(), SessionError> {
    tokio::fs::write(path, version)
        .await
        .map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })
}
