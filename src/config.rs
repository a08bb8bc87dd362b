//! Configuration loading and validation.
//!
//! The update client is driven by a single JSON configuration file placed
//! next to the executable. [`GlobalOptions`] is the validated snapshot of
//! that file; the core never re-reads configuration after startup.

use std::path::{Path, PathBuf};
use std::thread;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default marker filename holding the locally installed version.
pub const DEFAULT_VERSION_FILE: &str = "versync-version.txt";

/// Default number of download workers when the config does not say.
pub const DEFAULT_DOWNLOAD_THREADS: usize = 4;

/// Default retry budget per mirror URL.
pub const DEFAULT_RETRY_TIMES: u32 = 3;

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("config file not found: {path}")]
    NotFound {
        /// Path that was probed.
        path: PathBuf,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was being read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A field value failed validation.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// The offending field, in config-file spelling.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Mirror list that accepts either a single URL string or a list of URLs.
///
/// Servers with one mirror commonly configure `"server": "https://..."`;
/// the list form declares fallback order.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ServerField {
    One(String),
    Many(Vec<String>),
}

impl From<ServerField> for Vec<String> {
    fn from(field: ServerField) -> Self {
        match field {
            ServerField::One(url) => vec![url],
            ServerField::Many(urls) => urls,
        }
    }
}

/// Validated application configuration snapshot.
///
/// Field names map to kebab-case keys in the config file. Unknown keys are
/// rejected so typos surface at startup instead of being silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GlobalOptions {
    /// Ranked mirror URLs for the newest-version endpoint. Sibling
    /// documents (version list, manifests, file snapshots) are resolved
    /// relative to each of these.
    #[serde(deserialize_with = "deserialize_server")]
    pub server: Vec<String>,

    /// Filename of the local version marker, relative to the program
    /// directory.
    #[serde(default = "default_version_file")]
    pub version_file: String,

    /// Directory the update applies to, relative to the program directory.
    /// Empty means the program directory itself.
    #[serde(default)]
    pub base_path: String,

    /// Exit without waiting for a keypress once the session finishes.
    #[serde(default)]
    pub auto_exit: bool,

    /// Log a failed session instead of exiting nonzero, so a wrapping
    /// launcher is not aborted by an update failure.
    #[serde(default)]
    pub no_throwing: bool,

    /// Suppress progress rendering; only warnings and errors are logged.
    #[serde(default)]
    pub quiet_mode: bool,

    /// HTTP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub http_connect_timeout: u64,

    /// HTTP read timeout in milliseconds, applied to response streaming.
    #[serde(default = "default_read_timeout")]
    pub http_read_timeout: u64,

    /// Number of download workers. Zero derives a count from available
    /// parallelism.
    #[serde(default = "default_download_threads")]
    pub download_threads: usize,

    /// Attempts per mirror URL before falling back to the next one.
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
}

fn default_version_file() -> String {
    DEFAULT_VERSION_FILE.to_string()
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_read_timeout() -> u64 {
    5000
}

fn default_download_threads() -> usize {
    DEFAULT_DOWNLOAD_THREADS
}

fn default_retry_times() -> u32 {
    DEFAULT_RETRY_TIMES
}

fn deserialize_server<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ServerField::deserialize(deserializer).map(Vec::from)
}

impl GlobalOptions {
    /// Loads and validates the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing, unreadable, not
    /// valid JSON, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content).map_err(|source| match source {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parses and validates configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Validates field values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::Invalid {
                field: "server",
                reason: "at least one mirror URL is required".to_string(),
            });
        }

        for mirror in &self.server {
            if Url::parse(mirror).is_err() {
                return Err(ConfigError::Invalid {
                    field: "server",
                    reason: format!("`{mirror}` is not a valid URL"),
                });
            }
        }

        if self.retry_times == 0 {
            return Err(ConfigError::Invalid {
                field: "retry-times",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.version_file.is_empty() {
            return Err(ConfigError::Invalid {
                field: "version-file",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the effective worker count, deriving one from available
    /// parallelism when the configured value is zero.
    #[must_use]
    pub fn effective_download_threads(&self) -> usize {
        if self.download_threads > 0 {
            self.download_threads
        } else {
            thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(DEFAULT_DOWNLOAD_THREADS)
        }
    }
}
