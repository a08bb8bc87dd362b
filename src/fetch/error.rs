//! Error types for the mirror access layer.
//!
//! Fetch failures are classified into a closed taxonomy so callers can
//! decide mechanically: connectivity-class errors are retried and trigger
//! mirror fallback, protocol errors are retried on the same mirror only,
//! and format errors surface immediately.

use std::path::PathBuf;

use thiserror::Error;

/// Maximum number of response-body characters carried in a status error.
const BODY_EXCERPT_MAX: usize = 300;

/// Errors that can occur while fetching documents or downloading files.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote host refused the connection.
    #[error("connection rejected by {url}: {detail}")]
    ConnectionRejected {
        /// The URL that was being contacted.
        url: String,
        /// Underlying error text.
        detail: String,
    },

    /// The connection dropped mid-transfer.
    #[error("connection interrupted while transferring from {url}: {detail}")]
    ConnectionInterrupted {
        /// The URL that was being transferred.
        url: String,
        /// Underlying error text.
        detail: String,
    },

    /// Connect or read exceeded the configured timeout.
    #[error("connection timed out for {url}")]
    ConnectionTimeout {
        /// The URL that timed out.
        url: String,
    },

    /// Network-level error outside the connectivity classes above
    /// (TLS failures, redirect loops, malformed responses).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (non-2xx status).
    #[error("HTTP {status} fetching {url}{}", excerpt_suffix(.body_excerpt))]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Up to 300 characters of the response body, for diagnostics.
        body_excerpt: Option<String>,
    },

    /// A fetched document is not valid JSON for the expected shape.
    #[error("failed to parse {what} from {url}: {source}")]
    Parse {
        /// Human-readable name of the document being parsed.
        what: String,
        /// The URL the document came from.
        url: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// File system error while writing a download to disk.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// No mirror URLs were supplied at all.
    #[error("no mirror URLs configured")]
    NoSources,
}

fn excerpt_suffix(body_excerpt: &Option<String>) -> String {
    match body_excerpt {
        Some(excerpt) => format!(": {excerpt}"),
        None => String::new(),
    }
}

impl FetchError {
    /// Creates a connection-rejected error.
    pub fn rejected(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConnectionRejected {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates a connection-interrupted error.
    pub fn interrupted(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConnectionInterrupted {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates a connection-timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::ConnectionTimeout { url: url.into() }
    }

    /// Creates an HTTP status error, truncating the body to an excerpt.
    pub fn http_status(url: impl Into<String>, status: u16, body: &str) -> Self {
        let body = body.trim();
        let body_excerpt = if body.is_empty() {
            None
        } else if body.chars().count() > BODY_EXCERPT_MAX {
            let truncated: String = body.chars().take(BODY_EXCERPT_MAX).collect();
            Some(format!("{truncated}\n..."))
        } else {
            Some(body.to_string())
        };
        Self::HttpStatus {
            url: url.into(),
            status,
            body_excerpt,
        }
    }

    /// Creates a parse error naming the offending document.
    pub fn parse(what: impl Into<String>, url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            what: what.into(),
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classifies a reqwest error into the taxonomy.
    ///
    /// Connection refusal, timeouts, and body/transfer failures map onto
    /// the three connectivity classes; everything else is carried as a
    /// generic network error that does not trigger mirror fallback.
    pub fn classify(url: &str, source: reqwest::Error) -> Self {
        if source.is_connect() {
            Self::rejected(url, source.to_string())
        } else if source.is_timeout() {
            Self::timeout(url)
        } else if source.is_body() || source.is_request() {
            Self::interrupted(url, source.to_string())
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Returns true for errors in the connectivity class: these are worth
    /// retrying on another mirror.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRejected { .. }
                | Self::ConnectionInterrupted { .. }
                | Self::ConnectionTimeout { .. }
        )
    }
}
