//! HTTP client for fetching documents and streaming downloads from
//! ranked mirror URLs.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, instrument, warn};

use super::error::FetchError;
use crate::config::GlobalOptions;

/// Fixed delay between retry attempts on the same URL.
const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// HTTP client with per-URL retry and ranked mirror fallback.
///
/// Designed to be created once per session and shared across download
/// workers, taking advantage of connection pooling.
#[derive(Debug, Clone)]
pub struct MirrorClient {
    client: Client,
    retry_times: u32,
}

impl MirrorClient {
    /// Creates a new client with explicit timeouts and retry budget.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(connect_timeout: Duration, read_timeout: Duration, retry_times: u32) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            retry_times: retry_times.max(1),
        }
    }

    /// Creates a client from validated global options.
    #[must_use]
    pub fn from_options(options: &GlobalOptions) -> Self {
        Self::new(
            Duration::from_millis(options.http_connect_timeout),
            Duration::from_millis(options.http_read_timeout),
            options.retry_times,
        )
    }

    /// Returns the configured per-URL retry budget.
    #[must_use]
    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    /// Fetches a text document, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once the retry budget is exhausted;
    /// non-2xx responses carry a truncated body excerpt.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("http request");

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match self.request_text(url).await {
                Ok(text) => return Ok(text),
                Err(error) => error,
            };

            if attempt >= self.retry_times {
                return Err(error);
            }

            warn!(
                attempt,
                remaining = self.retry_times - attempt,
                %error,
                "fetch failed, retrying"
            );
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    /// Fetches and deserializes a JSON document.
    ///
    /// `what` names the document in parse errors ("version manifest 1.4").
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Parse`] without retrying when the body is not
    /// valid JSON for `T`; fetch failures behave as in
    /// [`fetch_text`](Self::fetch_text).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T, FetchError> {
        let body = self.fetch_text(url).await?;
        serde_json::from_str(&body).map_err(|source| FetchError::parse(what, url, source))
    }

    /// Fetches a text document from the first reachable mirror.
    ///
    /// # Errors
    ///
    /// Connectivity-class errors fall through to the next mirror; any other
    /// error propagates immediately. If every mirror fails, the last error
    /// is returned.
    pub async fn fetch_text_multiple(&self, urls: &[String]) -> Result<String, FetchError> {
        let mut last_error = FetchError::NoSources;

        for url in urls {
            match self.fetch_text(url).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_connectivity() => {
                    if urls.len() > 1 {
                        error!(%url, error = %err, "mirror unreachable, falling back");
                    }
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error)
    }

    /// Fetches and deserializes a JSON document from the first reachable
    /// mirror, with the same fallback rules as
    /// [`fetch_text_multiple`](Self::fetch_text_multiple).
    ///
    /// # Errors
    ///
    /// See [`fetch_text_multiple`](Self::fetch_text_multiple); parse
    /// failures propagate immediately without trying further mirrors.
    pub async fn fetch_json_multiple<T: DeserializeOwned>(
        &self,
        urls: &[String],
        what: &str,
    ) -> Result<T, FetchError> {
        let mut last_error = FetchError::NoSources;

        for url in urls {
            match self.fetch_json(url, what).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_connectivity() => {
                    if urls.len() > 1 {
                        error!(%url, error = %err, "mirror unreachable, falling back");
                    }
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error)
    }

    /// Streams a file to `dest`, retrying transient failures.
    ///
    /// Literal `+` characters in the URL are escaped before the request so
    /// mirrors do not decode them as spaces. Parent directories of `dest`
    /// are created first. `on_chunk(chunk_bytes, bytes_so_far,
    /// expected_len)` is invoked after every chunk write.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once the retry budget is exhausted.
    #[instrument(skip(self, on_chunk), fields(url = %url, dest = %dest.display()))]
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        expected_len: u64,
        mut on_chunk: impl FnMut(u64, u64, u64),
    ) -> Result<(), FetchError> {
        let link = escape_plus(url);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::io(parent, source))?;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match self
                .stream_to_file(&link, dest, expected_len, &mut on_chunk)
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            if attempt >= self.retry_times {
                return Err(error);
            }

            warn!(
                attempt,
                remaining = self.retry_times - attempt,
                %error,
                "download failed, retrying"
            );
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    /// Streams a file from the first reachable mirror.
    ///
    /// `on_fallback()` fires every time the client gives up on a mirror
    /// after exhausting its retries, so the caller can roll back any
    /// partial-progress accounting for the failed attempt.
    ///
    /// # Errors
    ///
    /// Same fallback rules as [`fetch_text_multiple`](Self::fetch_text_multiple).
    pub async fn download_file_multiple(
        &self,
        urls: &[String],
        dest: &Path,
        expected_len: u64,
        mut on_chunk: impl FnMut(u64, u64, u64),
        mut on_fallback: impl FnMut(),
    ) -> Result<(), FetchError> {
        let mut last_error = FetchError::NoSources;

        for url in urls {
            match self
                .download_file(url, dest, expected_len, &mut on_chunk)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_connectivity() => {
                    on_fallback();
                    if urls.len() > 1 {
                        error!(%url, error = %err, "mirror unreachable, falling back");
                    }
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error)
    }

    /// One GET attempt returning the response body as text.
    async fn request_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::classify(url, source))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::http_status(url, status.as_u16(), &body));
        }

        response
            .text()
            .await
            .map_err(|source| FetchError::classify(url, source))
    }

    /// One download attempt streaming the response body to `dest`.
    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        expected_len: u64,
        on_chunk: &mut impl FnMut(u64, u64, u64),
    ) -> Result<(), FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::classify(url, source))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::http_status(url, status.as_u16(), &body));
        }

        let file = File::create(dest)
            .await
            .map_err(|source| FetchError::io(dest, source))?;
        let mut writer = BufWriter::with_capacity(choose_write_buffer(expected_len), file);

        let mut received = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| FetchError::classify(url, source))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| FetchError::io(dest, source))?;
            received += chunk.len() as u64;
            on_chunk(chunk.len() as u64, received, expected_len);
        }

        writer
            .flush()
            .await
            .map_err(|source| FetchError::io(dest, source))?;

        debug!(bytes = received, "download attempt complete");
        Ok(())
    }
}

/// Escapes literal `+` characters in a URL path.
///
/// Mirrors behind generic HTTP servers decode `+` as a space in some
/// configurations; file snapshots legitimately contain `+` in names.
fn escape_plus(url: &str) -> String {
    url.replace('+', "%2B")
}

/// Chooses the write-buffer capacity for a streaming download.
///
/// Monotonically increasing staircase over the expected file length,
/// trading memory for fewer write syscalls on large files.
fn choose_write_buffer(expected_len: u64) -> usize {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    let buffer = match expected_len {
        len if len < MB => 16 * KB,
        len if len < 2 * MB => 32 * KB,
        len if len < 4 * MB => 64 * KB,
        len if len < 8 * MB => 256 * KB,
        len if len < 16 * MB => 512 * KB,
        len if len < 32 * MB => MB,
        len if len < 64 * MB => 2 * MB,
        len if len < 128 * MB => 4 * MB,
        len if len < 256 * MB => 8 * MB,
        len if len < 512 * MB => 16 * MB,
        len if len < GB => 32 * MB,
        _ => 64 * MB,
    };

    usize::try_from(buffer).unwrap_or(usize::MAX)
}
