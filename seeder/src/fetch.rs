//! Plain HTTP GET of the manifest into a directory.

use crate::error::FetchError;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Sent with every request instead of the HTTP library's default.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Used when the URL has no usable last path segment.
const FALLBACK_FILE_NAME: &str = "manifest";

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// `timeout` bounds each request from connect to the last body byte.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// Downloads `url` into `dest_dir`, named after the URL's last path segment.
    ///
    /// Returns the path written. When the body fails partway, the partial file is left in
    /// place for the caller to clean up; see [`FetchError::partial_file`].
    pub async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let path = dest_dir.join(file_name_from_url(&parsed));

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Request {
                    url: url.to_string(),
                    source: e,
                }
            }
        })?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let expected = response.content_length();
        let io_err = |source| FetchError::Io {
            path: path.clone(),
            source,
        };
        let mut file = File::create(&path).await.map_err(io_err)?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(
                        url,
                        path = %path.display(),
                        written,
                        error = %e,
                        "manifest body ended early"
                    );
                    return Err(FetchError::Incomplete {
                        path: path.clone(),
                        expected,
                        written,
                    });
                }
            };
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;

        if expected.is_some_and(|n| n != written) {
            return Err(FetchError::Incomplete {
                path,
                expected,
                written,
            });
        }
        tracing::debug!(url, path = %path.display(), bytes = written, "fetched manifest");
        Ok(path)
    }
}

/// The last non-empty path segment of `url`, reduced to a safe file name.
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .filter(|s| *s != "." && *s != "..")
        .map(|s| s.replace(['/', '\\'], "_"))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}
