//! Remote image fetching
//!
//! A HEAD probe gates every request before any pipeline work. The download
//! itself streams the body to a timestamped file in the download directory.

use crate::error::{Result, StickerError};
use futures_util::stream::TryStreamExt;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// Details returned to clients when the probe fails
pub const UNREACHABLE_URL_DETAILS: &str = "The provided image URL is not reachable or invalid.";

const IMAGE_EXTENSIONS: &[&str] = &["bmp", "jpeg", "jpg", "png", "tiff", "webp"];

/// HTTP client pair for probing and downloading source images
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    probe: Client,
    client: Client,
    timeout: Duration,
}

impl ImageFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        // The probe requires a literal 200, so redirects are not followed
        let probe = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| StickerError::internal(format!("Failed to create HTTP client: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StickerError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            probe,
            client,
            timeout,
        })
    }

    /// HEAD the URL; only a 200 counts as reachable
    pub async fn is_reachable(&self, url: &str) -> bool {
        match self.probe.head(url).send().await {
            Ok(response) => {
                debug!(%url, status = %response.status(), "reachability probe");
                response.status() == StatusCode::OK
            },
            Err(e) => {
                debug!(%url, error = %e, "reachability probe failed");
                false
            },
        }
    }

    /// Reachability probe as a pipeline pre-check
    ///
    /// # Errors
    /// - `InvalidUrl` when the probe does not answer 200
    pub async fn ensure_reachable(&self, url: &str) -> Result<()> {
        if self.is_reachable(url).await {
            Ok(())
        } else {
            Err(StickerError::invalid_url(UNREACHABLE_URL_DETAILS))
        }
    }

    /// Download `url` into `dest_dir` as `{stamp}_{name}`
    ///
    /// # Errors
    /// - `Download` on transport failure, timeout or non-200 status
    /// - `Download` when the destination cannot be written
    pub async fn download(&self, url: &str, dest_dir: &Path, stamp: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            StickerError::download(format!(
                "Failed to create download directory '{}': {e}",
                dest_dir.display()
            ))
        })?;

        let file_name = format!("{stamp}_{}", image_file_name(url)?);
        let local_path = dest_dir.join(file_name);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, &e))?;

        info!(%url, status = %response.status(), "fetching image");
        if response.status() != StatusCode::OK {
            return Err(StickerError::download(format!(
                "Failed to download image from URL: {url}. HTTP Status Code: {}",
                response.status().as_u16()
            )));
        }

        let mut file = tokio::fs::File::create(&local_path).await.map_err(|e| {
            StickerError::download(format!("Failed to create '{}': {e}", local_path.display()))
        })?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let written = tokio::io::copy(&mut stream, &mut file).await;
        let flushed = match written {
            Ok(bytes) => file.flush().await.map(|()| bytes),
            Err(e) => Err(e),
        };

        match flushed {
            Ok(bytes) => {
                debug!(bytes, path = %local_path.display(), "download complete");
                Ok(local_path)
            },
            Err(e) => {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&local_path).await {
                    warn!(
                        path = %local_path.display(),
                        error = %cleanup,
                        "failed to remove partial download"
                    );
                }
                Err(StickerError::download(format!(
                    "Failed to read image body from {url}: {e}"
                )))
            },
        }
    }

    fn transport_error(&self, url: &str, error: &reqwest::Error) -> StickerError {
        if error.is_timeout() {
            StickerError::download(format!(
                "Request to {url} timed out after {}s; the request may be retried",
                self.timeout.as_secs()
            ))
        } else {
            StickerError::download(format!("Request to {url} failed: {error}"))
        }
    }
}

/// Local file name for a downloaded image
///
/// Takes the last path segment with the query stripped and percent-escapes
/// decoded. Names without a known image extension get `.jpg` appended.
pub fn image_file_name(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| StickerError::download(format!("Invalid URL '{url}': {e}")))?;

    let raw = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let raw = raw.split('?').next().unwrap_or_default();

    let decoded = urlencoding::decode(raw)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string());
    // Decoded separators must not escape the download directory
    let mut name: String = decoded
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    if name.is_empty() || name == "." || name == ".." {
        name = "image".to_string();
    }

    if !has_image_extension(&name) {
        name.push_str(".jpg");
    }
    Ok(name)
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}
