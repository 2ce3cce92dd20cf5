//! HTTP client used by the download strategies.

use super::models::{DownloadError, DownloadErrorType};
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Response, StatusCode, Url};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Browser-like User-Agent; several hosts refuse obvious bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Shared HTTP client with a cookie jar.
///
/// One instance lives for the whole batch so that cookies picked up while
/// scraping a page are sent with the follow-up form post.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Create a new fetcher.
    ///
    /// # Arguments
    /// * `user_agent` - User-Agent sent with every request
    /// * `timeout` - Per-request timeout
    /// * `max_bytes` - Downloads larger than this are aborted
    pub fn new(user_agent: &str, timeout: Duration, max_bytes: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, max_bytes })
    }

    /// GET a URL, failing on any non-success status.
    pub async fn get(&self, url: &str, referer: Option<&str>) -> Result<Response, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        let response = request.send().await.map_err(DownloadError::from_reqwest)?;
        check_status(response)
    }

    /// POST url-encoded form fields, failing on any non-success status.
    pub async fn post_form(
        &self,
        action: &str,
        referer: Option<&str>,
        fields: &[(String, String)],
    ) -> Result<Response, DownloadError> {
        let mut request = self.client.post(action).form(fields);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        let response = request.send().await.map_err(DownloadError::from_reqwest)?;
        check_status(response)
    }

    /// GET a page and return its final URL (after redirects) and body text.
    pub async fn get_text(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<(Url, String), DownloadError> {
        let response = self.get(url, referer).await?;
        let final_url = response.url().clone();
        let body = response.text().await.map_err(DownloadError::from_reqwest)?;
        Ok((final_url, body))
    }

    /// Download a URL to `dest`, returning the number of bytes written.
    pub async fn download_to(
        &self,
        url: &str,
        referer: Option<&str>,
        dest: &Path,
    ) -> Result<u64, DownloadError> {
        let response = self.get(url, referer).await?;
        if is_markup(&response) {
            return Err(DownloadError::rejected(format!(
                "{} answered with an HTML page",
                url
            )));
        }
        self.save_response(response, dest).await
    }

    /// Stream a response body to `dest`, enforcing the size limit.
    pub async fn save_response(&self, response: Response, dest: &Path) -> Result<u64, DownloadError> {
        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(DownloadError::rejected(format!(
                    "response of {} bytes exceeds limit of {}",
                    len, self.max_bytes
                )));
            }
        }

        let mut file = File::create(dest).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(DownloadError::from_reqwest)?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(DownloadError::rejected(format!(
                    "download exceeded limit of {} bytes",
                    self.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(dest = ?dest, bytes = written, "Saved response body");
        Ok(written)
    }
}

/// The response's declared content type, lowercased without parameters.
pub fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
}

/// True when the response declares an HTML or XML document.
pub fn is_markup(response: &Response) -> bool {
    matches!(
        content_type(response).as_deref(),
        Some("text/html") | Some("application/xhtml+xml")
    )
}

fn check_status(response: Response) -> Result<Response, DownloadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_type = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => DownloadErrorType::NotFound,
        _ => DownloadErrorType::Connection,
    };
    Err(DownloadError::new(
        error_type,
        format!("HTTP {} from {}", status.as_u16(), response.url()),
    ))
}
