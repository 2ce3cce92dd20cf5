//! The individual download strategies.

use super::client::{content_type, is_markup};
use super::models::{DownloadError, DownloadErrorType, DownloadedFile, StrategyKind};
use super::scrape::{find_media_urls, find_token_form};
use super::FetchContext;
use crate::links::ExtractedLink;
use crate::media::ConversionError;
use async_trait::async_trait;
use tracing::debug;

/// One way of turning a link into a verified local audio file.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn fetch(
        &self,
        ctx: &FetchContext,
        link: &ExtractedLink,
    ) -> Result<DownloadedFile, DownloadError>;
}

/// Plain GET of the link with a browser User-Agent and the page as Referer.
///
/// When the link already points at a rendered download template, that URL
/// belongs to `CdnTemplates` and the page itself is fetched instead.
pub struct DirectFetch;

#[async_trait]
impl FetchStrategy for DirectFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectFetch
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        link: &ExtractedLink,
    ) -> Result<DownloadedFile, DownloadError> {
        let url = if link.candidates.contains(&link.url) {
            &link.page_url
        } else {
            &link.url
        };
        ctx.fetch_verified(url, Some(&link.page_url), self.kind())
            .await
    }
}

/// Try the predictable download URLs rendered from the host rule.
pub struct CdnTemplates;

#[async_trait]
impl FetchStrategy for CdnTemplates {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CdnTemplates
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        link: &ExtractedLink,
    ) -> Result<DownloadedFile, DownloadError> {
        if link.candidates.is_empty() {
            return Err(DownloadError::not_applicable(
                "no item id or download templates for this link",
            ));
        }
        try_each(ctx, &link.candidates, &link.page_url, self.kind()).await
    }
}

/// Fetch the page and try every media URL found in its markup.
pub struct PageScrape;

#[async_trait]
impl FetchStrategy for PageScrape {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PageScrape
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        link: &ExtractedLink,
    ) -> Result<DownloadedFile, DownloadError> {
        let (final_url, html) = ctx.http.get_text(&link.page_url, None).await?;
        let urls = find_media_urls(&html, &final_url);
        debug!(page = %final_url, found = urls.len(), "Scraped page for media URLs");
        if urls.is_empty() {
            return Err(DownloadError::new(
                DownloadErrorType::Parse,
                "no media URL found in page markup",
            ));
        }
        try_each(ctx, &urls, final_url.as_str(), self.kind()).await
    }
}

/// Submit the page's token-protected download form.
///
/// The response is either the audio itself, a JSON document pointing at it,
/// or another page with a player on it.
pub struct TokenForm;

#[async_trait]
impl FetchStrategy for TokenForm {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenForm
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        link: &ExtractedLink,
    ) -> Result<DownloadedFile, DownloadError> {
        let (page_url, html) = ctx.http.get_text(&link.page_url, None).await?;
        let form = find_token_form(&html, &page_url).ok_or_else(|| {
            DownloadError::new(DownloadErrorType::Parse, "no token form found in page")
        })?;
        debug!(action = %form.action, fields = form.fields.len(), "Submitting download form");

        let response = ctx
            .http
            .post_form(&form.action, Some(page_url.as_str()), &form.fields)
            .await?;
        let final_url = response.url().clone();
        let declared = content_type(&response).unwrap_or_default();

        if declared.contains("json") {
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| DownloadError::new(DownloadErrorType::Parse, e.to_string()))?;
            let target = json_media_url(&body).ok_or_else(|| {
                DownloadError::new(DownloadErrorType::Parse, "form response has no media URL")
            })?;
            let target = final_url
                .join(&target)
                .map_err(|e| DownloadError::new(DownloadErrorType::Parse, e.to_string()))?;
            return ctx
                .fetch_verified(target.as_str(), Some(page_url.as_str()), self.kind())
                .await;
        }

        if is_markup(&response) {
            let body = response.text().await.map_err(DownloadError::from_reqwest)?;
            let urls = find_media_urls(&body, &final_url);
            if urls.is_empty() {
                return Err(DownloadError::new(
                    DownloadErrorType::Parse,
                    "form response page has no media URL",
                ));
            }
            return try_each(ctx, &urls, final_url.as_str(), self.kind()).await;
        }

        let dest = ctx.scratch.allocate(super::extension_for(final_url.as_str()));
        if let Err(e) = ctx.http.save_response(response, &dest).await {
            ctx.scratch.discard(&dest).await;
            return Err(e);
        }
        ctx.verify_file(dest, final_url.to_string(), self.kind())
            .await
    }
}

/// Let ffmpeg read the URL as a stream and re-encode it to MP3.
///
/// Covers hosts that only serve HLS/DASH manifests or otherwise resist a
/// plain GET. There is no seeking; the whole stream is read.
pub struct StreamCopy;

#[async_trait]
impl FetchStrategy for StreamCopy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StreamCopy
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        link: &ExtractedLink,
    ) -> Result<DownloadedFile, DownloadError> {
        let dest = ctx.scratch.allocate("mp3");
        let args = stream_copy_args(
            &link.url,
            &link.page_url,
            &ctx.settings.user_agent,
            &dest.to_string_lossy(),
        );

        if let Err(e) = ctx.tool.ffmpeg(&args, ctx.settings.stream_timeout).await {
            ctx.scratch.discard(&dest).await;
            return Err(from_conversion(e));
        }
        ctx.verify_file(dest, link.url.clone(), self.kind()).await
    }
}

pub(crate) fn stream_copy_args(url: &str, referer: &str, user_agent: &str, dest: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-user_agent".to_string(),
        user_agent.to_string(),
        "-headers".to_string(),
        format!("Referer: {}\r\n", referer),
        "-i".to_string(),
        url.to_string(),
        "-vn".to_string(),
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-y".to_string(),
        dest.to_string(),
    ]
}

/// Try a list of URLs in order, returning the first verified file.
async fn try_each(
    ctx: &FetchContext,
    urls: &[String],
    referer: &str,
    strategy: StrategyKind,
) -> Result<DownloadedFile, DownloadError> {
    let mut last_error = None;
    for url in urls {
        match ctx.fetch_verified(url, Some(referer), strategy).await {
            Ok(file) => return Ok(file),
            Err(e) => {
                debug!(url = %url, error = %e, "Candidate URL failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| DownloadError::not_applicable("no candidate URLs")))
}

/// Look for a media URL under the keys download endpoints commonly use.
fn json_media_url(value: &serde_json::Value) -> Option<String> {
    const KEYS: &[&str] = &["download_url", "url", "file", "link", "src"];
    match value {
        serde_json::Value::Object(map) => {
            for key in KEYS {
                if let Some(serde_json::Value::String(s)) = map.get(*key) {
                    if !s.is_empty() {
                        return Some(s.clone());
                    }
                }
            }
            map.values().find_map(json_media_url)
        }
        serde_json::Value::Array(items) => items.iter().find_map(json_media_url),
        _ => None,
    }
}

fn from_conversion(err: ConversionError) -> DownloadError {
    match err {
        ConversionError::Timeout(_, _) => {
            DownloadError::new(DownloadErrorType::Timeout, err.to_string())
        }
        ConversionError::Io(e) => e.into(),
        other => DownloadError::new(DownloadErrorType::Connection, other.to_string()),
    }
}
