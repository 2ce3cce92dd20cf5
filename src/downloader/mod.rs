//! Multi-strategy audio downloader.
//!
//! Each [`HostKind`] maps to an ordered list of [`FetchStrategy`]s. The
//! downloader walks the list until one strategy produces a file that passes
//! verification (size, content sniffing and an ffprobe audio stream).

mod client;
mod models;
mod scrape;
mod scratch;
mod strategies;

pub use client::{HttpFetcher, DEFAULT_USER_AGENT};
pub use models::{
    DownloadError, DownloadErrorType, DownloadFailure, DownloadedFile, FailedAttempt,
    StrategyKind,
};
pub use scrape::{find_media_urls, find_token_form, TokenForm as ScrapedForm};
pub use scratch::ScratchDir;
pub use strategies::{CdnTemplates, DirectFetch, FetchStrategy, PageScrape, StreamCopy, TokenForm};

use crate::links::{ExtractedLink, HostKind};
use crate::media::MediaTool;
use crate::metrics;
use reqwest::Url;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Bytes read from the head of a file for content sniffing.
const SNIFF_BYTES: usize = 8192;

/// Limits applied to every download.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Files smaller than this are error pages, not audio.
    pub min_download_bytes: u64,
    pub max_download_bytes: u64,
    pub request_timeout: Duration,
    /// Timeout for the ffmpeg stream-copy subprocess.
    pub stream_timeout: Duration,
    pub user_agent: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            min_download_bytes: 10 * 1024,
            max_download_bytes: 512 * 1024 * 1024,
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Everything a strategy needs to fetch and verify a file.
pub struct FetchContext {
    pub http: HttpFetcher,
    pub tool: Arc<dyn MediaTool>,
    pub scratch: ScratchDir,
    pub settings: DownloadSettings,
}

impl FetchContext {
    pub fn new(
        tool: Arc<dyn MediaTool>,
        scratch: ScratchDir,
        settings: DownloadSettings,
    ) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(
            &settings.user_agent,
            settings.request_timeout,
            settings.max_download_bytes,
        )?;
        Ok(Self {
            http,
            tool,
            scratch,
            settings,
        })
    }

    /// Download a URL into the scratch directory and verify it is audio.
    pub async fn fetch_verified(
        &self,
        url: &str,
        referer: Option<&str>,
        strategy: StrategyKind,
    ) -> Result<DownloadedFile, DownloadError> {
        let dest = self.scratch.allocate(extension_for(url));
        if let Err(e) = self.http.download_to(url, referer, &dest).await {
            self.scratch.discard(&dest).await;
            return Err(e);
        }
        self.verify_file(dest, url.to_string(), strategy).await
    }

    /// Accept or reject a file already written to the scratch directory.
    ///
    /// A rejected file is deleted before returning.
    pub async fn verify_file(
        &self,
        path: PathBuf,
        source_url: String,
        strategy: StrategyKind,
    ) -> Result<DownloadedFile, DownloadError> {
        match self.check_audio(&path).await {
            Ok((size_bytes, metadata)) => Ok(DownloadedFile {
                path,
                size_bytes,
                metadata,
                strategy,
                source_url,
            }),
            Err(e) => {
                self.scratch.discard(&path).await;
                Err(e)
            }
        }
    }

    async fn check_audio(
        &self,
        path: &std::path::Path,
    ) -> Result<(u64, crate::media::AudioMetadata), DownloadError> {
        let size = tokio::fs::metadata(path).await?.len();
        if size < self.settings.min_download_bytes {
            return Err(DownloadError::rejected(format!(
                "file too small ({} bytes, minimum {})",
                size, self.settings.min_download_bytes
            )));
        }

        let mut head = vec![0u8; SNIFF_BYTES];
        let mut file = tokio::fs::File::open(path).await?;
        let read = file.read(&mut head).await?;
        head.truncate(read);
        check_sniffed_content(&head)?;

        let metadata = self
            .tool
            .probe(path)
            .await
            .map_err(|e| DownloadError::rejected(format!("not playable audio: {}", e)))?;
        Ok((size, metadata))
    }
}

/// Reject markup and anything `infer` recognises as a non-media type.
pub(crate) fn check_sniffed_content(head: &[u8]) -> Result<(), DownloadError> {
    let text_start = String::from_utf8_lossy(&head[..head.len().min(512)])
        .trim_start()
        .to_ascii_lowercase();
    if text_start.starts_with("<!doctype")
        || text_start.starts_with("<html")
        || text_start.starts_with("<?xml")
        || text_start.contains("<body")
    {
        return Err(DownloadError::rejected("content is an HTML/XML document"));
    }

    if let Some(kind) = infer::get(head) {
        match kind.matcher_type() {
            infer::MatcherType::Audio | infer::MatcherType::Video => {}
            _ => {
                return Err(DownloadError::rejected(format!(
                    "content sniffed as {}",
                    kind.mime_type()
                )))
            }
        }
    }
    Ok(())
}

/// File extension to use for a download, taken from the URL path.
pub(crate) fn extension_for(url: &str) -> &'static str {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    crate::links::AUDIO_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| path.ends_with(&format!(".{}", ext)))
        .unwrap_or("bin")
}

/// Strategy order for each host kind.
pub fn default_strategy_order(kind: HostKind) -> Vec<StrategyKind> {
    use StrategyKind::*;
    match kind {
        HostKind::DirectFile => vec![DirectFetch, StreamCopy],
        HostKind::StreamingCdn => vec![CdnTemplates, DirectFetch, PageScrape, StreamCopy],
        HostKind::FileHost => vec![PageScrape, TokenForm, DirectFetch, StreamCopy],
        HostKind::SocialAudio => vec![StreamCopy, PageScrape],
        HostKind::Unknown => vec![DirectFetch, PageScrape, StreamCopy],
    }
}

fn strategy_for(kind: StrategyKind) -> Arc<dyn FetchStrategy> {
    match kind {
        StrategyKind::DirectFetch => Arc::new(DirectFetch),
        StrategyKind::CdnTemplates => Arc::new(CdnTemplates),
        StrategyKind::PageScrape => Arc::new(PageScrape),
        StrategyKind::TokenForm => Arc::new(TokenForm),
        StrategyKind::StreamCopy => Arc::new(StreamCopy),
    }
}

/// Downloads a song's source audio by walking the strategy table.
pub struct Downloader {
    ctx: FetchContext,
    table: HashMap<HostKind, Vec<Arc<dyn FetchStrategy>>>,
}

impl Downloader {
    pub fn new(ctx: FetchContext) -> Self {
        let kinds = [
            HostKind::DirectFile,
            HostKind::StreamingCdn,
            HostKind::FileHost,
            HostKind::SocialAudio,
            HostKind::Unknown,
        ];
        let table = kinds
            .into_iter()
            .map(|kind| {
                let strategies = default_strategy_order(kind)
                    .into_iter()
                    .map(strategy_for)
                    .collect();
                (kind, strategies)
            })
            .collect();
        Self { ctx, table }
    }

    /// Replace the strategy list for one host kind.
    pub fn with_strategies(mut self, kind: HostKind, strategies: Vec<Arc<dyn FetchStrategy>>) -> Self {
        self.table.insert(kind, strategies);
        self
    }

    pub fn context(&self) -> &FetchContext {
        &self.ctx
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.ctx.scratch
    }

    /// Try every strategy for the link's host kind in order.
    pub async fn download(&self, link: &ExtractedLink) -> Result<DownloadedFile, DownloadFailure> {
        let strategies = self.table.get(&link.kind).map(Vec::as_slice).unwrap_or(&[]);
        let mut attempts = Vec::new();

        for strategy in strategies {
            let kind = strategy.kind();
            debug!(strategy = %kind, url = %link.url, "Trying download strategy");

            match strategy.fetch(&self.ctx, link).await {
                Ok(file) => {
                    metrics::record_download_attempt(kind.as_str(), "success");
                    info!(
                        strategy = %kind,
                        source = %file.source_url,
                        bytes = file.size_bytes,
                        duration_secs = file.metadata.duration_secs(),
                        "Downloaded source audio"
                    );
                    return Ok(file);
                }
                Err(error) => {
                    metrics::record_download_attempt(kind.as_str(), error.error_type.as_str());
                    if error.error_type == DownloadErrorType::NotApplicable {
                        debug!(strategy = %kind, url = %link.url, error = %error, "Strategy not applicable");
                    } else {
                        warn!(strategy = %kind, url = %link.url, error = %error, "Download strategy failed");
                    }
                    attempts.push(FailedAttempt {
                        strategy: kind,
                        error,
                    });
                }
            }
        }

        Err(DownloadFailure {
            url: link.url.clone(),
            attempts,
        })
    }
}
