//! Download results and error types.

use crate::media::AudioMetadata;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a single strategy failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorType {
    Connection,    // Network error or non-success status
    Timeout,       // Request or subprocess timeout
    NotFound,      // 404/410 from the host
    Parse,         // Page markup or response could not be interpreted
    Storage,       // Scratch directory error
    Rejected,      // Got bytes, but not usable audio
    NotApplicable, // Strategy has nothing to try for this link
}

impl DownloadErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadErrorType::Connection => "connection",
            DownloadErrorType::Timeout => "timeout",
            DownloadErrorType::NotFound => "not_found",
            DownloadErrorType::Parse => "parse",
            DownloadErrorType::Storage => "storage",
            DownloadErrorType::Rejected => "rejected",
            DownloadErrorType::NotApplicable => "not_applicable",
        }
    }
}

/// Error from one download strategy.
#[derive(Debug, Clone, Error)]
#[error("{} error: {message}", .error_type.as_str())]
pub struct DownloadError {
    pub error_type: DownloadErrorType,
    pub message: String,
}

impl DownloadError {
    pub fn new(error_type: DownloadErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }

    pub fn not_applicable(message: impl Into<String>) -> Self {
        Self::new(DownloadErrorType::NotApplicable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(DownloadErrorType::Rejected, message)
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let error_type = if err.is_timeout() {
            DownloadErrorType::Timeout
        } else if err.status().map(|s| s.as_u16()) == Some(404) {
            DownloadErrorType::NotFound
        } else if err.is_decode() || err.is_body() {
            DownloadErrorType::Parse
        } else {
            DownloadErrorType::Connection
        };
        Self::new(error_type, err.to_string())
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::new(DownloadErrorType::Storage, err.to_string())
    }
}

/// Download strategies, in the vocabulary used by logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Plain GET with browser User-Agent and Referer.
    DirectFetch,
    /// Predictable CDN/download URLs built from the item id.
    CdnTemplates,
    /// Media URLs scraped out of the page markup.
    PageScrape,
    /// Download gated behind a CSRF-style form token.
    TokenForm,
    /// ffmpeg re-encode of the URL treated as a stream.
    StreamCopy,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::DirectFetch => "direct_fetch",
            StrategyKind::CdnTemplates => "cdn_templates",
            StrategyKind::PageScrape => "page_scrape",
            StrategyKind::TokenForm => "token_form",
            StrategyKind::StreamCopy => "stream_copy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified audio file in the scratch directory.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub metadata: AudioMetadata,
    pub strategy: StrategyKind,
    /// The URL the bytes actually came from.
    pub source_url: String,
}

/// One failed strategy, kept for the terminal failure report.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub strategy: StrategyKind,
    pub error: DownloadError,
}

/// Every strategy for the host kind was exhausted.
#[derive(Debug, Clone, Error)]
#[error("all download strategies failed for {url}: {}", summarize(.attempts))]
pub struct DownloadFailure {
    pub url: String,
    pub attempts: Vec<FailedAttempt>,
}

fn summarize(attempts: &[FailedAttempt]) -> String {
    if attempts.is_empty() {
        return "no strategy available".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}
