//! Link extraction from free-text song metadata.
//!
//! Songs carry a `links` field that is prose with zero or more URLs embedded
//! in it. The extractor pulls every URL out, classifies each one against the
//! host table and picks the first one a download strategy knows how to handle.

mod host_table;

pub use host_table::{HostKind, HostRule, HostTable, AUDIO_EXTENSIONS};

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

lazy_static! {
    static ref URL_PATTERN: Regex =
        Regex::new(r#"(?i)(?:https?://|www\.)[^\s<>"'`]+"#).expect("valid url pattern");
}

/// Characters that end a sentence rather than a URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'];

/// A source URL selected from a song's links, with its host classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// URL the downloader should try first.
    pub url: String,
    /// The URL as it appeared in the text (used as `Referer` and for scraping).
    pub page_url: String,
    pub kind: HostKind,
    /// Per-item identifier pulled out of the page URL, when the host rule has one.
    pub item_id: Option<String>,
    /// Rendered download templates for the item, in priority order.
    pub candidates: Vec<String>,
}

impl ExtractedLink {
    pub fn is_known_host(&self) -> bool {
        self.kind != HostKind::Unknown
    }
}

/// Extract every URL-looking substring from free text, in order of appearance.
///
/// Bare `www.` links are normalized to `https://`.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            if raw.len() <= "www.".len() {
                return None;
            }
            let normalized = if raw.to_ascii_lowercase().starts_with("www.") {
                format!("https://{}", raw)
            } else {
                raw.to_string()
            };
            Url::parse(&normalized).ok().map(|_| normalized)
        })
        .collect()
}

/// Finds a candidate audio URL in song metadata.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    table: HostTable,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new(HostTable::default())
    }
}

impl LinkExtractor {
    pub fn new(table: HostTable) -> Self {
        Self { table }
    }

    pub fn host_table(&self) -> &HostTable {
        &self.table
    }

    /// Classify a single URL.
    pub fn classify(&self, url: &str) -> ExtractedLink {
        let Ok(parsed) = Url::parse(url) else {
            return ExtractedLink {
                url: url.to_string(),
                page_url: url.to_string(),
                kind: HostKind::Unknown,
                item_id: None,
                candidates: Vec::new(),
            };
        };

        if host_table::has_audio_extension(&parsed) {
            return ExtractedLink {
                url: url.to_string(),
                page_url: url.to_string(),
                kind: HostKind::DirectFile,
                item_id: None,
                candidates: Vec::new(),
            };
        }

        let Some(rule) = self.table.rule_for(&parsed) else {
            return ExtractedLink {
                url: url.to_string(),
                page_url: url.to_string(),
                kind: HostKind::Unknown,
                item_id: None,
                candidates: Vec::new(),
            };
        };

        let item_id = rule.item_id(&parsed);
        let candidates = item_id
            .as_deref()
            .map(|id| rule.render_templates(&parsed, id))
            .unwrap_or_default();

        // CDN pages are resolved straight to their predictable download URL.
        let primary = match (rule.kind, candidates.first()) {
            (HostKind::StreamingCdn, Some(first)) => first.clone(),
            _ => url.to_string(),
        };

        ExtractedLink {
            url: primary,
            page_url: url.to_string(),
            kind: rule.kind,
            item_id,
            candidates,
        }
    }

    /// Pick the source URL for a song.
    ///
    /// The first URL that matches a known strategy wins over a generic
    /// first-URL fallback. Returns `None` when the text has no URL at all.
    pub fn extract(&self, text: &str) -> Option<ExtractedLink> {
        let urls = extract_urls(text);
        if urls.is_empty() {
            debug!("No URL found in links text");
            return None;
        }

        let classified: Vec<ExtractedLink> = urls.iter().map(|u| self.classify(u)).collect();
        let selected = classified
            .iter()
            .find(|link| link.is_known_host())
            .or_else(|| classified.first())
            .cloned();

        if let Some(link) = &selected {
            debug!(
                url = %link.url,
                kind = link.kind.as_str(),
                total_urls = urls.len(),
                "Selected source link"
            );
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_table() -> HostTable {
        let mut table = HostTable::empty();
        table.push(
            HostRule::new(HostKind::StreamingCdn, &["music.example"])
                .with_id_pattern(r"/song/([A-Za-z0-9]+)")
                .unwrap()
                .with_templates(&["{origin}/song/{id}/download", "{origin}/api/song/{id}"]),
        );
        table.push(HostRule::new(HostKind::FileHost, &["files.example"]));
        table.push(HostRule::new(HostKind::SocialAudio, &["soundcloud.com"]));
        table
    }

    #[test]
    fn test_extract_urls_from_prose() {
        let urls = extract_urls(
            "og file here: https://a.example/x.mp3, backup (www.b.example/page). thanks!",
        );
        assert_eq!(
            urls,
            vec![
                "https://a.example/x.mp3".to_string(),
                "https://www.b.example/page".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_urls_none() {
        assert!(extract_urls("no urls here").is_empty());
        assert!(extract_urls("").is_empty());
        assert!(extract_urls("www.").is_empty());
    }

    #[test]
    fn test_streaming_cdn_resolves_download_url() {
        let extractor = LinkExtractor::new(example_table());
        let link = extractor
            .extract("check this http://music.example/song/abc123/page")
            .unwrap();

        assert_eq!(link.kind, HostKind::StreamingCdn);
        assert_eq!(link.url, "http://music.example/song/abc123/download");
        assert_eq!(link.page_url, "http://music.example/song/abc123/page");
        assert_eq!(link.item_id.as_deref(), Some("abc123"));
        assert_eq!(link.candidates.len(), 2);
        assert_eq!(link.candidates[1], "http://music.example/api/song/abc123");
    }

    #[test]
    fn test_direct_file_detected_by_extension() {
        let extractor = LinkExtractor::new(example_table());
        let link = extractor.classify("https://cdn.other.example/files/Track%201.MP3?x=1");
        assert_eq!(link.kind, HostKind::DirectFile);
    }

    #[test]
    fn test_known_host_preferred_over_first_url() {
        let extractor = LinkExtractor::new(example_table());
        let link = extractor
            .extract("snippet https://random.example/a then https://soundcloud.com/artist/song")
            .unwrap();
        assert_eq!(link.kind, HostKind::SocialAudio);
        assert_eq!(link.url, "https://soundcloud.com/artist/song");
    }

    #[test]
    fn test_unknown_first_url_fallback() {
        let extractor = LinkExtractor::new(example_table());
        let link = extractor
            .extract("https://random.example/a https://other.example/b")
            .unwrap();
        assert_eq!(link.kind, HostKind::Unknown);
        assert_eq!(link.url, "https://random.example/a");
    }

    #[test]
    fn test_no_url_returns_none() {
        let extractor = LinkExtractor::new(example_table());
        assert!(extractor.extract("no urls here").is_none());
    }

    #[test]
    fn test_cdn_without_id_keeps_page_url() {
        let extractor = LinkExtractor::new(example_table());
        let link = extractor.classify("http://music.example/about");
        assert_eq!(link.kind, HostKind::StreamingCdn);
        assert_eq!(link.url, "http://music.example/about");
        assert!(link.candidates.is_empty());
    }
}
