//! Known-host fingerprints used to classify source URLs.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Audio file extensions recognized as direct file links.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "opus", "aac", "wma"];

/// Host classification, which selects the download strategy chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// Streaming/CDN song pages with a predictable download URL per item.
    StreamingCdn,
    /// A link straight to an audio file.
    DirectFile,
    /// Generic file-hosting pages; the media URL has to be scraped.
    FileHost,
    /// Social audio platforms, only reachable as a stream.
    SocialAudio,
    Unknown,
}

impl HostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostKind::StreamingCdn => "streaming_cdn",
            HostKind::DirectFile => "direct_file",
            HostKind::FileHost => "file_host",
            HostKind::SocialAudio => "social_audio",
            HostKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming_cdn" | "cdn" => Some(HostKind::StreamingCdn),
            "direct_file" | "direct" => Some(HostKind::DirectFile),
            "file_host" | "filehost" => Some(HostKind::FileHost),
            "social_audio" | "social" => Some(HostKind::SocialAudio),
            "unknown" => Some(HostKind::Unknown),
            _ => None,
        }
    }
}

/// One entry of the host table.
#[derive(Debug, Clone)]
pub struct HostRule {
    pub kind: HostKind,
    /// Host names; subdomains match too, a leading `www.` is ignored.
    pub hosts: Vec<String>,
    /// Pattern whose first capture group is the per-item identifier.
    pub id_pattern: Option<Regex>,
    /// Download URL templates with `{origin}` and `{id}` placeholders.
    pub download_templates: Vec<String>,
}

impl HostRule {
    pub fn new(kind: HostKind, hosts: &[&str]) -> Self {
        Self {
            kind,
            hosts: hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
            id_pattern: None,
            download_templates: Vec::new(),
        }
    }

    pub fn with_id_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex =
            Regex::new(pattern).with_context(|| format!("Invalid id pattern: {}", pattern))?;
        if regex.captures_len() < 2 {
            return Err(anyhow!("Id pattern needs a capture group: {}", pattern));
        }
        self.id_pattern = Some(regex);
        Ok(self)
    }

    pub fn with_templates(mut self, templates: &[&str]) -> Self {
        self.download_templates = templates.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        self.hosts
            .iter()
            .any(|h| host == h.as_str() || host.ends_with(&format!(".{}", h)))
    }

    pub fn item_id(&self, url: &Url) -> Option<String> {
        let pattern = self.id_pattern.as_ref()?;
        let haystack = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        pattern
            .captures(&haystack)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn render_templates(&self, url: &Url, id: &str) -> Vec<String> {
        let origin = url.origin().ascii_serialization();
        self.download_templates
            .iter()
            .map(|t| t.replace("{origin}", &origin).replace("{id}", id))
            .collect()
    }
}

/// Ordered list of host rules; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct HostTable {
    rules: Vec<HostRule>,
}

impl HostTable {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn push(&mut self, rule: HostRule) {
        self.rules.push(rule);
    }

    /// Rules added later take priority over the built-in ones.
    pub fn prepend(&mut self, rules: Vec<HostRule>) {
        let mut merged = rules;
        merged.append(&mut self.rules);
        self.rules = merged;
    }

    pub fn rules(&self) -> &[HostRule] {
        &self.rules
    }

    pub fn rule_for(&self, url: &Url) -> Option<&HostRule> {
        self.rules.iter().find(|r| r.matches(url))
    }
}

impl Default for HostTable {
    fn default() -> Self {
        let rules = vec![
            HostRule::new(HostKind::StreamingCdn, &["music.froste.lol"])
                .with_id_pattern(r"/song/([A-Za-z0-9]+)")
                .map(|r| {
                    r.with_templates(&[
                        "{origin}/song/{id}/download",
                        "{origin}/song/{id}/file",
                        "{origin}/api/song/{id}/download",
                    ])
                }),
            HostRule::new(HostKind::StreamingCdn, &["pillowcase.su"])
                .with_id_pattern(r"/f/([A-Za-z0-9]+)")
                .map(|r| {
                    r.with_templates(&[
                        "https://api.pillowcase.su/api/download/{id}",
                        "{origin}/f/{id}/download",
                    ])
                }),
            HostRule::new(HostKind::StreamingCdn, &["pixeldrain.com"])
                .with_id_pattern(r"/u/([A-Za-z0-9]+)")
                .map(|r| {
                    r.with_templates(&["{origin}/api/file/{id}?download", "{origin}/api/file/{id}"])
                }),
            Ok(HostRule::new(
                HostKind::FileHost,
                &["krakenfiles.com", "mediafire.com", "files.fm"],
            )),
            Ok(HostRule::new(
                HostKind::SocialAudio,
                &[
                    "soundcloud.com",
                    "youtube.com",
                    "youtu.be",
                    "bandcamp.com",
                    "audiomack.com",
                ],
            )),
        ];
        Self {
            rules: rules.into_iter().filter_map(|r| r.ok()).collect(),
        }
    }
}

pub(crate) fn has_audio_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.rsplit_once('.')
        .map(|(_, ext)| AUDIO_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
