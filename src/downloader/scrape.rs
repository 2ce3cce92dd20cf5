//! Raw-markup scraping for media URLs and token-gated download forms.
//!
//! Host pages are not parsed as HTML; a handful of patterns over the raw text
//! is enough for the players and download forms seen in practice.

use crate::links::AUDIO_EXTENSIONS;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Url;

lazy_static! {
    static ref MEDIA_TAG_SRC: Regex =
        Regex::new(r#"(?is)<(?:audio|source)\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
            .expect("valid media tag pattern");
    static ref OG_AUDIO: Regex = Regex::new(
        r#"(?is)<meta\b[^>]*?property\s*=\s*["']og:audio(?::url|:secure_url)?["'][^>]*?content\s*=\s*["']([^"']+)["']"#
    )
    .expect("valid og:audio pattern");
    static ref PLAYER_CONFIG: Regex = Regex::new(
        r#"(?i)["'](file|url|src|audio|stream_url|mp3|download_url)["']\s*:\s*["']([^"']+)["']"#
    )
    .expect("valid player config pattern");
    static ref AUDIO_PATH: Regex = Regex::new(
        r#"(?i)https?://[^\s"'<>()]+?\.(?:mp3|wav|flac|m4a|ogg|opus|aac|wma)(?:\?[^\s"'<>()]*)?"#
    )
    .expect("valid audio path pattern");
    static ref FORM: Regex =
        Regex::new(r#"(?is)<form\b([^>]*)>(.*?)</form>"#).expect("valid form pattern");
    static ref INPUT: Regex = Regex::new(r#"(?is)<input\b([^>]*)>"#).expect("valid input pattern");
    static ref ATTRIBUTE: Regex =
        Regex::new(r#"(?is)([a-z_:\-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("valid attribute pattern");
}

/// Names that mark a hidden input as an anti-forgery token.
const TOKEN_NAME_MARKERS: &[&str] = &["token", "csrf", "authenticity"];

/// Candidate count cap; pages that embed dozens of tracks are not worth walking.
const MAX_CANDIDATES: usize = 8;

/// A download form with its hidden fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenForm {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

/// Find media URLs in page markup, most specific sources first.
///
/// Order: `<audio>`/`<source>` tags, `og:audio` meta, inline player
/// configuration, then any absolute URL ending in an audio extension.
/// Relative URLs are resolved against `base`; duplicates are dropped.
pub fn find_media_urls(html: &str, base: &Url) -> Vec<String> {
    let text = html.replace("\\/", "/");
    let mut found: Vec<String> = Vec::new();

    let mut push = |raw: &str| {
        if found.len() >= MAX_CANDIDATES {
            return;
        }
        if let Some(url) = resolve(raw, base) {
            if !found.contains(&url) {
                found.push(url);
            }
        }
    };

    for caps in MEDIA_TAG_SRC.captures_iter(&text) {
        push(&caps[1]);
    }
    for caps in OG_AUDIO.captures_iter(&text) {
        push(&caps[1]);
    }
    for caps in PLAYER_CONFIG.captures_iter(&text) {
        let key = caps[1].to_ascii_lowercase();
        let value = &caps[2];
        // Generic keys show up all over page configs; only take audio-looking values.
        if (key == "url" || key == "src") && !looks_like_audio(value) {
            continue;
        }
        push(value);
    }
    for m in AUDIO_PATH.find_iter(&text) {
        push(m.as_str());
    }

    found
}

/// Find the first form that carries a CSRF-style hidden token.
pub fn find_token_form(html: &str, base: &Url) -> Option<TokenForm> {
    FORM.captures_iter(html).find_map(|caps| {
        let form_attrs = attributes(&caps[1]);
        let body = &caps[2];

        let mut fields = Vec::new();
        let mut has_token = false;
        for input in INPUT.captures_iter(body) {
            let attrs = attributes(&input[1]);
            let is_hidden = attr(&attrs, "type")
                .map(|t| t.eq_ignore_ascii_case("hidden"))
                .unwrap_or(false);
            let Some(name) = attr(&attrs, "name") else {
                continue;
            };
            if !is_hidden {
                continue;
            }
            let lowered = name.to_ascii_lowercase();
            if TOKEN_NAME_MARKERS.iter().any(|m| lowered.contains(m)) {
                has_token = true;
            }
            let value = attr(&attrs, "value").unwrap_or_default();
            fields.push((name.to_string(), unescape(value)));
        }

        if !has_token {
            return None;
        }

        let action = match attr(&form_attrs, "action").filter(|a| !a.trim().is_empty()) {
            Some(action) => resolve(action, base)?,
            None => base.to_string(),
        };
        Some(TokenForm { action, fields })
    })
}

fn attributes(tag_body: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(tag_body)
        .map(|c| {
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            (c[1].to_ascii_lowercase(), value.to_string())
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn unescape(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn looks_like_audio(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    let path = lowered.split(['?', '#']).next().unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(&format!(".{}", ext)))
        || path.contains("/stream")
        || path.contains("/download")
        || path.contains("/audio")
}

fn resolve(raw: &str, base: &Url) -> Option<String> {
    let raw = unescape(raw.trim());
    if raw.is_empty() || raw.starts_with("data:") || raw.starts_with("blob:") {
        return None;
    }
    let url = base.join(&raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://files.example/f/abc").unwrap()
    }

    #[test]
    fn test_audio_tag_and_relative_url() {
        let html = r#"<html><audio controls src="/media/abc.mp3"></audio>
            <source type="audio/ogg" src='https://cdn.files.example/abc.ogg'></html>"#;
        assert_eq!(
            find_media_urls(html, &base()),
            vec![
                "https://files.example/media/abc.mp3".to_string(),
                "https://cdn.files.example/abc.ogg".to_string(),
            ]
        );
    }

    #[test]
    fn test_player_config_with_escaped_slashes() {
        let html = r#"<script>player.setup({"file":"https:\/\/cdn.example\/t\/1?sig=a&amp;e=2","image":"x.png"});</script>"#;
        assert_eq!(
            find_media_urls(html, &base()),
            vec!["https://cdn.example/t/1?sig=a&e=2".to_string()]
        );
    }

    #[test]
    fn test_generic_url_key_needs_audio_shape() {
        let html = r#"{"url":"https://files.example/about","src":"/stream/abc"}"#;
        assert_eq!(
            find_media_urls(html, &base()),
            vec!["https://files.example/stream/abc".to_string()]
        );
    }

    #[test]
    fn test_og_audio_and_bare_cdn_path_deduplicated() {
        let html = r#"<meta property="og:audio" content="https://cdn.example/a.m4a">
            <p>mirror: https://cdn.example/a.m4a</p>
            <a href="https://cdn.example/b.flac?dl=1">b</a>"#;
        assert_eq!(
            find_media_urls(html, &base()),
            vec![
                "https://cdn.example/a.m4a".to_string(),
                "https://cdn.example/b.flac?dl=1".to_string(),
            ]
        );
    }

    #[test]
    fn test_no_media_in_page() {
        assert!(find_media_urls("<html><body>404</body></html>", &base()).is_empty());
    }

    #[test]
    fn test_find_token_form() {
        let html = r#"
            <form action="/search"><input name="q"></form>
            <form method="post" action="/f/abc/download">
              <input type="hidden" name="csrf_token" value="t0k&amp;en">
              <input value="abc" name="file_id" type="hidden">
              <button type="submit">Download</button>
            </form>"#;
        let form = find_token_form(html, &base()).unwrap();
        assert_eq!(form.action, "https://files.example/f/abc/download");
        assert_eq!(
            form.fields,
            vec![
                ("csrf_token".to_string(), "t0k&en".to_string()),
                ("file_id".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_token_form_without_action_posts_to_page() {
        let html = r#"<form method="POST"><input type="hidden" name="authenticity_token" value="x"></form>"#;
        let form = find_token_form(html, &base()).unwrap();
        assert_eq!(form.action, "https://files.example/f/abc");
    }

    #[test]
    fn test_form_without_token_ignored() {
        let html = r#"<form action="/dl"><input type="hidden" name="id" value="1"></form>"#;
        assert!(find_token_form(html, &base()).is_none());
    }
}
