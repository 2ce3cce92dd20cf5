use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub media_root: Option<String>,
    pub url_prefix: Option<String>,
    pub ledger_path: Option<String>,
    pub scratch_dir: Option<String>,
    pub fallback_clip: Option<String>,
    pub throttle_ms: Option<u64>,
    pub log_file: Option<String>,
    pub metrics_file: Option<String>,
    pub backup: Option<bool>,
    pub stale_claim_secs: Option<i64>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,

    // Feature configs
    pub download: Option<DownloadConfig>,
    pub transcode: Option<TranscodeConfig>,
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    pub min_bytes: Option<u64>,
    pub max_bytes: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub stream_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TranscodeConfig {
    pub clip_secs: Option<f64>,
    pub sample_rate: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub min_bitrate_kbps: Option<u32>,
    pub fade_in_secs: Option<f64>,
    pub fade_out_secs: Option<f64>,
    pub min_clip_bytes: Option<u64>,
    pub silence_threshold_db: Option<f64>,
    pub timeout_secs: Option<u64>,
}

/// Extra host rule, checked before the built-in table.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct HostConfig {
    /// One of: streaming_cdn, direct_file, file_host, social_audio
    pub kind: String,
    pub hosts: Vec<String>,
    pub id_pattern: Option<String>,
    pub download_templates: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
