mod file_config;

pub use file_config::{DownloadConfig, FileConfig, HostConfig, TranscodeConfig};

use crate::downloader::{DownloadSettings, DEFAULT_USER_AGENT};
use crate::links::{HostKind, HostRule, HostTable};
use crate::transcoder::PreviewStandard;
use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub fallback_clip: Option<PathBuf>,
    pub throttle_ms: u64,
    pub log_file: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,
    pub backup: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub media_root: PathBuf,
    /// Prefix of the stored preview pointer, always ending in `/`.
    pub url_prefix: String,
    pub ledger_path: PathBuf,
    pub scratch_root: PathBuf,
    pub fallback_clip: Option<PathBuf>,
    pub throttle_ms: u64,
    pub log_file: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,
    pub backup: bool,
    pub stale_claim_secs: i64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    // Feature configs (with defaults)
    pub download: DownloadSettings,
    pub transcode: TranscodeSettings,
    /// Host rules from the config file, checked before the built-in table.
    pub extra_hosts: Vec<HostRule>,
}

#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub standard: PreviewStandard,
    /// Timeout for every transcode and analysis subprocess.
    pub timeout: Duration,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            standard: PreviewStandard::default(),
            timeout: Duration::from_secs(120),
        }
    }
}

pub const DEFAULT_URL_PREFIX: &str = "/media/";
pub const DEFAULT_STALE_CLAIM_SECS: i64 = 3600;
pub const DEFAULT_THROTTLE_MS: u64 = 1500;

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| anyhow!("db_path must be specified via --db or in config file"))?;
        if !db_path.is_file() {
            bail!("Catalog database does not exist: {:?}", db_path);
        }

        let media_root = file
            .media_root
            .map(PathBuf::from)
            .or_else(|| cli.media_root.clone())
            .ok_or_else(|| {
                anyhow!("media_root must be specified via --media-root or in config file")
            })?;
        if !media_root.exists() {
            bail!("Media root does not exist: {:?}", media_root);
        }
        if !media_root.is_dir() {
            bail!("media_root is not a directory: {:?}", media_root);
        }

        let mut url_prefix = file
            .url_prefix
            .unwrap_or_else(|| DEFAULT_URL_PREFIX.to_string());
        if !url_prefix.ends_with('/') {
            url_prefix.push('/');
        }

        let ledger_path = file
            .ledger_path
            .map(PathBuf::from)
            .or_else(|| cli.ledger_path.clone())
            .unwrap_or_else(|| media_root.join("previews").join("content_hashes.json"));

        let scratch_root = file
            .scratch_dir
            .map(PathBuf::from)
            .or_else(|| cli.scratch_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("catalog-previews"));

        let fallback_clip = file
            .fallback_clip
            .map(PathBuf::from)
            .or_else(|| cli.fallback_clip.clone());
        if let Some(clip) = &fallback_clip {
            if !clip.is_file() {
                bail!("Fallback clip not found: {:?}", clip);
            }
        }

        let throttle_ms = file.throttle_ms.unwrap_or(cli.throttle_ms);
        let log_file = file.log_file.map(PathBuf::from).or_else(|| cli.log_file.clone());
        let metrics_file = file
            .metrics_file
            .map(PathBuf::from)
            .or_else(|| cli.metrics_file.clone());
        let backup = file.backup.unwrap_or(cli.backup);

        let stale_claim_secs = file.stale_claim_secs.unwrap_or(DEFAULT_STALE_CLAIM_SECS);
        if stale_claim_secs <= 0 {
            bail!("stale_claim_secs must be positive, got {}", stale_claim_secs);
        }

        // Download settings - merge file config with defaults
        let dl_file = file.download.unwrap_or_default();
        let dl_defaults = DownloadSettings::default();
        let download = DownloadSettings {
            min_download_bytes: dl_file.min_bytes.unwrap_or(dl_defaults.min_download_bytes),
            max_download_bytes: dl_file.max_bytes.unwrap_or(dl_defaults.max_download_bytes),
            request_timeout: dl_file
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(dl_defaults.request_timeout),
            stream_timeout: dl_file
                .stream_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(dl_defaults.stream_timeout),
            user_agent: dl_file
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        };
        if download.min_download_bytes >= download.max_download_bytes {
            bail!("download.min_bytes must be smaller than download.max_bytes");
        }

        // Transcode settings
        let tc_file = file.transcode.unwrap_or_default();
        let tc_defaults = TranscodeSettings::default();
        let base = tc_defaults.standard;
        let standard = PreviewStandard {
            clip_secs: tc_file.clip_secs.unwrap_or(base.clip_secs),
            sample_rate: tc_file.sample_rate.unwrap_or(base.sample_rate),
            bitrate_kbps: tc_file.bitrate_kbps.unwrap_or(base.bitrate_kbps),
            min_bitrate_kbps: tc_file.min_bitrate_kbps.unwrap_or(base.min_bitrate_kbps),
            fade_in_secs: tc_file.fade_in_secs.unwrap_or(base.fade_in_secs),
            fade_out_secs: tc_file.fade_out_secs.unwrap_or(base.fade_out_secs),
            min_clip_bytes: tc_file.min_clip_bytes.unwrap_or(base.min_clip_bytes),
            silence_threshold_db: tc_file
                .silence_threshold_db
                .unwrap_or(base.silence_threshold_db),
            ..base
        };
        if standard.clip_secs <= standard.fade_in_secs + standard.fade_out_secs {
            bail!(
                "transcode.clip_secs ({}) must be longer than the fades",
                standard.clip_secs
            );
        }
        if standard.bitrate_kbps < standard.min_bitrate_kbps {
            bail!(
                "transcode.bitrate_kbps ({}) is below the accepted minimum of {} kbps",
                standard.bitrate_kbps,
                standard.min_bitrate_kbps
            );
        }
        let transcode = TranscodeSettings {
            standard,
            timeout: tc_file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(tc_defaults.timeout),
        };

        let extra_hosts = file
            .hosts
            .iter()
            .map(host_rule_from_config)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            db_path,
            media_root,
            url_prefix,
            ledger_path,
            scratch_root,
            fallback_clip,
            throttle_ms,
            log_file,
            metrics_file,
            backup,
            stale_claim_secs,
            ffmpeg_path: file.ffmpeg_path.unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: file.ffprobe_path.unwrap_or_else(|| "ffprobe".to_string()),
            download,
            transcode,
            extra_hosts,
        })
    }

    /// Built-in host table with the configured rules in front.
    pub fn host_table(&self) -> HostTable {
        let mut table = HostTable::default();
        table.prepend(self.extra_hosts.clone());
        table
    }
}

fn host_rule_from_config(config: &HostConfig) -> Result<HostRule> {
    let kind = HostKind::parse(&config.kind)
        .filter(|k| *k != HostKind::Unknown)
        .ok_or_else(|| anyhow!("Invalid host kind in config: {:?}", config.kind))?;
    if config.hosts.is_empty() {
        bail!("Host rule of kind {} lists no hosts", kind.as_str());
    }

    let hosts: Vec<&str> = config.hosts.iter().map(String::as_str).collect();
    let templates: Vec<&str> = config
        .download_templates
        .iter()
        .map(String::as_str)
        .collect();

    let mut rule = HostRule::new(kind, &hosts).with_templates(&templates);
    if let Some(pattern) = &config.id_pattern {
        rule = rule
            .with_id_pattern(pattern)
            .with_context(|| format!("Invalid id_pattern for hosts {:?}", config.hosts))?;
    }
    Ok(rule)
}
