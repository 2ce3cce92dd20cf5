//! Audio probing and processing using ffmpeg/ffprobe.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur while running the media tools.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("ffmpeg failed: {0}")]
    ConversionFailed(String),

    #[error("{0} timed out after {1}s")]
    Timeout(&'static str, u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

/// Audio metadata extracted from ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetadata {
    /// Duration in milliseconds.
    pub duration_ms: i64,
    /// Audio codec name.
    pub codec: String,
    /// Bitrate in kbps.
    pub bitrate: Option<i32>,
    /// Sample rate in Hz.
    pub sample_rate: Option<i32>,
    /// Number of channels.
    pub channels: Option<i32>,
    /// Format name (e.g., "mp3", "flac").
    pub format: String,
}

impl AudioMetadata {
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// Captured output of a finished ffmpeg run.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Seam over the external media tools.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Probe a local file; fails when it has no audio stream.
    async fn probe(&self, path: &Path) -> Result<AudioMetadata, ConversionError>;

    /// Run ffmpeg with the given arguments, killing it after `timeout`.
    async fn ffmpeg(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<FfmpegOutput, ConversionError>;
}

/// ffprobe JSON output structure.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<i32>,
    bit_rate: Option<String>,
}

/// [`MediaTool`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
    probe_timeout: Duration,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe", Duration::from_secs(30))
    }
}

impl FfmpegTool {
    pub fn new(
        ffmpeg_bin: impl Into<PathBuf>,
        ffprobe_bin: impl Into<PathBuf>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            probe_timeout,
        }
    }

    /// Check if ffmpeg and ffprobe are available.
    pub async fn check_available(&self) -> Result<(), ConversionError> {
        let ffprobe_ok = Command::new(&self.ffprobe_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !ffprobe_ok {
            return Err(ConversionError::ProbeFailed(
                "ffprobe not found or not working".to_string(),
            ));
        }

        let ffmpeg_ok = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !ffmpeg_ok {
            return Err(ConversionError::ConversionFailed(
                "ffmpeg not found or not working".to_string(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe(&self, path: &Path) -> Result<AudioMetadata, ConversionError> {
        let child = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.probe_timeout, child)
            .await
            .map_err(|_| ConversionError::Timeout("ffprobe", self.probe_timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::ProbeFailed(stderr.to_string()));
        }

        parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
    }

    async fn ffmpeg(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<FfmpegOutput, ConversionError> {
        debug!(args = ?args, "Running ffmpeg");
        let child = Command::new(&self.ffmpeg_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| ConversionError::Timeout("ffmpeg", timeout.as_secs()))??;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(ConversionError::ConversionFailed(stderr_tail(&stderr)));
        }

        Ok(FfmpegOutput {
            stdout: output.stdout,
            stderr,
        })
    }
}

/// Parse ffprobe's `-print_format json` output.
pub(crate) fn parse_ffprobe_json(json: &str) -> Result<AudioMetadata, ConversionError> {
    let probe: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| ConversionError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    // Find the audio stream
    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .ok_or_else(|| ConversionError::InvalidOutput("No audio stream found".to_string()))?;

    let duration_secs: f64 = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);
    let duration_ms = (duration_secs * 1000.0) as i64;

    // Prefer stream bitrate, fall back to format bitrate
    let bitrate = audio_stream
        .bit_rate
        .as_ref()
        .or(probe.format.bit_rate.as_ref())
        .and_then(|b| b.parse::<i64>().ok())
        .map(|b| (b / 1000) as i32);

    let sample_rate = audio_stream
        .sample_rate
        .as_ref()
        .and_then(|sr| sr.parse().ok());

    Ok(AudioMetadata {
        duration_ms,
        codec: audio_stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        bitrate,
        sample_rate,
        channels: audio_stream.channels,
        format: probe.format.format_name,
    })
}

/// Last few lines of ffmpeg's stderr, which is where the actual error lives.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(4);
    lines[start..].join(" | ")
}
