//! Loudness measurement and raw segment decoding.

use super::ffmpeg::{ConversionError, MediaTool};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::time::Duration;

/// Raw segments are always decoded to this layout so hashes are comparable.
pub const SEGMENT_SAMPLE_RATE: u32 = 48_000;
pub const SEGMENT_CHANNELS: u32 = 2;

lazy_static! {
    static ref MEAN_VOLUME: Regex =
        Regex::new(r"mean_volume:\s*(-?(?:\d+(?:\.\d+)?|inf))\s*dB").expect("valid volume pattern");
}

/// Extract `mean_volume` from ffmpeg's volumedetect report.
///
/// Digital silence is reported as `-inf dB`, mapped to `f64::NEG_INFINITY`.
pub fn parse_mean_volume(stderr: &str) -> Option<f64> {
    let captures = MEAN_VOLUME.captures(stderr)?;
    let value = captures.get(1)?.as_str();
    match value {
        "-inf" => Some(f64::NEG_INFINITY),
        "inf" => Some(f64::INFINITY),
        other => other.parse().ok(),
    }
}

/// Measure the mean volume of a file in dBFS.
pub async fn mean_volume_db(
    tool: &dyn MediaTool,
    path: &Path,
    timeout: Duration,
) -> Result<f64, ConversionError> {
    let args = vec![
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        path.to_string_lossy().to_string(),
        "-af".to_string(),
        "volumedetect".to_string(),
        "-vn".to_string(),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ];
    let output = tool.ffmpeg(&args, timeout).await?;
    parse_mean_volume(&output.stderr).ok_or_else(|| {
        ConversionError::InvalidOutput("volumedetect reported no mean_volume".to_string())
    })
}

/// Decode `[start, start + duration)` seconds of a file to raw s16le PCM.
pub async fn decode_segment(
    tool: &dyn MediaTool,
    path: &Path,
    start_secs: f64,
    duration_secs: f64,
    timeout: Duration,
) -> Result<Vec<u8>, ConversionError> {
    let args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", start_secs),
        "-t".to_string(),
        format!("{:.3}", duration_secs),
        "-i".to_string(),
        path.to_string_lossy().to_string(),
        "-vn".to_string(),
        "-ac".to_string(),
        SEGMENT_CHANNELS.to_string(),
        "-ar".to_string(),
        SEGMENT_SAMPLE_RATE.to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-".to_string(),
    ];
    let output = tool.ffmpeg(&args, timeout).await?;
    Ok(output.stdout)
}
