//! Preview clip transcoding with a degradation ladder.
//!
//! Each rung is tried in order until one produces a clip that passes
//! validation. The last rung copies a pre-rendered fallback clip and marks the
//! result as degraded.

mod standard;

pub use standard::{rung_args, LadderRung, PreviewStandard};

use crate::media::{mean_volume_db, AudioMetadata, ConversionError, MediaTool};
use crate::metrics;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a single rung was abandoned.
#[derive(Debug, Clone)]
pub struct RungFailure {
    pub rung: LadderRung,
    pub reason: String,
}

impl fmt::Display for RungFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rung, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("every transcode rung failed: {}", join_failures(.0))]
    Exhausted(Vec<RungFailure>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_failures(failures: &[RungFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A validated clip on disk.
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub rung: LadderRung,
    pub metadata: AudioMetadata,
    /// The clip is the reference copy, not derived from the song.
    pub degraded: bool,
    pub start_offset: f64,
    /// Rungs that failed before this one succeeded.
    pub failed_rungs: Vec<RungFailure>,
}

pub struct Transcoder {
    tool: Arc<dyn MediaTool>,
    standard: PreviewStandard,
    fallback_clip: Option<PathBuf>,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(
        tool: Arc<dyn MediaTool>,
        standard: PreviewStandard,
        fallback_clip: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            tool,
            standard,
            fallback_clip,
            timeout,
        }
    }

    pub fn standard(&self) -> &PreviewStandard {
        &self.standard
    }

    /// Produce a preview clip at `output` from `source`.
    ///
    /// `start_offset` overrides the offset heuristic; either way it is clamped
    /// so the clip fits inside the source.
    pub async fn transcode(
        &self,
        source: &Path,
        output: &Path,
        source_meta: Option<&AudioMetadata>,
        start_offset: Option<f64>,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let source_duration = source_meta
            .map(AudioMetadata::duration_secs)
            .filter(|d| *d > 0.0);
        let offset = match start_offset {
            Some(offset) => self.standard.clamp_offset(offset, source_duration),
            None => self.standard.start_offset(source_duration),
        };
        let expected = self.standard.expected_duration(source_duration, offset);
        debug!(
            source = ?source,
            offset,
            expected_duration = expected,
            "Transcoding preview clip"
        );

        let mut failures = Vec::new();
        for rung in LadderRung::ALL {
            if rung == LadderRung::ReferenceCopy && self.fallback_clip.is_none() {
                break;
            }

            match self.attempt(rung, source, output, offset, expected).await {
                Ok(metadata) => {
                    metrics::record_transcode_rung(rung.as_str(), "success");
                    if rung == LadderRung::Full {
                        debug!(rung = %rung, "Clip passed validation");
                    } else {
                        info!(rung = %rung, failed = failures.len(), "Clip produced on degraded rung");
                    }
                    return Ok(TranscodeOutcome {
                        rung,
                        metadata,
                        degraded: rung == LadderRung::ReferenceCopy,
                        start_offset: offset,
                        failed_rungs: failures,
                    });
                }
                Err(reason) => {
                    metrics::record_transcode_rung(rung.as_str(), "failure");
                    warn!(rung = %rung, reason = %reason, "Transcode rung failed");
                    remove_output(output).await;
                    failures.push(RungFailure { rung, reason });
                }
            }
        }

        Err(TranscodeError::Exhausted(failures))
    }

    async fn attempt(
        &self,
        rung: LadderRung,
        source: &Path,
        output: &Path,
        offset: f64,
        expected: f64,
    ) -> Result<AudioMetadata, String> {
        match rung_args(&self.standard, rung, source, output, offset, expected) {
            Some(args) => {
                self.tool
                    .ffmpeg(&args, self.timeout)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            None => {
                let fallback = self
                    .fallback_clip
                    .as_deref()
                    .ok_or_else(|| "no fallback clip configured".to_string())?;
                tokio::fs::copy(fallback, output)
                    .await
                    .map_err(|e| format!("copying fallback clip {:?}: {}", fallback, e))?;
            }
        }
        self.validate(rung, output, expected).await
    }

    /// Check an encoded clip against the standard for its rung.
    async fn validate(
        &self,
        rung: LadderRung,
        output: &Path,
        expected: f64,
    ) -> Result<AudioMetadata, String> {
        let size = tokio::fs::metadata(output)
            .await
            .map_err(|e| format!("output missing: {}", e))?
            .len();
        if size < self.standard.min_clip_bytes {
            return Err(format!(
                "output too small ({} bytes, minimum {})",
                size, self.standard.min_clip_bytes
            ));
        }

        let metadata = self
            .tool
            .probe(output)
            .await
            .map_err(|e| format!("output not probeable: {}", e))?;

        if rung == LadderRung::ReferenceCopy {
            return Ok(metadata);
        }

        if rung.enforces_format() {
            if metadata.sample_rate != Some(self.standard.sample_rate as i32) {
                return Err(format!(
                    "sample rate {:?}, expected {}",
                    metadata.sample_rate, self.standard.sample_rate
                ));
            }
            let bitrate = metadata.bitrate.unwrap_or(0);
            if bitrate < self.standard.min_bitrate_kbps as i32 {
                return Err(format!(
                    "bitrate {} kbps below {} kbps",
                    bitrate, self.standard.min_bitrate_kbps
                ));
            }
            let drift = (metadata.duration_secs() - expected).abs();
            if drift > self.standard.duration_tolerance_secs {
                return Err(format!(
                    "duration {:.2}s, expected {:.2}s",
                    metadata.duration_secs(),
                    expected
                ));
            }
        }

        let volume = mean_volume_db(self.tool.as_ref(), output, self.timeout)
            .await
            .map_err(|e: ConversionError| format!("volume analysis failed: {}", e))?;
        if volume < self.standard.silence_threshold_db {
            return Err(format!("clip is silent (mean volume {:.1} dB)", volume));
        }

        Ok(metadata)
    }
}

async fn remove_output(output: &Path) {
    if let Err(e) = tokio::fs::remove_file(output).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = ?output, error = %e, "Failed to remove rejected clip");
        }
    }
}
