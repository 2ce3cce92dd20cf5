//! Content verification of produced clips.
//!
//! A fixed leading segment of every clip is decoded to raw PCM and hashed.
//! The hash is checked against the ledger to catch two songs whose sources
//! resolved to the same audio (usually a host serving a placeholder).

pub mod ledger;

pub use ledger::{JsonFileLedger, LedgerEntry, LedgerError, LedgerInsert, LedgerStore};

use crate::media::{decode_segment, MediaTool};
use crate::metrics;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Seconds of audio, from the start of the clip, that get hashed.
pub const SEGMENT_SECS: f64 = 5.0;

/// Non-fatal findings about a clip.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationWarning {
    /// The clip's hash was first recorded for another song.
    DuplicateContent {
        hash: String,
        other_song_id: i64,
        other_song_name: String,
        other_filename: String,
    },
    /// The decoded segment was empty, so nothing could be hashed.
    EmptySegment,
    /// Decoding or the ledger failed; the clip is kept unverified.
    Unverified(String),
}

impl fmt::Display for VerificationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationWarning::DuplicateContent {
                other_song_id,
                other_song_name,
                other_filename,
                ..
            } => write!(
                f,
                "duplicate content of song {} ({}) in {}",
                other_song_id, other_song_name, other_filename
            ),
            VerificationWarning::EmptySegment => f.write_str("decoded segment is empty"),
            VerificationWarning::Unverified(reason) => write!(f, "not verified: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    /// Hex SHA-256 of the decoded segment, when one could be computed.
    pub hash: Option<String>,
    pub warnings: Vec<VerificationWarning>,
    /// Whether the hash was newly written to the ledger.
    pub recorded: bool,
}

impl VerificationReport {
    pub fn is_duplicate(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, VerificationWarning::DuplicateContent { .. }))
    }
}

/// Hex SHA-256 of a byte buffer.
pub fn content_hash(samples: &[u8]) -> String {
    let digest = Sha256::digest(samples);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct ContentVerifier {
    tool: Arc<dyn MediaTool>,
    ledger: Arc<dyn LedgerStore>,
    timeout: Duration,
}

impl ContentVerifier {
    pub fn new(tool: Arc<dyn MediaTool>, ledger: Arc<dyn LedgerStore>, timeout: Duration) -> Self {
        Self {
            tool,
            ledger,
            timeout,
        }
    }

    /// Hash the clip's leading segment.
    pub async fn segment_hash(&self, clip: &Path) -> Result<Option<String>, String> {
        let samples = decode_segment(self.tool.as_ref(), clip, 0.0, SEGMENT_SECS, self.timeout)
            .await
            .map_err(|e| e.to_string())?;
        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(content_hash(&samples)))
    }

    /// Hash a clip and check it against the ledger.
    ///
    /// With `dry_run` the ledger is only consulted, never written. Problems
    /// are reported as warnings; verification never fails a song.
    pub async fn verify(
        &self,
        clip: &Path,
        song_id: i64,
        song_name: &str,
        filename: &str,
        dry_run: bool,
    ) -> VerificationReport {
        let mut report = VerificationReport::default();

        let hash = match self.segment_hash(clip).await {
            Ok(Some(hash)) => hash,
            Ok(None) => {
                warn!(song_id, clip = ?clip, "Decoded segment is empty, skipping hash check");
                report.warnings.push(VerificationWarning::EmptySegment);
                return report;
            }
            Err(reason) => {
                warn!(song_id, error = %reason, "Could not decode clip segment");
                report.warnings.push(VerificationWarning::Unverified(reason));
                return report;
            }
        };
        report.hash = Some(hash.clone());

        let entry = LedgerEntry::new(song_id, song_name, filename);
        let outcome = if dry_run {
            self.ledger
                .lookup(&hash)
                .await
                .map(|existing| ledger::classify_insert(existing.as_ref(), &entry))
        } else {
            self.ledger.record(&hash, entry).await
        };

        match outcome {
            Ok(LedgerInsert::Inserted) => {
                report.recorded = !dry_run;
                debug!(song_id, hash = %hash, "Content hash is new");
            }
            Ok(LedgerInsert::AlreadyOwned) => {
                debug!(song_id, hash = %hash, "Content hash already recorded for this song");
            }
            Ok(LedgerInsert::Collision(existing)) => {
                metrics::record_duplicate_warning();
                warn!(
                    song_id,
                    hash = %hash,
                    other_song_id = existing.song_id,
                    other_song_name = %existing.song_name,
                    "Clip duplicates another song's content"
                );
                report.warnings.push(VerificationWarning::DuplicateContent {
                    hash,
                    other_song_id: existing.song_id,
                    other_song_name: existing.song_name,
                    other_filename: existing.filename,
                });
            }
            Err(e) => {
                warn!(song_id, error = %e, "Content hash ledger unavailable");
                report
                    .warnings
                    .push(VerificationWarning::Unverified(e.to_string()));
            }
        }
        report
    }
}
