//! Per-song outcomes and batch summaries.

use crate::catalog_store::Song;
use crate::downloader::DownloadFailure;
use crate::transcoder::{LadderRung, TranscodeError};
use crate::verifier::VerificationWarning;
use std::fmt;
use thiserror::Error;

/// Where a song was when its run failed.
///
/// Verification only ever adds warnings, so it never ends a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewStage {
    Extracting,
    Claiming,
    Downloading,
    Transcoding,
    Persisting,
}

impl PreviewStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewStage::Extracting => "extracting",
            PreviewStage::Claiming => "claiming",
            PreviewStage::Downloading => "downloading",
            PreviewStage::Transcoding => "transcoding",
            PreviewStage::Persisting => "persisting",
        }
    }
}

impl fmt::Display for PreviewStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one song.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable URL in links")]
    Extraction,

    #[error(transparent)]
    Download(#[from] DownloadFailure),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl PipelineError {
    pub(crate) fn persistence(err: anyhow::Error) -> Self {
        PipelineError::Persistence(format!("{:#}", err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The song already points at an existing clip.
    HasValidPreview,
    /// Another run holds the song's claim.
    ClaimedElsewhere,
    NotFound,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::HasValidPreview => "has valid preview",
            SkipReason::ClaimedElsewhere => "claimed by another run",
            SkipReason::NotFound => "song not found",
        }
    }
}

/// A clip that made it through every stage.
#[derive(Debug, Clone)]
pub struct GeneratedClip {
    pub preview_url: String,
    pub rung: LadderRung,
    pub degraded: bool,
    pub hash: Option<String>,
    pub warnings: Vec<VerificationWarning>,
}

#[derive(Debug)]
pub enum SongOutcome {
    /// The pointer was moved to a new clip.
    Updated {
        clip: GeneratedClip,
        previous_url: Option<String>,
    },
    /// Dry run: everything ran, nothing was written.
    DryRun { clip: GeneratedClip },
    Skipped(SkipReason),
    Failed {
        stage: PreviewStage,
        error: PipelineError,
    },
}

impl SongOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SongOutcome::Updated { .. } => "updated",
            SongOutcome::DryRun { .. } => "dry_run",
            SongOutcome::Skipped(_) => "skipped",
            SongOutcome::Failed { .. } => "failed",
        }
    }

    pub fn clip(&self) -> Option<&GeneratedClip> {
        match self {
            SongOutcome::Updated { clip, .. } | SongOutcome::DryRun { clip } => Some(clip),
            _ => None,
        }
    }
}

/// Which songs a batch visits.
#[derive(Debug, Clone, Default)]
pub struct BatchSelection {
    /// Single-song mode; overrides the range options.
    pub song_id: Option<i64>,
    pub start_id: Option<i64>,
    pub limit: Option<usize>,
}

/// A clip whose content hash belongs to another song.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateReport {
    pub song_id: i64,
    pub song_name: String,
    pub other_song_id: i64,
    pub other_song_name: String,
}

/// Counters for a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub updated: usize,
    pub dry_run: usize,
    pub degraded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
    pub duplicates: Vec<DuplicateReport>,
    /// `(song id, stage, message)` for every failed song.
    pub failures: Vec<(i64, PreviewStage, String)>,
}

impl BatchSummary {
    pub fn record(&mut self, song: &Song, outcome: &SongOutcome) {
        self.processed += 1;
        match outcome {
            SongOutcome::Updated { .. } => self.updated += 1,
            SongOutcome::DryRun { .. } => self.dry_run += 1,
            SongOutcome::Skipped(_) => self.skipped += 1,
            SongOutcome::Failed { stage, error } => {
                self.failed += 1;
                self.failures.push((song.id, *stage, error.to_string()));
            }
        }

        let Some(clip) = outcome.clip() else {
            return;
        };
        if clip.degraded {
            self.degraded += 1;
        }
        self.warnings += clip.warnings.len();
        for warning in &clip.warnings {
            if let VerificationWarning::DuplicateContent {
                other_song_id,
                other_song_name,
                ..
            } = warning
            {
                self.duplicates.push(DuplicateReport {
                    song_id: song.id,
                    song_name: song.name.clone(),
                    other_song_id: *other_song_id,
                    other_song_name: other_song_name.clone(),
                });
            }
        }
    }
}
