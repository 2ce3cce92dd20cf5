//! The per-song preview pipeline and the batch loop around it.
//!
//! A song moves through extract, claim, download, transcode, verify and
//! commit. Every stage reports failures as values; nothing escapes
//! [`PreviewPipeline::process_song`], so one bad song never stops a batch.

mod models;

pub use models::{
    BatchSelection, BatchSummary, DuplicateReport, GeneratedClip, PipelineError, PreviewStage,
    SkipReason, SongOutcome,
};

use crate::catalog_store::{CatalogStore, Song, SongQuery};
use crate::downloader::Downloader;
use crate::links::{ExtractedLink, LinkExtractor};
use crate::metrics;
use crate::transcoder::Transcoder;
use crate::verifier::ContentVerifier;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Directory under the media root holding the clips.
pub const PREVIEWS_DIR: &str = "previews";
/// Directory under [`PREVIEWS_DIR`] receiving replaced clips with `backup`.
pub const BACKUP_DIR: &str = "backup";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Run every stage but write nothing: no catalog, ledger or previews/ changes.
    pub dry_run: bool,
    /// Regenerate songs that already have a valid preview.
    pub force: bool,
    /// Move the replaced clip into `previews/backup/` after a commit.
    pub backup: bool,
    /// Pause between songs.
    pub throttle: Duration,
    pub stale_claim_secs: i64,
    /// Prefix of stored pointers, ending in `/`.
    pub url_prefix: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            backup: false,
            throttle: Duration::from_millis(crate::config::DEFAULT_THROTTLE_MS),
            stale_claim_secs: crate::config::DEFAULT_STALE_CLAIM_SECS,
            url_prefix: crate::config::DEFAULT_URL_PREFIX.to_string(),
        }
    }
}

type StageResult<T> = Result<T, (PreviewStage, PipelineError)>;

pub struct PreviewPipeline {
    store: Arc<dyn CatalogStore>,
    extractor: LinkExtractor,
    downloader: Downloader,
    transcoder: Transcoder,
    verifier: ContentVerifier,
    media_root: PathBuf,
    options: PipelineOptions,
    /// Claim token for every song touched by this run.
    run_token: String,
}

impl PreviewPipeline {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        extractor: LinkExtractor,
        downloader: Downloader,
        transcoder: Transcoder,
        verifier: ContentVerifier,
        media_root: PathBuf,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            extractor,
            downloader,
            transcoder,
            verifier,
            media_root,
            options,
            run_token: Uuid::new_v4().to_string(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn run_token(&self) -> &str {
        &self.run_token
    }

    /// Visit the selected songs one after another and tally the outcomes.
    ///
    /// Only a failure to load the song list is an error; per-song failures
    /// are counted in the summary.
    pub async fn run_batch(&self, selection: &BatchSelection) -> anyhow::Result<BatchSummary> {
        let songs = self.select_songs(selection)?;
        info!(
            songs = songs.len(),
            dry_run = self.options.dry_run,
            force = self.options.force,
            "Starting preview batch"
        );

        let mut summary = BatchSummary::default();
        if let (Some(id), true) = (selection.song_id, songs.is_empty()) {
            warn!(song_id = id, "Song not found");
            let missing = Song {
                id,
                name: String::new(),
                links: String::new(),
                preview_url: None,
                preview_degraded: false,
                preview_claim: None,
                preview_claimed_at: None,
            };
            summary.record(&missing, &SongOutcome::Skipped(SkipReason::NotFound));
        }

        for (index, song) in songs.iter().enumerate() {
            let started = Instant::now();
            let outcome = self.process_song(song).await;
            metrics::record_song(outcome.as_str(), started.elapsed());
            summary.record(song, &outcome);

            if index + 1 < songs.len() && !self.options.throttle.is_zero() {
                tokio::time::sleep(self.options.throttle).await;
            }
        }

        if let Err(e) = self.downloader.scratch().cleanup().await {
            warn!(error = %e, "Failed to remove scratch directory");
        }

        info!(
            processed = summary.processed,
            updated = summary.updated,
            degraded = summary.degraded,
            skipped = summary.skipped,
            failed = summary.failed,
            warnings = summary.warnings,
            "Preview batch finished"
        );
        Ok(summary)
    }

    fn select_songs(&self, selection: &BatchSelection) -> anyhow::Result<Vec<Song>> {
        if let Some(id) = selection.song_id {
            return Ok(self.store.get_song(id)?.into_iter().collect());
        }
        self.store.list_songs(&SongQuery {
            start_id: selection.start_id,
            limit: selection.limit,
            include_with_preview: self.options.force,
        })
    }

    /// Run one song through every stage.
    pub async fn process_song(&self, song: &Song) -> SongOutcome {
        let span = info_span!("song", song_id = song.id, name = %song.name);
        self.process_song_inner(song).instrument(span).await
    }

    async fn process_song_inner(&self, song: &Song) -> SongOutcome {
        if !self.options.force && self.has_valid_preview(song) {
            debug!("Song already has a valid preview");
            return SongOutcome::Skipped(SkipReason::HasValidPreview);
        }

        let Some(link) = self.extractor.extract(&song.links) else {
            warn!(stage = %PreviewStage::Extracting, "No usable URL in links");
            return SongOutcome::Failed {
                stage: PreviewStage::Extracting,
                error: PipelineError::Extraction,
            };
        };
        info!(url = %link.url, kind = link.kind.as_str(), "Extracted source link");

        if self.options.dry_run {
            return match self.generate(song, &link).await {
                Ok((clip, _)) => {
                    info!(would_write = %clip.preview_url, rung = %clip.rung, "Dry run produced clip");
                    SongOutcome::DryRun { clip }
                }
                Err((stage, error)) => self.failed(stage, error),
            };
        }

        match self
            .store
            .claim_preview(song.id, &self.run_token, self.options.stale_claim_secs)
        {
            Ok(true) => {}
            Ok(false) => {
                info!("Song is being regenerated by another run, skipping");
                return SongOutcome::Skipped(SkipReason::ClaimedElsewhere);
            }
            Err(e) => {
                return self.failed(PreviewStage::Claiming, PipelineError::persistence(e));
            }
        }

        match self.generate(song, &link).await {
            Ok((clip, previous_url)) => {
                info!(
                    preview_url = %clip.preview_url,
                    previous = ?previous_url,
                    rung = %clip.rung,
                    degraded = clip.degraded,
                    "Preview updated"
                );
                SongOutcome::Updated {
                    clip,
                    previous_url,
                }
            }
            Err((stage, error)) => {
                if let Err(e) = self.store.release_preview(song.id, &self.run_token) {
                    error!(error = %e, "Failed to release preview claim");
                }
                self.failed(stage, error)
            }
        }
    }

    fn failed(&self, stage: PreviewStage, error: PipelineError) -> SongOutcome {
        error!(stage = %stage, error = %error, "Preview generation failed");
        SongOutcome::Failed { stage, error }
    }

    /// Download, transcode, verify and (outside dry runs) commit.
    ///
    /// Returns the clip and the pointer it replaced.
    async fn generate(
        &self,
        song: &Song,
        link: &ExtractedLink,
    ) -> StageResult<(GeneratedClip, Option<String>)> {
        let source = self
            .downloader
            .download(link)
            .await
            .map_err(|e| (PreviewStage::Downloading, PipelineError::Download(e)))?;

        let filename = format!("{}.mp3", Uuid::new_v4());
        let output = if self.options.dry_run {
            self.downloader.scratch().allocate("mp3")
        } else {
            self.previews_dir().join(&filename)
        };

        let transcoded = self
            .transcoder
            .transcode(&source.path, &output, Some(&source.metadata), None)
            .await;
        self.downloader.scratch().discard(&source.path).await;
        let transcoded = transcoded.map_err(|e| (PreviewStage::Transcoding, PipelineError::Transcode(e)))?;

        let report = self
            .verifier
            .verify(&output, song.id, &song.name, &filename, self.options.dry_run)
            .await;

        let preview_url = format!("{}{}/{}", self.options.url_prefix, PREVIEWS_DIR, filename);
        let clip = GeneratedClip {
            preview_url,
            rung: transcoded.rung,
            degraded: transcoded.degraded,
            hash: report.hash,
            warnings: report.warnings,
        };

        if self.options.dry_run {
            self.downloader.scratch().discard(&output).await;
            return Ok((clip, song.preview_url.clone()));
        }

        let previous = match self.store.commit_preview(
            song.id,
            &self.run_token,
            &clip.preview_url,
            clip.degraded,
        ) {
            Ok(previous) => previous,
            Err(e) => {
                // The pointer was not moved; the new clip has no owner.
                if let Err(remove_err) = tokio::fs::remove_file(&output).await {
                    warn!(path = ?output, error = %remove_err, "Failed to remove uncommitted clip");
                }
                return Err((PreviewStage::Persisting, PipelineError::persistence(e)));
            }
        };

        if self.options.backup {
            if let Some(previous) = previous.as_deref() {
                self.backup_previous(previous).await;
            }
        }

        Ok((clip, previous))
    }

    fn previews_dir(&self) -> PathBuf {
        self.media_root.join(PREVIEWS_DIR)
    }

    /// A preview is valid when its pointer resolves to a file on disk.
    ///
    /// Pointers outside the URL prefix cannot be checked and are trusted.
    fn has_valid_preview(&self, song: &Song) -> bool {
        let Some(url) = song.preview_url.as_deref().filter(|_| song.has_preview()) else {
            return false;
        };
        match self.local_path(url) {
            Some(path) => path.is_file(),
            None => true,
        }
    }

    /// Map a stored pointer back to its file under the media root.
    pub fn local_path(&self, preview_url: &str) -> Option<PathBuf> {
        let relative = Path::new(preview_url.strip_prefix(&self.options.url_prefix)?);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.media_root.join(relative))
    }

    async fn backup_previous(&self, previous_url: &str) {
        let Some(path) = self.local_path(previous_url) else {
            warn!(previous = %previous_url, "Previous preview is outside the media root, not backed up");
            return;
        };
        let Some(name) = path.file_name() else {
            return;
        };
        let backup_dir = self.previews_dir().join(BACKUP_DIR);
        let target = backup_dir.join(name);

        let result = async {
            tokio::fs::create_dir_all(&backup_dir).await?;
            tokio::fs::rename(&path, &target).await
        }
        .await;
        match result {
            Ok(()) => info!(from = ?path, to = ?target, "Backed up previous preview"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?path, "Previous preview already gone, nothing to back up")
            }
            Err(e) => warn!(path = ?path, error = %e, "Failed to back up previous preview"),
        }
    }
}
