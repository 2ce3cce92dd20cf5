//! Test fixtures: an isolated media root, catalog database and fake host.

use super::constants::*;
use super::fake_host::FakeHost;
use super::fake_media::{fake_audio, FakeMediaTool, FAKE_CLIP_BYTES};
use catalog_previews::catalog_store::{CatalogStore, Song, SqliteCatalogStore};
use catalog_previews::downloader::{DownloadSettings, Downloader, FetchContext, ScratchDir};
use catalog_previews::links::{HostKind, HostRule, HostTable, LinkExtractor};
use catalog_previews::pipeline::{PipelineOptions, PreviewPipeline};
use catalog_previews::transcoder::{PreviewStandard, Transcoder};
use catalog_previews::verifier::{ContentVerifier, JsonFileLedger};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// One isolated environment per test.
///
/// Holds the temp directory, so everything is cleaned up on drop.
pub struct TestEnv {
    pub media_root: PathBuf,
    pub ledger_path: PathBuf,
    pub fallback_clip: PathBuf,
    pub store: Arc<SqliteCatalogStore>,
    pub tool: Arc<FakeMediaTool>,
    pub host: FakeHost,
    temp_dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_tool(FakeMediaTool::new()).await
    }

    pub async fn with_tool(tool: FakeMediaTool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let media_root = temp_dir.path().join("media");
        std::fs::create_dir_all(&media_root).expect("Failed to create media root");

        let db_path = temp_dir.path().join("catalog.db");
        let store = Arc::new(SqliteCatalogStore::open(&db_path).expect("Failed to open catalog"));

        let fallback_clip = temp_dir.path().join("reference.mp3");
        std::fs::write(
            &fallback_clip,
            fake_audio(19.0, 48_000, 128, FALLBACK_TAG, FAKE_CLIP_BYTES),
        )
        .expect("Failed to write fallback clip");

        Self {
            ledger_path: media_root.join("previews").join("content_hashes.json"),
            media_root,
            fallback_clip,
            store,
            tool: Arc::new(tool),
            host: FakeHost::spawn().await,
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Host table treating the fake host as a streaming CDN whose song pages
    /// `/song/{id}` download from `/song/{id}/download`.
    pub fn host_table(&self) -> HostTable {
        let mut table = HostTable::empty();
        table.push(
            HostRule::new(HostKind::StreamingCdn, &["127.0.0.1"])
                .with_id_pattern(r"/song/([A-Za-z0-9_-]+)")
                .expect("valid id pattern")
                .with_templates(&["{origin}/song/{id}/download"]),
        );
        table
    }

    /// Options for tests: no throttling, stored pointers under "/media/".
    pub fn options() -> PipelineOptions {
        PipelineOptions {
            throttle: Duration::ZERO,
            url_prefix: URL_PREFIX.to_string(),
            ..PipelineOptions::default()
        }
    }

    pub fn download_settings() -> DownloadSettings {
        DownloadSettings {
            request_timeout: Duration::from_secs(5),
            ..DownloadSettings::default()
        }
    }

    pub async fn downloader(&self) -> Downloader {
        let scratch = ScratchDir::create(self.temp_path().join("scratch"))
            .await
            .expect("Failed to create scratch dir");
        let ctx = FetchContext::new(self.tool.clone(), scratch, Self::download_settings())
            .expect("Failed to create fetch context");
        Downloader::new(ctx)
    }

    /// Pipeline with the fallback clip configured.
    pub async fn pipeline(&self, options: PipelineOptions) -> PreviewPipeline {
        self.build_pipeline(options, Some(self.fallback_clip.clone()))
            .await
    }

    pub async fn pipeline_without_fallback(&self, options: PipelineOptions) -> PreviewPipeline {
        self.build_pipeline(options, None).await
    }

    async fn build_pipeline(
        &self,
        options: PipelineOptions,
        fallback_clip: Option<PathBuf>,
    ) -> PreviewPipeline {
        let transcoder = Transcoder::new(
            self.tool.clone(),
            PreviewStandard::default(),
            fallback_clip,
            Duration::from_secs(10),
        );
        let ledger = Arc::new(JsonFileLedger::new(&self.ledger_path));
        let verifier = ContentVerifier::new(self.tool.clone(), ledger, Duration::from_secs(10));

        PreviewPipeline::new(
            self.store.clone(),
            LinkExtractor::new(self.host_table()),
            self.downloader().await,
            transcoder,
            verifier,
            self.media_root.clone(),
            options,
        )
    }

    pub fn insert_song(&self, name: &str, links: &str) -> i64 {
        self.store
            .insert_song(name, links)
            .expect("Failed to insert song")
    }

    pub fn song(&self, id: i64) -> Song {
        self.store
            .get_song(id)
            .expect("Failed to read song")
            .expect("Song not found")
    }

    /// Give a song an existing preview pointer and write its file.
    pub fn set_existing_preview(&self, id: i64, filename: &str) -> PathBuf {
        let path = self.previews_dir().join(filename);
        std::fs::create_dir_all(self.previews_dir()).expect("Failed to create previews dir");
        std::fs::write(
            &path,
            fake_audio(19.0, 48_000, 128, "old-clip", FAKE_CLIP_BYTES),
        )
        .expect("Failed to write existing preview");
        assert!(self
            .store
            .claim_preview(id, "fixture", 3600)
            .expect("Failed to claim"));
        self.store
            .commit_preview(id, "fixture", &format!("{}previews/{}", URL_PREFIX, filename), false)
            .expect("Failed to commit");
        path
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.media_root.join("previews")
    }

    /// MP3 files directly under previews/.
    pub fn preview_files(&self) -> Vec<PathBuf> {
        list_mp3s(&self.previews_dir())
    }

    /// Map a stored pointer to its file.
    pub fn clip_path(&self, preview_url: &str) -> PathBuf {
        let relative = preview_url
            .strip_prefix(URL_PREFIX)
            .expect("pointer outside the media prefix");
        self.media_root.join(relative)
    }
}

pub fn list_mp3s(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|e| e == "mp3").unwrap_or(false))
        .collect();
    files.sort();
    files
}
