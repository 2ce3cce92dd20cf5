//! Catalog Previews Library
//!
//! Regenerates standardized preview clips for catalog songs: link extraction,
//! multi-strategy downloads, ffmpeg transcoding, content-hash verification and
//! transactional catalog updates.

pub mod catalog_store;
pub mod cli_style;
pub mod config;
pub mod downloader;
pub mod links;
pub mod media;
pub mod metrics;
pub mod pipeline;
pub mod transcoder;
pub mod verifier;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, Song, SqliteCatalogStore};
pub use config::AppConfig;
pub use links::{ExtractedLink, HostKind, LinkExtractor};
pub use media::{FfmpegTool, MediaTool};
pub use pipeline::{BatchSelection, BatchSummary, PreviewPipeline, SongOutcome};
