//! Catalog models used by the preview pipeline.

use serde::{Deserialize, Serialize};

/// A catalog song, as far as previews are concerned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: i64,
    pub name: String,
    /// Free text with zero or more URLs embedded in prose.
    pub links: String,
    /// Relative URL of the current preview clip.
    pub preview_url: Option<String>,
    /// The current clip is the reference copy and needs manual regeneration.
    pub preview_degraded: bool,
    /// Token of the run currently regenerating this song's preview.
    pub preview_claim: Option<String>,
    pub preview_claimed_at: Option<i64>,
}

impl Song {
    pub fn has_preview(&self) -> bool {
        self.preview_url
            .as_deref()
            .map(|u| !u.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Which songs a batch run should visit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SongQuery {
    /// Lowest song id to include.
    pub start_id: Option<i64>,
    pub limit: Option<usize>,
    /// Also return songs that already have a preview (forced regeneration).
    pub include_with_preview: bool,
}
