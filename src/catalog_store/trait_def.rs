//! CatalogStore trait definition.

use super::models::{Song, SongQuery};
use anyhow::Result;

/// Trait for catalog storage backends.
///
/// Preview regeneration is guarded by a per-song claim: a run claims the song,
/// does its work, then either commits the new pointer (which clears the claim)
/// or releases the claim. A second run finds the song claimed and skips it.
pub trait CatalogStore: Send + Sync {
    /// Get a song by ID.
    fn get_song(&self, id: i64) -> Result<Option<Song>>;

    /// Songs to visit in a batch, ordered by id.
    fn list_songs(&self, query: &SongQuery) -> Result<Vec<Song>>;

    /// Insert a song, returning its id.
    fn insert_song(&self, name: &str, links: &str) -> Result<i64>;

    /// Take the in-flight claim on a song.
    ///
    /// Succeeds when the song is unclaimed or its claim is older than
    /// `stale_after_secs`. Returns `false` when another run holds it.
    fn claim_preview(&self, song_id: i64, token: &str, stale_after_secs: i64) -> Result<bool>;

    /// Write a new preview pointer under our claim, returning the previous one.
    ///
    /// Runs in a single immediate transaction; on any error the previous
    /// pointer is left untouched.
    fn commit_preview(
        &self,
        song_id: i64,
        token: &str,
        preview_url: &str,
        degraded: bool,
    ) -> Result<Option<String>>;

    /// Drop our claim without touching the pointer.
    fn release_preview(&self, song_id: i64, token: &str) -> Result<()>;
}
