//! SQLite implementation of the catalog store.

use super::models::{Song, SongQuery};
use super::schema::CATALOG_SCHEMA_SQL;
use super::trait_def::CatalogStore;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const SONG_COLUMNS: &str =
    "id, name, links, preview_url, preview_degraded, preview_claim, preview_claimed_at";

/// SQLite implementation of CatalogStore.
#[derive(Clone)]
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    /// Open or create a catalog database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog database: {:?}", path))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(CATALOG_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CATALOG_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_song(row: &rusqlite::Row) -> rusqlite::Result<Song> {
        Ok(Song {
            id: row.get("id")?,
            name: row.get("name")?,
            links: row.get("links")?,
            preview_url: row.get("preview_url")?,
            preview_degraded: row.get::<_, i64>("preview_degraded")? != 0,
            preview_claim: row.get("preview_claim")?,
            preview_claimed_at: row.get("preview_claimed_at")?,
        })
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn get_song(&self, id: i64) -> Result<Option<Song>> {
        let conn = self.conn.lock().unwrap();
        let song = conn
            .query_row(
                &format!("SELECT {} FROM songs WHERE id = ?1", SONG_COLUMNS),
                params![id],
                Self::row_to_song,
            )
            .optional()?;
        Ok(song)
    }

    fn list_songs(&self, query: &SongQuery) -> Result<Vec<Song>> {
        let conn = self.conn.lock().unwrap();
        let filter = if query.include_with_preview {
            ""
        } else {
            "AND (preview_url IS NULL OR trim(preview_url) = '')"
        };
        // SQLite treats a negative LIMIT as "no limit".
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM songs WHERE id >= ?1 {} ORDER BY id LIMIT ?2",
            SONG_COLUMNS, filter
        ))?;
        let songs = stmt
            .query_map(
                params![query.start_id.unwrap_or(i64::MIN), limit],
                Self::row_to_song,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(songs)
    }

    fn insert_song(&self, name: &str, links: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO songs (name, links) VALUES (?1, ?2)",
            params![name, links],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn claim_preview(&self, song_id: i64, token: &str, stale_after_secs: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        let updated = conn.execute(
            "UPDATE songs SET preview_claim = ?1, preview_claimed_at = ?2
             WHERE id = ?3
               AND (preview_claim IS NULL OR preview_claimed_at IS NULL OR preview_claimed_at < ?4)",
            params![token, now, song_id, now - stale_after_secs],
        )?;
        debug!(song_id, claimed = updated == 1, "Preview claim attempt");
        Ok(updated == 1)
    }

    fn commit_preview(
        &self,
        song_id: i64,
        token: &str,
        preview_url: &str,
        degraded: bool,
    ) -> Result<Option<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(Option<String>, Option<String>)> = tx
            .query_row(
                "SELECT preview_claim, preview_url FROM songs WHERE id = ?1",
                params![song_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((claim, previous)) = current else {
            bail!("Song {} not found", song_id);
        };
        if claim.as_deref() != Some(token) {
            bail!("Song {} is no longer claimed by this run", song_id);
        }

        tx.execute(
            "UPDATE songs SET preview_url = ?1, preview_degraded = ?2,
                 preview_claim = NULL, preview_claimed_at = NULL, preview_updated_at = ?3
             WHERE id = ?4",
            params![preview_url, degraded as i64, Utc::now().timestamp(), song_id],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    fn release_preview(&self, song_id: i64, token: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE songs SET preview_claim = NULL, preview_claimed_at = NULL
             WHERE id = ?1 AND preview_claim = ?2",
            params![song_id, token],
        )?;
        Ok(())
    }
}
