//! Database schema for the song catalog.
//!
//! Only the columns the preview pipeline reads or writes are modelled:
//! - identity and display name
//! - the free-text `links` field
//! - the preview pointer, its degraded flag and the in-flight claim

/// SQL schema for the catalog database.
pub const CATALOG_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS songs (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    links TEXT NOT NULL DEFAULT '',

    -- Relative URL of the current preview clip
    preview_url TEXT,
    -- Set when the clip is the reference copy rather than the song itself
    preview_degraded INTEGER NOT NULL DEFAULT 0,

    -- In-flight regeneration marker
    preview_claim TEXT,
    preview_claimed_at INTEGER,

    -- Timestamps (Unix seconds)
    preview_updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_songs_missing_preview
    ON songs(id) WHERE preview_url IS NULL;
"#;
