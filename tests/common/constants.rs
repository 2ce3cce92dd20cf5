//! Shared constants for end-to-end tests

// ============================================================================
// Fake Host
// ============================================================================

/// Maximum time to wait for the fake host to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Item id the fake host answers 404 for
pub const MISSING_ITEM_ID: &str = "missing";

/// File name (without extension) served as a 17-byte body
pub const TINY_FILE: &str = "tiny";

/// File name served as an HTML login page with an HTML content type
pub const HTML_FILE: &str = "login";

/// File name served as HTML labelled `audio/mpeg`
pub const DISGUISED_FILE: &str = "disguised";

/// Cookie set by the gated download page
pub const SESSION_COOKIE: &str = "session";

/// Item id whose audio is shared by several songs
pub const PLACEHOLDER_ITEM_ID: &str = "placeholder";

// ============================================================================
// Pipeline
// ============================================================================

pub const URL_PREFIX: &str = "/media/";

/// Tag of the pre-rendered fallback clip
pub const FALLBACK_TAG: &str = "reference";
