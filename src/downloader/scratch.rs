//! Per-invocation scratch directory for downloads and intermediate clips.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

/// A uniquely named directory under the scratch root.
///
/// Every invocation gets its own `run-<uuid>` directory so concurrent manual
/// runs never collide; every file inside gets a generated name too.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    run_dir: PathBuf,
}

impl ScratchDir {
    /// Create the run directory under `root`.
    pub async fn create(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let run_dir = root.as_ref().join(format!("run-{}", Uuid::new_v4()));
        fs::create_dir_all(&run_dir).await?;
        Ok(Self { run_dir })
    }

    pub fn path(&self) -> &Path {
        &self.run_dir
    }

    /// Reserve a fresh file path with the given extension.
    ///
    /// Nothing is created on disk.
    pub fn allocate(&self, extension: &str) -> PathBuf {
        let extension = extension.trim_start_matches('.');
        self.run_dir
            .join(format!("{}.{}", Uuid::new_v4(), sanitize_extension(extension)))
    }

    /// Remove a scratch file, ignoring files that are already gone.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove scratch file");
            }
        }
    }

    /// Remove the run directory and everything in it.
    pub async fn cleanup(&self) -> std::io::Result<()> {
        if fs::try_exists(&self.run_dir).await? {
            fs::remove_dir_all(&self.run_dir).await?;
        }
        Ok(())
    }
}

/// Keep only short alphanumeric extensions; anything else becomes `bin`.
fn sanitize_extension(ext: &str) -> String {
    let ext = ext.to_ascii_lowercase();
    if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext
    } else {
        "bin".to_string()
    }
}
