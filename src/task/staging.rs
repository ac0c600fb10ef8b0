//! Scoped staging files.

use std::path::{Path, PathBuf};
use tracing::warn;

/// A uniquely named local file that lives exactly as long as its guard.
///
/// The file itself is created by whoever writes to [`StagingFile::path`];
/// dropping the guard removes it if it exists.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    /// Reserve a fresh path under `dir`, creating the directory if needed.
    pub async fn create(dir: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("objmigrate-{}", uuid::Uuid::new_v4()));
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staging file"
            ),
        }
    }
}
