//! Scoped ownership of a downloaded source file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use vstream_media::{remove_file_if_exists, MediaResult};

/// A downloaded source video that must not outlive its job.
///
/// The pipeline removes it explicitly before recording the outcome; dropping
/// the guard removes it on any path that skipped that step.
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    removed: bool,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Delete the file. Calling this again, or on a missing file, is a no-op.
    pub async fn remove(&mut self) -> MediaResult<()> {
        if self.removed {
            return Ok(());
        }
        let existed = remove_file_if_exists(&self.path).await?;
        self.removed = true;
        debug!(source = %self.path.display(), existed, "Source removed");
        Ok(())
    }
}

impl Drop for SourceFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(source = %self.path.display(), "Source removed on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(source = %self.path.display(), "Failed to remove source: {}", e),
        }
    }
}
