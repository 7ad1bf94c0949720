//! Filesystem helpers for source files and scratch directories.

use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

use crate::error::MediaResult;

/// Extensions the downloader may produce for a finished, merged video.
pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mkv", "webm", "mov"];

/// Whether `path` names a finished video file (not a partial download).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Remove a file, treating "already gone" as success.
///
/// Returns `true` if this call removed the file.
pub async fn remove_file_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove a directory tree, treating "already gone" as success.
pub async fn remove_dir_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    match fs::remove_dir_all(path.as_ref()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Move `src` to `dest` unless `dest` already exists.
///
/// Falls back to copy-then-remove when a rename is not possible (different
/// filesystems). Returns `false`, leaving `src` in place, when `dest` exists.
pub async fn move_file_no_clobber(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> MediaResult<bool> {
    let (src, dest) = (src.as_ref(), dest.as_ref());
    if fs::try_exists(dest).await? {
        return Ok(false);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    if fs::rename(src, dest).await.is_err() {
        if let Err(e) = fs::copy(src, dest).await {
            remove_file_if_exists(dest).await?;
            return Err(e.into());
        }
        fs::remove_file(src).await?;
    }
    Ok(true)
}
