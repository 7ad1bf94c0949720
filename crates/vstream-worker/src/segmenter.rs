//! Frame-sequential clip extraction.
//!
//! Frames are decoded once, in order. For the current clip `[start, end)`:
//! frames before `start` are discarded, `start` opens a segment, every frame
//! up to `end - 1` is fed, and `end - 1` closes the segment and persists it.
//! Decoding stops as soon as the last clip is written.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use vstream_media::{MediaError, SourceSession};
use vstream_models::ClipRange;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error(transparent)]
    Engine(#[from] MediaError),

    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("expected {expected} segment(s), produced {produced}")]
    CountMismatch { expected: usize, produced: usize },
}

/// Writes finished segments as `{job_id}_{start:07}_{end:07}.{ext}`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    job_id: String,
    extension: String,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, job_id: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            job_id: job_id.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, clip: &ClipRange) -> PathBuf {
        self.dir
            .join(clip.artifact_file_name(&self.job_id, &self.extension))
    }

    pub async fn write(&self, clip: &ClipRange, bytes: &[u8]) -> Result<PathBuf, SegmentError> {
        let path = self.artifact_path(clip);
        let persist_err = |source| SegmentError::Persist {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(persist_err)?;
        tokio::fs::write(&path, bytes).await.map_err(persist_err)?;
        Ok(path)
    }
}

/// Extract `clips` (sorted, disjoint) from an open source session.
///
/// Returns the artifact paths in clip order. Artifacts written before an
/// error stay on disk.
pub async fn extract_segments(
    session: &mut SourceSession<'_>,
    clips: &[ClipRange],
    writer: &ArtifactWriter,
) -> Result<Vec<PathBuf>, SegmentError> {
    let mut written = Vec::with_capacity(clips.len());
    let mut current = 0;

    while let Some(clip) = clips.get(current) {
        let Some(frame) = session.next_frame().await? else {
            break;
        };

        if frame.index < clip.start {
            continue;
        }
        if frame.index == clip.start {
            session.begin_segment().await?;
        }
        if !session.is_armed() {
            continue;
        }

        session.encode(&frame).await?;

        if frame.index == clip.last_frame() {
            let bytes = session.finish_segment().await?;
            let path = writer.write(clip, &bytes).await?;
            debug!(clip = %clip, artifact = %path.display(), bytes = bytes.len(), "Segment written");
            written.push(path);
            current += 1;
        }
    }

    if written.len() != clips.len() {
        return Err(SegmentError::CountMismatch {
            expected: clips.len(),
            produced: written.len(),
        });
    }
    Ok(written)
}
