//! Job and shard models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::utils::requested_video_id;

/// Identifier of a downloaded source video, resolved from the downloader's output.
///
/// This may differ from the identifier used to request the fetch; every step
/// after the fetch is keyed off the resolved id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One remote item to download and cut into clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Position in the batch input list
    pub index: usize,
    /// Source identifier as given in the input (URL or bare id)
    pub identifier: String,
    /// Root directory that receives `{resolved_id}/` artifact folders
    pub output_root: PathBuf,
}

impl Job {
    /// Create a job for one input line.
    pub fn new(index: usize, identifier: impl Into<String>, output_root: impl AsRef<Path>) -> Self {
        Self {
            index,
            identifier: identifier.into(),
            output_root: output_root.as_ref().to_path_buf(),
        }
    }

    /// Build jobs from raw input lines, trimming whitespace and skipping blanks.
    pub fn from_lines<'a, I>(lines: I, output_root: impl AsRef<Path>) -> Vec<Job>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines
            .into_iter()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(index, line)| Job::new(index, line, output_root.as_ref()))
            .collect()
    }

    /// Video id the downloader is expected to produce, when it can be derived
    /// from the identifier alone.
    pub fn requested_id(&self) -> Option<String> {
        requested_video_id(&self.identifier)
    }

    /// Directory that receives this job's artifacts once the id is resolved.
    pub fn output_dir(&self, resolved_id: &VideoId) -> PathBuf {
        self.output_root.join(resolved_id.as_str())
    }
}

/// Pipeline stage a job was in when it reached its terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Fetching,
    ManifestLookup,
    Segmenting,
    Persisting,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Fetching => "fetching",
            JobStage::ManifestLookup => "manifest_lookup",
            JobStage::Segmenting => "segmenting",
            JobStage::Persisting => "persisting",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An ordered run of jobs owned by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerShard {
    pub worker_id: usize,
    pub jobs: Vec<Job>,
}

impl WorkerShard {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lines_skips_blanks() {
        let input = "https://youtu.be/abc123def45\n\n  xyz987uvw65  \n\t\n";
        let jobs = Job::from_lines(input.lines(), "/out");

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].index, 0);
        assert_eq!(jobs[0].identifier, "https://youtu.be/abc123def45");
        assert_eq!(jobs[1].index, 1);
        assert_eq!(jobs[1].identifier, "xyz987uvw65");
    }

    #[test]
    fn test_requested_id() {
        let url = Job::new(0, "https://www.youtube.com/watch?v=abc123def45", "/out");
        assert_eq!(url.requested_id(), Some("abc123def45".to_string()));

        let bare = Job::new(1, "clip-42", "/out");
        assert_eq!(bare.requested_id(), Some("clip-42".to_string()));

        let other = Job::new(2, "https://vimeo.com/123", "/out");
        assert_eq!(other.requested_id(), None);
    }

    #[test]
    fn test_output_dir() {
        let job = Job::new(0, "abc", "/data/out");
        assert_eq!(
            job.output_dir(&VideoId::from("abc")),
            PathBuf::from("/data/out/abc")
        );
    }
}
