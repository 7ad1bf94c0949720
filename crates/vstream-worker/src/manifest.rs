//! Clip manifest lookup.
//!
//! A manifest lives at `{clip_dir}/{resolved_id}.txt` and lists one
//! `start end` frame pair per non-blank line.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use vstream_models::{ClipRange, VideoId};

/// How malformed manifest content is treated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ManifestPolicy {
    /// Any malformed line or overlap invalidates the whole manifest
    #[default]
    Strict,
    /// Malformed lines and overlapping ranges are dropped with a warning
    Lenient,
}

/// Result of looking up a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLookup {
    /// Ranges sorted by start, pairwise disjoint
    Clips(Vec<ClipRange>),
    NotFound,
    Empty,
    Invalid(String),
    /// The file exists but could not be read
    Unreadable(String),
}

/// Reads clip manifests from one directory.
#[derive(Debug, Clone)]
pub struct ClipManifestReader {
    clip_dir: PathBuf,
    policy: ManifestPolicy,
}

impl ClipManifestReader {
    pub fn new(clip_dir: impl Into<PathBuf>, policy: ManifestPolicy) -> Self {
        Self {
            clip_dir: clip_dir.into(),
            policy,
        }
    }

    pub fn clip_dir(&self) -> &Path {
        &self.clip_dir
    }

    pub fn manifest_path(&self, resolved_id: &VideoId) -> PathBuf {
        self.clip_dir.join(format!("{}.txt", resolved_id))
    }

    pub async fn read(&self, resolved_id: &VideoId) -> ManifestLookup {
        let path = self.manifest_path(resolved_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                debug!(manifest = %path.display(), "Manifest loaded");
                self.parse(&contents)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => ManifestLookup::NotFound,
            Err(e) => ManifestLookup::Unreadable(format!("{}: {}", path.display(), e)),
        }
    }

    /// Parse manifest contents under this reader's policy.
    pub fn parse(&self, contents: &str) -> ManifestLookup {
        let mut clips = Vec::new();

        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match ClipRange::parse_line(line) {
                Ok(range) => clips.push(range),
                Err(e) => match self.policy {
                    ManifestPolicy::Strict => {
                        return ManifestLookup::Invalid(format!("line {}: {}", line_no + 1, e));
                    }
                    ManifestPolicy::Lenient => {
                        warn!(line = line_no + 1, "Dropping manifest line: {}", e);
                    }
                },
            }
        }

        clips.sort();

        let mut disjoint: Vec<ClipRange> = Vec::with_capacity(clips.len());
        for range in clips {
            let overlapped = disjoint.last().copied().filter(|prev| prev.overlaps(&range));
            match (overlapped, self.policy) {
                (None, _) => disjoint.push(range),
                (Some(prev), ManifestPolicy::Strict) => {
                    return ManifestLookup::Invalid(format!("clip {} overlaps {}", range, prev));
                }
                (Some(prev), ManifestPolicy::Lenient) => {
                    warn!("Dropping clip {} overlapping {}", range, prev);
                }
            }
        }

        if disjoint.is_empty() {
            ManifestLookup::Empty
        } else {
            ManifestLookup::Clips(disjoint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn range(start: u64, end: u64) -> ClipRange {
        ClipRange::new(start, end).unwrap()
    }

    fn strict() -> ClipManifestReader {
        ClipManifestReader::new("/clips", ManifestPolicy::Strict)
    }

    fn lenient() -> ClipManifestReader {
        ClipManifestReader::new("/clips", ManifestPolicy::Lenient)
    }

    #[test]
    fn test_parse_sorts_disjoint_ranges() {
        let lookup = strict().parse("50 60\n\n  0 3\n5 8\n");
        assert_eq!(
            lookup,
            ManifestLookup::Clips(vec![range(0, 3), range(5, 8), range(50, 60)])
        );
    }

    #[test]
    fn test_adjacent_ranges_are_disjoint() {
        let lookup = strict().parse("0 3\n3 6\n");
        assert_eq!(lookup, ManifestLookup::Clips(vec![range(0, 3), range(3, 6)]));
    }

    #[test]
    fn test_blank_manifest_is_empty() {
        assert_eq!(strict().parse(""), ManifestLookup::Empty);
        assert_eq!(strict().parse("\n   \n\t\n"), ManifestLookup::Empty);
    }

    #[test]
    fn test_strict_rejects_malformed() {
        assert!(matches!(strict().parse("0 3\nabc 4\n"), ManifestLookup::Invalid(m) if m.starts_with("line 2")));
        assert!(matches!(strict().parse("5 5\n"), ManifestLookup::Invalid(_)));
        assert!(matches!(strict().parse("9 2\n"), ManifestLookup::Invalid(_)));
        assert!(matches!(strict().parse("0 10\n5 12\n"), ManifestLookup::Invalid(_)));
    }

    #[test]
    fn test_lenient_drops_bad_lines() {
        assert_eq!(
            lenient().parse("0 10\nabc\n5 12\n20 30\n7 7\n"),
            ManifestLookup::Clips(vec![range(0, 10), range(20, 30)])
        );
        assert_eq!(lenient().parse("x y\n"), ManifestLookup::Empty);
    }

    #[tokio::test]
    async fn test_read_from_disk() {
        let dir = TempDir::new().unwrap();
        let reader = ClipManifestReader::new(dir.path(), ManifestPolicy::Strict);
        let id = VideoId::from("abc");

        assert_eq!(reader.read(&id).await, ManifestLookup::NotFound);

        tokio::fs::write(dir.path().join("abc.txt"), "0 2\n")
            .await
            .unwrap();
        assert_eq!(
            reader.read(&id).await,
            ManifestLookup::Clips(vec![range(0, 2)])
        );
    }
}
