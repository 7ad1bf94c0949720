//! Clip range models and artifact naming.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing a single manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipParseError {
    #[error("expected two whitespace-separated integers, found {0} field(s)")]
    FieldCount(usize),

    #[error("invalid frame index '{0}'")]
    InvalidIndex(String),

    #[error("clip end {end} must be greater than start {start}")]
    EmptyRange { start: u64, end: u64 },
}

/// A half-open frame interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipRange {
    /// First frame of the clip (inclusive)
    pub start: u64,
    /// Frame after the last frame of the clip (exclusive)
    pub end: u64,
}

impl ClipRange {
    /// Create a new range, rejecting empty or inverted intervals.
    pub fn new(start: u64, end: u64) -> Result<Self, ClipParseError> {
        if end <= start {
            return Err(ClipParseError::EmptyRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse one manifest line of the form `start end`.
    pub fn parse_line(line: &str) -> Result<Self, ClipParseError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(ClipParseError::FieldCount(fields.len()));
        }

        let start = parse_index(fields[0])?;
        let end = parse_index(fields[1])?;
        Self::new(start, end)
    }

    /// Number of frames covered by this range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Ranges are never empty once constructed through [`ClipRange::new`].
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Index of the last frame that belongs to the clip.
    pub fn last_frame(&self) -> u64 {
        self.end - 1
    }

    /// Whether two ranges share at least one frame.
    pub fn overlaps(&self, other: &ClipRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Artifact file name: `{job_id}_{start:07}_{end:07}.{ext}`.
    pub fn artifact_file_name(&self, job_id: &str, extension: &str) -> String {
        format!(
            "{}_{:07}_{:07}.{}",
            job_id, self.start, self.end, extension
        )
    }
}

impl fmt::Display for ClipRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

fn parse_index(field: &str) -> Result<u64, ClipParseError> {
    field
        .parse::<u64>()
        .map_err(|_| ClipParseError::InvalidIndex(field.to_string()))
}
