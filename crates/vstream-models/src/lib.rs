//! Shared data models for the vstream batch pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, shards and resolved video ids
//! - Clip ranges and artifact naming
//! - Fetch results and per-job outcomes
//! - Worker and batch reports
//! - Decode/encode engine configuration

pub mod clip;
pub mod duration_secs;
pub mod encoding;
pub mod fetch;
pub mod job;
pub mod outcome;
pub mod report;
pub mod utils;

// Re-export common types
pub use clip::{ClipParseError, ClipRange};
pub use encoding::{EngineConfig, EngineKind, FrameGeometry};
pub use fetch::{FetchFailure, FetchResult};
pub use job::{Job, JobStage, VideoId, WorkerShard};
pub use outcome::{FailureReason, JobOutcome, JobReport, SkipReason};
pub use report::{BatchReport, OutcomeCounts, WorkerReport, WorkerStatus};
pub use utils::{extract_youtube_id, requested_video_id, YoutubeIdError, YoutubeIdResult};
