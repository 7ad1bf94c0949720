#![deny(unreachable_patterns)]
//! External tool wrappers for the vstream pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building for piped raw-video I/O
//! - The yt-dlp downloader behind the [`Downloader`] capability
//! - The decode/encode session protocol ([`EngineHandle`]) and its
//!   hardware and software FFmpeg backends
//! - Idempotent filesystem cleanup helpers

pub mod command;
pub mod download;
pub mod engine;
pub mod error;
pub mod fs_utils;

pub use command::{check_ffmpeg, check_ytdlp, FfmpegCommand};
pub use download::{DownloadOptions, Downloader, YtDlpDownloader};
pub use engine::{
    DecodeEncodeBackend, EngineFactory, EngineHandle, FfmpegBackend, FfmpegEngineFactory,
    FfmpegVariant, Frame, SourceSession,
};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{move_file_no_clobber, remove_file_if_exists, VIDEO_EXTENSIONS};
