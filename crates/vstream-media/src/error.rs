//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while downloading, decoding or encoding.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Engine session misuse: {0}")]
    EngineProtocol(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn engine_init(message: impl Into<String>) -> Self {
        Self::EngineInit(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::EngineProtocol(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }
}
