//! Video download using yt-dlp.
//!
//! The downloader is a capability: given an identifier and an output
//! directory it writes one merged audio+video file named `{id}.{ext}` and
//! reports success or failure. Retrying and locating the output file are the
//! caller's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};

/// Default format selector: 1080p60 H.264 video plus the best audio track.
pub const DEFAULT_FORMAT: &str = "299+bestaudio";

/// Default container for merged output.
pub const DEFAULT_MERGE_FORMAT: &str = "mp4";

/// Default per-attempt timeout.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// A remote fetch mechanism.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Run one download attempt for `identifier` into `dest_dir`.
    ///
    /// Must never overwrite an existing file in `dest_dir`.
    async fn download(&self, identifier: &str, dest_dir: &Path) -> MediaResult<()>;
}

/// yt-dlp invocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// `-f` format selector
    pub format: String,
    /// `--merge-output-format`
    pub merge_output_format: String,
    /// Upper bound for a single attempt
    #[serde(with = "vstream_models::duration_secs")]
    pub timeout: Duration,
    /// Extra arguments appended before the identifier
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            merge_output_format: DEFAULT_MERGE_FORMAT.to_string(),
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            extra_args: Vec::new(),
        }
    }
}

/// Downloader backed by the `yt-dlp` executable.
#[derive(Debug, Clone, Default)]
pub struct YtDlpDownloader {
    options: DownloadOptions,
}

impl YtDlpDownloader {
    pub fn new(options: DownloadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Arguments for one attempt.
    pub fn build_args(&self, identifier: &str, dest_dir: &Path) -> Vec<String> {
        let template = dest_dir.join("%(id)s.%(ext)s");

        let mut args = vec![
            "-f".to_string(),
            self.options.format.clone(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            "--merge-output-format".to_string(),
            self.options.merge_output_format.clone(),
            "--no-overwrites".to_string(),
            "--quiet".to_string(),
        ];
        args.extend(self.options.extra_args.iter().cloned());
        // End of options: identifiers that start with '-' stay positional
        args.push("--".to_string());
        args.push(identifier.to_string());
        args
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, identifier: &str, dest_dir: &Path) -> MediaResult<()> {
        check_ytdlp()?;

        let args = self.build_args(identifier, dest_dir);
        debug!("Running yt-dlp {}", args.join(" "));

        let child = Command::new("yt-dlp")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let timeout = self.options.timeout;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    identifier = identifier,
                    timeout_secs = timeout.as_secs(),
                    "yt-dlp timed out, process killed"
                );
                return Err(MediaError::Timeout(timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);

            let error_msg = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("Unknown error");

            if stderr.contains("429") || stderr.contains("Too Many Requests") {
                warn!(identifier = identifier, "Remote rate limit detected");
            }

            return Err(MediaError::download_failed(format!(
                "yt-dlp exited with {}: {}",
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                error_msg
            )));
        }

        info!(identifier = identifier, "yt-dlp finished");
        Ok(())
    }
}
