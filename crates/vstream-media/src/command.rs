//! FFmpeg command builder and process helpers.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vstream_models::FrameGeometry;

use crate::error::{MediaError, MediaResult};

/// FFmpeg pipe endpoints
pub const PIPE_STDIN: &str = "pipe:0";
pub const PIPE_STDOUT: &str = "pipe:1";

/// One FFmpeg invocation: a single input, a single output, and the
/// options that go on either side of `-i`.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// File path, pipe or lavfi source
    input: String,
    /// File path or pipe
    output: String,
    input_args: Vec<String>,
    output_args: Vec<String>,
    /// `-v` verbosity
    log_level: String,
}

impl FfmpegCommand {
    /// Outputs are always overwritten; FFmpeg only logs errors by default.
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_level: String::from("error"),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Options that describe the input.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Options that describe the output.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Decode on the given CUDA device.
    pub fn hwaccel_cuda(self, device_id: u32) -> Self {
        self.input_args(["-hwaccel", "cuda", "-hwaccel_device"])
            .input_arg(device_id.to_string())
    }

    /// Read raw `yuv420p` frames of the given geometry from the input.
    pub fn raw_video_input(self, geometry: &FrameGeometry) -> Self {
        self.input_args(["-f", "rawvideo", "-pix_fmt", "yuv420p", "-s"])
            .input_arg(geometry.size_arg())
            .input_arg("-r")
            .input_arg(geometry.fps.to_string())
    }

    /// Resample to the geometry's fps and size and emit raw `yuv420p` frames.
    pub fn raw_video_output(self, geometry: &FrameGeometry) -> Self {
        self.output_arg("-an")
            .video_filter(format!(
                "fps={},scale={}:{}",
                geometry.fps, geometry.width, geometry.height
            ))
            .output_args(["-pix_fmt", "yuv420p"])
            .format("rawvideo")
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Constant rate factor for software encoders.
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Output muxer, needed when writing to a pipe.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Full argument vector, without the program name.
    pub fn build_args(&self) -> Vec<String> {
        let head = ["-y", "-hide_banner", "-v", self.log_level.as_str()];
        head.iter()
            .map(|s| s.to_string())
            .chain(self.input_args.iter().cloned())
            .chain([String::from("-i"), self.input.clone()])
            .chain(self.output_args.iter().cloned())
            .chain(std::iter::once(self.output.clone()))
            .collect()
    }

    /// Spawn FFmpeg with stdout piped and, when `pipe_stdin` is set, stdin piped.
    ///
    /// The child is killed when its handle is dropped.
    pub fn spawn(&self, pipe_stdin: bool) -> MediaResult<Child> {
        check_ffmpeg()?;

        let args = self.build_args();
        debug!("Spawning FFmpeg: ffmpeg {}", args.join(" "));

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        Ok(child)
    }

    /// Run to completion, discarding stdout, failing on timeout or non-zero exit.
    pub async fn run(&self, timeout: Duration) -> MediaResult<()> {
        check_ffmpeg()?;

        let args = self.build_args();
        debug!(args = %args.join(" "), "Running FFmpeg to completion");

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // Dropping the wait future drops the child, which kills it
                warn!("FFmpeg timed out after {} seconds", timeout.as_secs());
                return Err(MediaError::Timeout(timeout.as_secs()));
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(MediaError::ffmpeg_failed(
                "FFmpeg failed",
                (!stderr.is_empty()).then_some(stderr),
                output.status.code(),
            ))
        }
    }
}

/// Drain a child's stderr in the background so the pipe never fills up.
pub fn collect_stderr(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    })
}

/// Path of the `ffmpeg` executable on `PATH`.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Path of the `yt-dlp` executable on `PATH`.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}
