//! FFmpeg-backed decode/encode engine.
//!
//! Decoding runs one FFmpeg process per source that writes raw `yuv420p`
//! frames, resampled to the configured fps and size, to stdout. Each encode
//! segment is a separate FFmpeg process fed frames on stdin and writing an
//! elementary stream to stdout, which a background task collects.
//!
//! The hardware variant decodes with `-hwaccel cuda` and encodes with NVENC on
//! the bound device; the software variant uses libx264.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vstream_models::encoding::{
    HARDWARE_ARTIFACT_EXTENSION, HARDWARE_VIDEO_CODEC, SOFTWARE_ARTIFACT_EXTENSION,
    SOFTWARE_VIDEO_CODEC,
};
use vstream_models::FrameGeometry;

use super::{DecodeEncodeBackend, Frame};
use crate::command::{check_ffmpeg, collect_stderr, FfmpegCommand, PIPE_STDIN, PIPE_STDOUT};
use crate::error::{MediaError, MediaResult};

/// Upper bound for the device probe run during initialization.
const INIT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// NVENC preset; p4 balances speed and quality.
const NVENC_PRESET: &str = "p4";

const X264_PRESET: &str = "fast";
const X264_CRF: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegVariant {
    Hardware,
    Software,
}

struct Decoder {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    exhausted: bool,
}

struct SegmentEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    output: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr: JoinHandle<String>,
}

/// Decode/encode backend driving FFmpeg child processes.
pub struct FfmpegBackend {
    variant: FfmpegVariant,
    geometry: FrameGeometry,
    device_id: Option<u32>,
    decoder: Option<Decoder>,
    encoder: Option<SegmentEncoder>,
}

impl FfmpegBackend {
    pub fn new(variant: FfmpegVariant, geometry: FrameGeometry) -> Self {
        Self {
            variant,
            geometry,
            device_id: None,
            decoder: None,
            encoder: None,
        }
    }

    pub fn variant(&self) -> FfmpegVariant {
        self.variant
    }

    fn bound_device(&self) -> MediaResult<u32> {
        self.device_id
            .ok_or_else(|| MediaError::protocol("backend used before initialize"))
    }

    fn decoder_command(&self, path: &Path, device_id: u32) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(path.to_string_lossy(), PIPE_STDOUT);
        let cmd = match self.variant {
            FfmpegVariant::Hardware => cmd.hwaccel_cuda(device_id),
            FfmpegVariant::Software => cmd,
        };
        cmd.raw_video_output(&self.geometry)
    }

    fn encoder_command(&self, device_id: u32) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(PIPE_STDIN, PIPE_STDOUT).raw_video_input(&self.geometry);
        match self.variant {
            FfmpegVariant::Hardware => cmd
                .video_codec(HARDWARE_VIDEO_CODEC)
                .output_arg("-gpu")
                .output_arg(device_id.to_string())
                .preset(NVENC_PRESET)
                .format("hevc"),
            FfmpegVariant::Software => cmd
                .video_codec(SOFTWARE_VIDEO_CODEC)
                .preset(X264_PRESET)
                .crf(X264_CRF)
                .format("h264"),
        }
    }

    /// Encode one synthetic frame on the device to prove NVENC is usable.
    fn probe_command(&self, device_id: u32) -> FfmpegCommand {
        FfmpegCommand::new(
            format!(
                "color=c=black:s={}:r={}",
                self.geometry.size_arg(),
                self.geometry.fps
            ),
            "-",
        )
        .input_args(["-f", "lavfi"])
        .output_args(["-frames:v", "1"])
        .video_codec(HARDWARE_VIDEO_CODEC)
        .output_arg("-gpu")
        .output_arg(device_id.to_string())
        .format("null")
    }

    fn abandon_encoder(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            drop(encoder.stdin.take());
            let _ = encoder.child.start_kill();
            encoder.output.abort();
            encoder.stderr.abort();
        }
    }

    fn abandon_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            let _ = decoder.child.start_kill();
            decoder.stderr.abort();
        }
    }
}

#[async_trait]
impl DecodeEncodeBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        match self.variant {
            FfmpegVariant::Hardware => "ffmpeg-nvenc",
            FfmpegVariant::Software => "ffmpeg-x264",
        }
    }

    fn artifact_extension(&self) -> &str {
        match self.variant {
            FfmpegVariant::Hardware => HARDWARE_ARTIFACT_EXTENSION,
            FfmpegVariant::Software => SOFTWARE_ARTIFACT_EXTENSION,
        }
    }

    async fn initialize(&mut self, device_id: u32) -> MediaResult<()> {
        check_ffmpeg().map_err(|e| MediaError::engine_init(e.to_string()))?;

        if self.variant == FfmpegVariant::Hardware {
            self.probe_command(device_id)
                .run(INIT_PROBE_TIMEOUT)
                .await
                .map_err(|e| {
                    MediaError::engine_init(format!(
                        "NVENC unavailable on device {}: {}",
                        device_id, e
                    ))
                })?;
        }

        self.device_id = Some(device_id);
        Ok(())
    }

    async fn open_source(&mut self, path: &Path) -> MediaResult<()> {
        let device_id = self.bound_device()?;
        self.abandon_decoder();

        let mut child = self.decoder_command(path, device_id).spawn(false)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::decode("decoder stdout not captured"))?;
        let stderr = collect_stderr(child.stderr.take());

        debug!(source = %path.display(), backend = self.name(), "Decoder started");
        self.decoder = Some(Decoder {
            child,
            stdout,
            stderr,
            exhausted: false,
        });
        Ok(())
    }

    async fn decode_next(&mut self) -> MediaResult<Option<Vec<u8>>> {
        let frame_size = self.geometry.yuv420p_frame_size();
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| MediaError::protocol("decode without an open source"))?;
        if decoder.exhausted {
            return Ok(None);
        }

        let mut buf = vec![0u8; frame_size];
        let mut filled = 0;
        while filled < frame_size {
            match decoder.stdout.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(MediaError::decode(e.to_string())),
            }
        }

        if filled == frame_size {
            return Ok(Some(buf));
        }

        decoder.exhausted = true;
        let status = decoder.child.wait().await?;
        if !status.success() {
            let stderr = (&mut decoder.stderr).await.unwrap_or_default();
            return Err(MediaError::decode(format!(
                "decoder exited with {:?}: {}",
                status.code(),
                stderr.trim()
            )));
        }
        if filled > 0 {
            warn!(
                bytes = filled,
                expected = frame_size,
                "Decoder ended with a partial frame; dropped"
            );
        }
        Ok(None)
    }

    async fn begin_segment(&mut self) -> MediaResult<()> {
        let device_id = self.bound_device()?;
        self.abandon_encoder();

        let mut child = self.encoder_command(device_id).spawn(true)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::encode("encoder stdin not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::encode("encoder stdout not captured"))?;
        let stderr = collect_stderr(child.stderr.take());

        let output = tokio::spawn(async move {
            let mut bytes = Vec::new();
            stdout.read_to_end(&mut bytes).await?;
            Ok(bytes)
        });

        self.encoder = Some(SegmentEncoder {
            child,
            stdin: Some(stdin),
            output,
            stderr,
        });
        Ok(())
    }

    async fn encode(&mut self, frame: &Frame) -> MediaResult<()> {
        let expected = self.geometry.yuv420p_frame_size();
        if frame.data.len() != expected {
            return Err(MediaError::encode(format!(
                "frame {} has {} bytes, expected {}",
                frame.index,
                frame.data.len(),
                expected
            )));
        }

        let stdin = self
            .encoder
            .as_mut()
            .and_then(|encoder| encoder.stdin.as_mut())
            .ok_or_else(|| MediaError::protocol("encode without an open segment"))?;

        stdin
            .write_all(&frame.data)
            .await
            .map_err(|e| MediaError::encode(format!("frame {}: {}", frame.index, e)))
    }

    async fn finish_segment(&mut self) -> MediaResult<Vec<u8>> {
        let mut encoder = self
            .encoder
            .take()
            .ok_or_else(|| MediaError::protocol("finish without an open segment"))?;

        if let Some(mut stdin) = encoder.stdin.take() {
            // EOF on stdin flushes the encoder
            let _ = stdin.shutdown().await;
        }

        let status = encoder.child.wait().await?;
        let output = encoder
            .output
            .await
            .map_err(|e| MediaError::encode(format!("output reader failed: {}", e)))?
            .map_err(|e| MediaError::encode(e.to_string()))?;
        let stderr = encoder.stderr.await.unwrap_or_default();

        if !status.success() {
            let stderr = stderr.trim().to_string();
            return Err(MediaError::ffmpeg_failed(
                "segment encoder exited with non-zero status",
                (!stderr.is_empty()).then_some(stderr),
                status.code(),
            ));
        }
        if output.is_empty() {
            return Err(MediaError::encode("segment encoder produced no output"));
        }
        Ok(output)
    }

    fn close_source(&mut self) {
        self.abandon_encoder();
        self.abandon_decoder();
    }

    fn shutdown(&mut self) {
        self.close_source();
        if self.device_id.take().is_some() {
            debug!(backend = self.name(), "Device released");
        }
    }
}

/// Whether the local FFmpeg build lists CUDA among its hwaccels.
pub async fn cuda_hwaccel_available() -> bool {
    if check_ffmpeg().is_err() {
        return false;
    }
    match Command::new("ffmpeg")
        .args(["-hide_banner", "-hwaccels"])
        .kill_on_drop(true)
        .output()
        .await
    {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| line.trim() == "cuda"),
        _ => false,
    }
}
