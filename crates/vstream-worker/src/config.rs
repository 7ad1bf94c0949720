//! Batch configuration.
//!
//! Command-line arguments (with `VSTREAM_*` environment fallbacks) resolve
//! into a [`BatchSettings`] value. The settings are validated once, before any
//! job starts, and travel unchanged to worker processes inside their
//! assignment file.

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

use vstream_media::download::{DEFAULT_FORMAT, DEFAULT_MERGE_FORMAT};
use vstream_media::{DownloadOptions, Downloader, FfmpegEngineFactory};
use vstream_models::encoding::{DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use vstream_models::{EngineConfig, EngineKind, FrameGeometry, Job};

use crate::coordinator::{EngineStrategy, DEFAULT_GRACE_PERIOD};
use crate::error::{WorkerError, WorkerResult};
use crate::fetch::FetchAdapter;
use crate::manifest::{ClipManifestReader, ManifestPolicy};
use crate::partition::PartitionLayout;
use crate::pipeline::{JobPipeline, PipelineMode};
use crate::retry::{
    BackoffKind, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RETRY_DELAY, DEFAULT_RETRY_DELAY,
};

/// Default scratch root for per-worker download directories.
pub const DEFAULT_WORK_DIR: &str = "/tmp/vstream";

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 2;

/// Default stagger between worker starts, in seconds.
pub const DEFAULT_START_DELAY_SECS: f64 = 15.0;

#[derive(Debug, Parser)]
#[command(
    name = "vstream-worker",
    version,
    about = "Download videos and cut GPU-encoded clips in parallel batches"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Default log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "VSTREAM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download every source and cut the clips listed in its manifest
    Run(RunArgs),
    /// Download every source into the output directory and stop there
    Download(BatchArgs),
    /// Run one worker from an assignment file (spawned by `run`)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Options shared by every batch mode.
#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    /// Newline-delimited list of video URLs or ids
    #[arg(long, env = "VSTREAM_URLS_FILE")]
    pub urls_file: PathBuf,

    /// Root directory for outputs
    #[arg(long, env = "VSTREAM_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Number of parallel workers
    #[arg(long, env = "VSTREAM_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Seconds between consecutive worker starts
    #[arg(long, env = "VSTREAM_START_DELAY", default_value_t = DEFAULT_START_DELAY_SECS)]
    pub start_delay: f64,

    /// Shard shape
    #[arg(long, env = "VSTREAM_PARTITION", value_enum, default_value_t = PartitionLayout::Balanced)]
    pub partition: PartitionLayout,

    /// Download attempts per source
    #[arg(long, env = "VSTREAM_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Seconds between download attempts (first delay for exponential backoff)
    #[arg(long, env = "VSTREAM_RETRY_DELAY", default_value_t = DEFAULT_RETRY_DELAY.as_secs_f64())]
    pub retry_delay: f64,

    /// Delay growth between download attempts
    #[arg(long, env = "VSTREAM_BACKOFF", value_enum, default_value_t = BackoffKind::Fixed)]
    pub backoff: BackoffKind,

    /// Ceiling in seconds for exponential backoff
    #[arg(long, env = "VSTREAM_MAX_RETRY_DELAY", default_value_t = DEFAULT_MAX_RETRY_DELAY.as_secs_f64())]
    pub max_retry_delay: f64,

    /// yt-dlp format selector
    #[arg(long, env = "VSTREAM_FORMAT", default_value = DEFAULT_FORMAT)]
    pub format: String,

    /// Seconds before a single download attempt is abandoned
    #[arg(long, env = "VSTREAM_DOWNLOAD_TIMEOUT", default_value_t = 300.0)]
    pub download_timeout: f64,

    /// Extra yt-dlp argument (repeatable)
    #[arg(long = "ytdlp-arg", env = "VSTREAM_YTDLP_ARGS", value_delimiter = ',', allow_hyphen_values = true)]
    pub ytdlp_args: Vec<String>,

    /// Scratch root for per-worker download directories
    #[arg(long, env = "VSTREAM_WORK_DIR", default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,

    /// Seconds in-flight jobs get to finish after an interruption
    #[arg(long, env = "VSTREAM_GRACE_PERIOD", default_value_t = DEFAULT_GRACE_PERIOD.as_secs_f64())]
    pub grace_period: f64,

    /// Write a JSON batch report here
    #[arg(long, env = "VSTREAM_REPORT")]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Directory holding `{video_id}.txt` clip manifests
    #[arg(long, env = "VSTREAM_CLIP_DIR")]
    pub clip_dir: PathBuf,

    #[arg(long, env = "VSTREAM_WIDTH", default_value_t = DEFAULT_WIDTH)]
    pub width: u32,

    #[arg(long, env = "VSTREAM_HEIGHT", default_value_t = DEFAULT_HEIGHT)]
    pub height: u32,

    #[arg(long, env = "VSTREAM_FPS", default_value_t = DEFAULT_FPS)]
    pub fps: u32,

    /// GPU ordinal
    #[arg(long, env = "VSTREAM_DEVICE_ID", default_value_t = 0)]
    pub device_id: u32,

    /// Decode/encode engine: hardware, software or auto
    #[arg(long, env = "VSTREAM_ENGINE", default_value = "hardware")]
    pub engine: EngineKind,

    /// Worker execution model
    #[arg(long, env = "VSTREAM_MODEL", value_enum, default_value_t = ExecutionModel::Isolated)]
    pub model: ExecutionModel,

    /// Treatment of malformed manifests
    #[arg(long, env = "VSTREAM_MANIFEST_POLICY", value_enum, default_value_t = ManifestPolicy::Strict)]
    pub manifest_policy: ManifestPolicy,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Assignment written by the coordinator
    #[arg(long)]
    pub assignment: PathBuf,

    /// Where to write this worker's report
    #[arg(long)]
    pub report: PathBuf,
}

/// How workers are hosted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// One OS process per worker, each with a private engine
    #[default]
    Isolated,
    /// Tasks of one process sharing one engine
    Shared,
}

/// What the batch does with each source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchMode {
    Clip {
        clip_dir: PathBuf,
        manifest_policy: ManifestPolicy,
        engine: EngineConfig,
        model: ExecutionModel,
    },
    DownloadOnly,
}

/// Fully resolved, validated batch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BatchSettings {
    pub urls_file: PathBuf,
    pub output_root: PathBuf,
    pub work_dir: PathBuf,
    #[validate(range(min = 1, message = "at least one worker is required"))]
    pub workers: usize,
    #[serde(with = "vstream_models::duration_secs")]
    pub start_delay: Duration,
    #[serde(with = "vstream_models::duration_secs")]
    pub grace_period: Duration,
    pub partition: PartitionLayout,
    #[validate(nested)]
    pub retry: RetryPolicy,
    pub download: DownloadOptions,
    #[validate(custom(function = "validate_mode"))]
    pub mode: BatchMode,
    pub report_path: Option<PathBuf>,
}

fn validate_mode(mode: &BatchMode) -> Result<(), ValidationError> {
    if let BatchMode::Clip { engine, .. } = mode {
        let FrameGeometry { width, height, fps } = engine.geometry;
        if width == 0 || height == 0 {
            return Err(ValidationError::new("geometry")
                .with_message("frame width and height must be non-zero".into()));
        }
        if fps == 0 {
            return Err(ValidationError::new("fps").with_message("fps must be at least 1".into()));
        }
    }
    Ok(())
}

fn seconds(name: &str, value: f64) -> WorkerResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        WorkerError::invalid_config(format!("{} must be a non-negative number of seconds, got {}", name, value))
    })
}

impl BatchArgs {
    fn into_settings(self, mode: BatchMode) -> WorkerResult<BatchSettings> {
        let retry = RetryPolicy::new("fetch")
            .with_max_attempts(self.max_attempts)
            .with_backoff(self.backoff)
            .with_base_delay(seconds("retry-delay", self.retry_delay)?)
            .with_max_delay(seconds("max-retry-delay", self.max_retry_delay)?);

        let download = DownloadOptions {
            format: self.format,
            merge_output_format: DEFAULT_MERGE_FORMAT.to_string(),
            timeout: seconds("download-timeout", self.download_timeout)?,
            extra_args: self.ytdlp_args,
        };

        Ok(BatchSettings {
            urls_file: self.urls_file,
            output_root: self.output_dir,
            work_dir: self.work_dir,
            workers: self.workers,
            start_delay: seconds("start-delay", self.start_delay)?,
            grace_period: seconds("grace-period", self.grace_period)?,
            partition: self.partition,
            retry,
            download,
            mode,
            report_path: self.report,
        })
    }

    /// Settings for a download-only batch.
    pub fn into_download_settings(self) -> WorkerResult<BatchSettings> {
        self.into_settings(BatchMode::DownloadOnly)
    }
}

impl RunArgs {
    /// Settings for a clip-extraction batch.
    pub fn into_settings(self) -> WorkerResult<BatchSettings> {
        let mode = BatchMode::Clip {
            clip_dir: self.clip_dir,
            manifest_policy: self.manifest_policy,
            engine: EngineConfig {
                geometry: FrameGeometry {
                    width: self.width,
                    height: self.height,
                    fps: self.fps,
                },
                device_id: self.device_id,
                kind: self.engine,
            },
            model: self.model,
        };
        self.batch.into_settings(mode)
    }
}

impl BatchSettings {
    /// Validate ranges and check that the inputs exist.
    pub fn check(&self) -> WorkerResult<()> {
        self.validate()?;

        if !self.urls_file.is_file() {
            return Err(WorkerError::invalid_config(format!(
                "URLs file not found: {}",
                self.urls_file.display()
            )));
        }
        if let BatchMode::Clip { clip_dir, .. } = &self.mode {
            if !clip_dir.is_dir() {
                return Err(WorkerError::invalid_config(format!(
                    "clip manifest directory not found: {}",
                    clip_dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Read the URLs file into jobs, in file order.
    pub async fn load_jobs(&self) -> WorkerResult<Vec<Job>> {
        let contents = tokio::fs::read_to_string(&self.urls_file).await?;
        Ok(Job::from_lines(contents.lines(), &self.output_root))
    }

    pub fn execution_model(&self) -> ExecutionModel {
        match &self.mode {
            BatchMode::Clip { model, .. } => *model,
            // Nothing to share without an engine
            BatchMode::DownloadOnly => ExecutionModel::Shared,
        }
    }

    pub fn pipeline(&self, downloader: Arc<dyn Downloader>) -> JobPipeline {
        let fetch = FetchAdapter::new(downloader, self.retry.clone())
            .with_attempt_timeout(self.download.timeout);
        let mode = match &self.mode {
            BatchMode::Clip {
                clip_dir,
                manifest_policy,
                ..
            } => PipelineMode::Clip(ClipManifestReader::new(clip_dir, *manifest_policy)),
            BatchMode::DownloadOnly => PipelineMode::DownloadOnly,
        };
        JobPipeline::new(fetch, self.retry.max_attempts, mode)
    }

    /// FFmpeg engine factory for clip batches.
    pub fn engine_factory(&self) -> Option<FfmpegEngineFactory> {
        match &self.mode {
            BatchMode::Clip { engine, .. } => Some(FfmpegEngineFactory::new(engine.clone())),
            BatchMode::DownloadOnly => None,
        }
    }

    /// Engine strategy for an in-process batch.
    pub fn engine_strategy(&self) -> EngineStrategy {
        match (self.engine_factory(), self.execution_model()) {
            (Some(factory), ExecutionModel::Shared) => EngineStrategy::Shared(Arc::new(factory)),
            (Some(factory), ExecutionModel::Isolated) => EngineStrategy::PerWorker(Arc::new(factory)),
            (None, _) => EngineStrategy::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vstream-worker").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_run_defaults() {
        let cli = parse(&[
            "run",
            "--urls-file",
            "urls.txt",
            "--output-dir",
            "out",
            "--clip-dir",
            "clips",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let settings = args.into_settings().unwrap();

        assert_eq!(settings.workers, 2);
        assert_eq!(settings.start_delay, Duration::from_secs(15));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_delay, Duration::from_secs(5));
        assert_eq!(settings.retry.backoff, BackoffKind::Fixed);
        assert_eq!(settings.partition, PartitionLayout::Balanced);
        assert_eq!(settings.execution_model(), ExecutionModel::Isolated);
        assert!(settings.validate().is_ok());
        match settings.mode {
            BatchMode::Clip {
                engine,
                manifest_policy,
                ..
            } => {
                assert_eq!(engine.geometry, FrameGeometry::default());
                assert_eq!(engine.kind, EngineKind::Hardware);
                assert_eq!(manifest_policy, ManifestPolicy::Strict);
            }
            BatchMode::DownloadOnly => panic!("expected clip mode"),
        }
    }

    #[test]
    fn test_run_overrides() {
        let cli = parse(&[
            "--log-level",
            "debug",
            "run",
            "--urls-file",
            "urls.txt",
            "--output-dir",
            "out",
            "--clip-dir",
            "clips",
            "--workers",
            "6",
            "--start-delay",
            "1.5",
            "--engine",
            "software",
            "--model",
            "shared",
            "--backoff",
            "exponential",
            "--partition",
            "chunked",
            "--ytdlp-arg=--cookies,cookies.txt",
        ]);
        assert_eq!(cli.log_level, "debug");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let settings = args.into_settings().unwrap();

        assert_eq!(settings.workers, 6);
        assert_eq!(settings.start_delay, Duration::from_millis(1500));
        assert_eq!(settings.execution_model(), ExecutionModel::Shared);
        assert_eq!(settings.retry.backoff, BackoffKind::Exponential);
        assert_eq!(settings.partition, PartitionLayout::Chunked);
        assert_eq!(settings.download.extra_args, vec!["--cookies", "cookies.txt"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cli = parse(&[
            "run",
            "--urls-file",
            "urls.txt",
            "--output-dir",
            "out",
            "--clip-dir",
            "clips",
            "--workers",
            "0",
            "--fps",
            "0",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let settings = args.into_settings().unwrap();
        let err = settings.check().unwrap_err();
        assert!(err.is_fatal_to_batch());

        let cli = parse(&["download", "--urls-file", "u", "--output-dir", "o", "--start-delay=-1"]);
        let Command::Download(args) = cli.command else {
            panic!("expected download");
        };
        assert!(matches!(
            args.into_download_settings(),
            Err(WorkerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_check_requires_inputs() {
        let dir = TempDir::new().unwrap();
        let urls = dir.path().join("urls.txt");
        let clips = dir.path().join("clips");

        let cli = parse(&[
            "run",
            "--urls-file",
            urls.to_str().unwrap(),
            "--output-dir",
            dir.path().join("out").to_str().unwrap(),
            "--clip-dir",
            clips.to_str().unwrap(),
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let settings = args.into_settings().unwrap();

        assert!(matches!(settings.check(), Err(WorkerError::InvalidConfig(m)) if m.contains("URLs file")));

        tokio::fs::write(&urls, "https://youtu.be/abc123def45\n\n  xyz  \n")
            .await
            .unwrap();
        assert!(matches!(settings.check(), Err(WorkerError::InvalidConfig(m)) if m.contains("clip manifest")));

        tokio::fs::create_dir(&clips).await.unwrap();
        settings.check().unwrap();

        let jobs = settings.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].identifier, "xyz");
        assert_eq!(jobs[1].output_root, dir.path().join("out"));
    }

    #[test]
    fn test_settings_roundtrip_through_json() {
        let cli = parse(&["download", "--urls-file", "u", "--output-dir", "o"]);
        let Command::Download(args) = cli.command else {
            panic!("expected download");
        };
        let settings = args.into_download_settings().unwrap();

        let json = serde_json::to_string(&settings).unwrap();
        let back: BatchSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
