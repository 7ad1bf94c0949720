//! Job pipeline.
//!
//! Drives one job through fetch, manifest lookup, segment extraction and
//! persistence, then deletes the source. Every failure is folded into the
//! job's outcome; nothing propagates to the worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, Instrument};

use vstream_media::{move_file_no_clobber, EngineHandle, MediaError};
use vstream_models::{
    ClipRange, FailureReason, FetchResult, Job, JobOutcome, JobReport, JobStage, SkipReason,
    VideoId,
};

use crate::fetch::FetchAdapter;
use crate::logging::JobLogger;
use crate::manifest::{ClipManifestReader, ManifestLookup};
use crate::metrics;
use crate::segmenter::{extract_segments, ArtifactWriter, SegmentError};
use crate::source::SourceFile;

/// How a worker reaches its decode/encode engine.
pub enum EngineAccess {
    /// Private to one worker
    Owned(EngineHandle),
    /// One handle for every worker; locked for a job's whole segmenting phase
    Shared(Arc<Mutex<EngineHandle>>),
}

/// What the pipeline does with a fetched source.
#[derive(Debug, Clone)]
pub enum PipelineMode {
    /// Cut the clips listed in the manifest, then delete the source
    Clip(ClipManifestReader),
    /// Keep the downloaded file in the output root
    DownloadOnly,
}

#[derive(Clone)]
pub struct JobPipeline {
    fetch: FetchAdapter,
    max_attempts: u32,
    mode: PipelineMode,
}

/// Terminal state of one run, before timing and identity are attached.
struct Terminal {
    stage: JobStage,
    resolved_id: Option<VideoId>,
    outcome: JobOutcome,
}

impl Terminal {
    fn new(stage: JobStage, resolved_id: Option<VideoId>, outcome: JobOutcome) -> Self {
        Self {
            stage,
            resolved_id,
            outcome,
        }
    }

    fn failed(stage: JobStage, resolved_id: Option<VideoId>, reason: FailureReason) -> Self {
        Self::new(stage, resolved_id, JobOutcome::Failed { reason })
    }

    fn skipped(resolved_id: VideoId, reason: SkipReason) -> Self {
        Self::new(
            JobStage::ManifestLookup,
            Some(resolved_id),
            JobOutcome::Skipped { reason },
        )
    }
}

impl JobPipeline {
    pub fn new(fetch: FetchAdapter, max_attempts: u32, mode: PipelineMode) -> Self {
        Self {
            fetch,
            max_attempts,
            mode,
        }
    }

    pub fn mode(&self) -> &PipelineMode {
        &self.mode
    }

    pub fn needs_engine(&self) -> bool {
        matches!(self.mode, PipelineMode::Clip(_))
    }

    /// Run one job to its outcome.
    ///
    /// Downloads always land in the worker's private `work_dir`; download-only
    /// jobs then move the file into the job's output root.
    pub async fn run_job(
        &self,
        worker_id: usize,
        job: &Job,
        work_dir: &Path,
        engine: Option<&mut EngineAccess>,
    ) -> JobReport {
        let logger = JobLogger::new(worker_id, job);
        let span = logger.create_span();
        let started = Instant::now();

        let terminal = async {
            logger.log_start();
            match &self.mode {
                PipelineMode::Clip(reader) => {
                    self.run_clip_job(job, work_dir, reader, engine, &logger)
                        .await
                }
                PipelineMode::DownloadOnly => {
                    self.run_download_job(job, work_dir, &logger).await
                }
            }
        }
        .instrument(span)
        .await;

        match &terminal.outcome {
            JobOutcome::Completed { artifacts } => {
                logger.log_completion(artifacts.len());
                metrics::record_clips_written(artifacts.len());
            }
            JobOutcome::Skipped { reason } => logger.log_skipped(terminal.stage, reason.as_str()),
            JobOutcome::Failed { reason } => logger.log_failure(terminal.stage, reason),
        }
        metrics::record_job_outcome(&terminal.outcome);

        JobReport {
            index: job.index,
            identifier: job.identifier.clone(),
            resolved_id: terminal.resolved_id,
            stage: terminal.stage,
            outcome: terminal.outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn run_download_job(&self, job: &Job, work_dir: &Path, logger: &JobLogger) -> Terminal {
        let (local_path, resolved_id) = match self
            .fetch
            .fetch(&job.identifier, work_dir, self.max_attempts)
            .await
        {
            FetchResult::Success {
                local_path,
                resolved_id,
                ..
            } => (local_path, resolved_id),
            FetchResult::Failure { reason } => {
                return Terminal::failed(JobStage::Fetching, None, reason.into());
            }
        };
        let mut download = SourceFile::new(local_path);

        let dest = download
            .path()
            .file_name()
            .map(|name| job.output_root.join(name));
        let Some(dest) = dest else {
            cleanup(&mut download, JobStage::Persisting, logger).await;
            return Terminal::failed(
                JobStage::Persisting,
                Some(resolved_id),
                FailureReason::IoFailure {
                    message: "downloaded path has no file name".to_string(),
                },
            );
        };

        let moved = move_file_no_clobber(download.path(), &dest).await;
        // Whatever is still in scratch is either a duplicate or a failed move
        cleanup(&mut download, JobStage::Persisting, logger).await;

        match moved {
            Ok(true) => {}
            Ok(false) => info!(
                resolved_id = %resolved_id,
                "Keeping existing {}",
                dest.display()
            ),
            Err(e) => {
                return Terminal::failed(
                    JobStage::Persisting,
                    Some(resolved_id),
                    FailureReason::IoFailure {
                        message: format!("failed to move download to {}: {}", dest.display(), e),
                    },
                );
            }
        }

        Terminal::new(
            JobStage::Persisting,
            Some(resolved_id),
            JobOutcome::Completed {
                artifacts: vec![dest],
            },
        )
    }

    async fn run_clip_job(
        &self,
        job: &Job,
        work_dir: &Path,
        reader: &ClipManifestReader,
        engine: Option<&mut EngineAccess>,
        logger: &JobLogger,
    ) -> Terminal {
        let (local_path, resolved_id) = match self
            .fetch
            .fetch(&job.identifier, work_dir, self.max_attempts)
            .await
        {
            FetchResult::Success {
                local_path,
                resolved_id,
                ..
            } => (local_path, resolved_id),
            FetchResult::Failure { reason } => {
                return Terminal::failed(JobStage::Fetching, None, reason.into());
            }
        };
        let mut source = SourceFile::new(local_path);

        let clips = match reader.read(&resolved_id).await {
            ManifestLookup::Clips(clips) => clips,
            ManifestLookup::NotFound => {
                cleanup(&mut source, JobStage::ManifestLookup, logger).await;
                return Terminal::skipped(resolved_id, SkipReason::ManifestMissing);
            }
            ManifestLookup::Empty => {
                cleanup(&mut source, JobStage::ManifestLookup, logger).await;
                return Terminal::skipped(resolved_id, SkipReason::ManifestEmpty);
            }
            ManifestLookup::Invalid(message) => {
                cleanup(&mut source, JobStage::ManifestLookup, logger).await;
                return Terminal::failed(
                    JobStage::ManifestLookup,
                    Some(resolved_id),
                    FailureReason::ManifestInvalid { message },
                );
            }
            ManifestLookup::Unreadable(message) => {
                cleanup(&mut source, JobStage::ManifestLookup, logger).await;
                return Terminal::failed(
                    JobStage::ManifestLookup,
                    Some(resolved_id),
                    FailureReason::IoFailure { message },
                );
            }
        };

        logger.log_stage(
            JobStage::Segmenting,
            &format!("Extracting {} clip(s) from {}", clips.len(), resolved_id),
        );

        let output_dir = job.output_dir(&resolved_id);
        let result = match engine {
            Some(EngineAccess::Owned(handle)) => {
                segment(handle, source.path(), &clips, &output_dir, &resolved_id).await
            }
            Some(EngineAccess::Shared(shared)) => {
                let mut handle = shared.lock().await;
                segment(&mut handle, source.path(), &clips, &output_dir, &resolved_id).await
            }
            None => Err(SegmentError::Engine(MediaError::protocol(
                "clip mode requires an engine",
            ))),
        };

        // The session is closed by now; the source goes before the outcome is recorded
        cleanup(&mut source, JobStage::Persisting, logger).await;

        match result {
            Ok(artifacts) => Terminal::new(
                JobStage::Persisting,
                Some(resolved_id),
                JobOutcome::Completed { artifacts },
            ),
            Err(SegmentError::Engine(e)) => Terminal::failed(
                JobStage::Segmenting,
                Some(resolved_id),
                FailureReason::EngineFailure {
                    message: e.to_string(),
                },
            ),
            Err(e @ SegmentError::Persist { .. }) => Terminal::failed(
                JobStage::Persisting,
                Some(resolved_id),
                FailureReason::IoFailure {
                    message: e.to_string(),
                },
            ),
            Err(SegmentError::CountMismatch { expected, produced }) => Terminal::failed(
                JobStage::Segmenting,
                Some(resolved_id),
                FailureReason::SegmentCountMismatch { expected, produced },
            ),
        }
    }
}

async fn segment(
    handle: &mut EngineHandle,
    source: &Path,
    clips: &[ClipRange],
    output_dir: &Path,
    resolved_id: &VideoId,
) -> Result<Vec<PathBuf>, SegmentError> {
    let writer = ArtifactWriter::new(
        output_dir,
        resolved_id.as_str(),
        handle.artifact_extension().to_string(),
    );
    let mut session = handle.open_source(source).await?;
    let result = extract_segments(&mut session, clips, &writer).await;
    session.close();
    result
}

async fn cleanup(source: &mut SourceFile, stage: JobStage, logger: &JobLogger) {
    if let Err(e) = source.remove().await {
        logger.log_warning(
            stage,
            &format!("Failed to delete source {}: {}", source.path().display(), e),
        );
    }
}
