//! Shared fakes for batch integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use vstream_media::{
    DecodeEncodeBackend, Downloader, EngineFactory, EngineHandle, Frame, MediaError, MediaResult,
};
use vstream_models::Job;
use vstream_worker::{
    BatchCoordinator, ClipManifestReader, EngineStrategy, FetchAdapter, JobPipeline,
    ManifestPolicy, PipelineMode, RetryPolicy,
};

/// Downloader that writes `{identifier}.mp4` holding a frame count.
pub struct FakeDownloader {
    frames: u64,
    failures: Mutex<HashMap<String, u32>>,
    gates: HashMap<String, Arc<Notify>>,
    calls: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            failures: Mutex::new(HashMap::new()),
            gates: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `times` attempts for `identifier`.
    pub fn failing(self, identifier: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(identifier.to_string(), times);
        self
    }

    /// Block downloads of `identifier` until the returned gate is notified.
    pub fn gated(mut self, identifier: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gates.insert(identifier.to_string(), Arc::clone(&gate));
        (self, gate)
    }

    /// Every download attempt, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until `identifier` has been requested at least once.
    pub async fn wait_for_call(&self, identifier: &str) {
        for _ in 0..500 {
            if self.calls().iter().any(|c| c == identifier) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} was never requested", identifier);
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, identifier: &str, dest_dir: &Path) -> MediaResult<()> {
        self.calls.lock().unwrap().push(identifier.to_string());

        if let Some(gate) = self.gates.get(identifier) {
            gate.notified().await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(identifier) {
                if *left > 0 {
                    *left -= 1;
                    return Err(MediaError::download_failed("HTTP Error 503"));
                }
            }
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("{}.mp4", identifier));
        if !path.exists() {
            tokio::fs::write(&path, self.frames.to_string()).await?;
        }
        Ok(())
    }
}

/// Downloader with per-identifier timing: writes `{stem}.mp4` after
/// `write_after`, then returns after `return_after` (both from call start).
#[derive(Default)]
pub struct TimedDownloader {
    plans: HashMap<String, (String, Duration, Duration)>,
}

impl TimedDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(
        mut self,
        identifier: &str,
        stem: &str,
        write_after: Duration,
        return_after: Duration,
    ) -> Self {
        self.plans.insert(
            identifier.to_string(),
            (stem.to_string(), write_after, return_after),
        );
        self
    }
}

#[async_trait]
impl Downloader for TimedDownloader {
    async fn download(&self, identifier: &str, dest_dir: &Path) -> MediaResult<()> {
        let Some((stem, write_after, return_after)) = self.plans.get(identifier) else {
            return Err(MediaError::download_failed("unknown identifier"));
        };
        tokio::time::sleep(*write_after).await;
        tokio::fs::create_dir_all(dest_dir).await?;
        tokio::fs::write(dest_dir.join(format!("{}.mp4", stem)), stem.as_bytes()).await?;
        tokio::time::sleep(return_after.saturating_sub(*write_after)).await;
        Ok(())
    }
}

/// Counters shared by every backend a [`SyntheticEngineFactory`] creates.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub created: AtomicUsize,
    pub initialized: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub encoded: Mutex<Vec<u64>>,
}

impl EngineStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Backend whose sources are text files holding their frame count.
pub struct SyntheticBackend {
    stats: Arc<EngineStats>,
    fail_init: bool,
    fail_encode_call: Option<usize>,
    frame_delay: Duration,
    frames: u64,
    next: u64,
    segment: Vec<u8>,
    open: bool,
}

#[async_trait]
impl DecodeEncodeBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn artifact_extension(&self) -> &str {
        "bin"
    }

    async fn initialize(&mut self, _device_id: u32) -> MediaResult<()> {
        if self.fail_init {
            return Err(MediaError::engine_init("no CUDA-capable device is detected"));
        }
        self.stats.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_source(&mut self, path: &Path) -> MediaResult<()> {
        let contents = tokio::fs::read_to_string(path).await?;
        self.frames = contents
            .trim()
            .parse()
            .map_err(|_| MediaError::decode("not a synthetic source"))?;
        self.next = 0;
        self.open = true;
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(())
    }

    async fn decode_next(&mut self) -> MediaResult<Option<Vec<u8>>> {
        if self.next >= self.frames {
            return Ok(None);
        }
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }
        self.next += 1;
        Ok(Some(vec![(self.next - 1) as u8]))
    }

    async fn begin_segment(&mut self) -> MediaResult<()> {
        self.segment.clear();
        Ok(())
    }

    async fn encode(&mut self, frame: &Frame) -> MediaResult<()> {
        let call = {
            let mut encoded = self.stats.encoded.lock().unwrap();
            encoded.push(frame.index);
            encoded.len()
        };
        if self.fail_encode_call == Some(call) {
            return Err(MediaError::encode("NVENC session lost"));
        }
        self.segment.extend_from_slice(&frame.data);
        Ok(())
    }

    async fn finish_segment(&mut self) -> MediaResult<Vec<u8>> {
        Ok(std::mem::take(&mut self.segment))
    }

    fn close_source(&mut self) {
        if self.open {
            self.open = false;
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&mut self) {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct SyntheticEngineFactory {
    pub stats: Arc<EngineStats>,
    pub fail_init: bool,
    /// 1-based encode call, counted across every backend, that fails
    pub fail_encode_call: Option<usize>,
    pub frame_delay: Duration,
}

impl SyntheticEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn with_encode_failure_on_call(mut self, call: usize) -> Self {
        self.fail_encode_call = Some(call);
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }
}

#[async_trait]
impl EngineFactory for SyntheticEngineFactory {
    async fn create(&self) -> MediaResult<EngineHandle> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        let backend = SyntheticBackend {
            stats: Arc::clone(&self.stats),
            fail_init: self.fail_init,
            fail_encode_call: self.fail_encode_call,
            frame_delay: self.frame_delay,
            frames: 0,
            next: 0,
            segment: Vec::new(),
            open: false,
        };
        Ok(EngineHandle::new(Box::new(backend), 0))
    }
}

/// Directory layout for one batch under a temp dir.
pub struct Fixture {
    pub root: PathBuf,
    pub clip_dir: PathBuf,
    pub output_root: PathBuf,
    pub work_root: PathBuf,
}

impl Fixture {
    pub fn new(root: &Path) -> Self {
        let fixture = Self {
            root: root.to_path_buf(),
            clip_dir: root.join("clips"),
            output_root: root.join("out"),
            work_root: root.join("work"),
        };
        std::fs::create_dir_all(&fixture.clip_dir).unwrap();
        fixture
    }

    pub fn manifest(&self, video_id: &str, contents: &str) {
        std::fs::write(self.clip_dir.join(format!("{}.txt", video_id)), contents).unwrap();
    }

    pub fn jobs(&self, identifiers: &[&str]) -> Vec<Job> {
        Job::from_lines(identifiers.iter().copied(), &self.output_root)
    }

    /// Files left in any worker scratch directory.
    pub fn leftover_sources(&self) -> Vec<PathBuf> {
        walk(&self.work_root)
    }
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}

/// Retry policy with no backoff.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new("fetch")
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::ZERO)
}

pub fn clip_pipeline(downloader: Arc<FakeDownloader>, fixture: &Fixture) -> JobPipeline {
    let fetch = FetchAdapter::new(downloader, fast_retry(3));
    JobPipeline::new(
        fetch,
        3,
        PipelineMode::Clip(ClipManifestReader::new(
            &fixture.clip_dir,
            ManifestPolicy::Strict,
        )),
    )
}

pub fn coordinator(
    pipeline: JobPipeline,
    strategy: EngineStrategy,
    fixture: &Fixture,
) -> BatchCoordinator {
    BatchCoordinator::new(pipeline, strategy, &fixture.work_root)
}
