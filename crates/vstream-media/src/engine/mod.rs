//! Decode/encode engine session.
//!
//! An [`EngineHandle`] owns one backend bound to one device. The handle
//! enforces the session protocol:
//!
//! - `initialize` runs at most once per handle.
//! - One [`SourceSession`] at a time (it mutably borrows the handle). The
//!   session releases the backend's per-source state when it is dropped, so
//!   every exit path closes the source exactly once.
//! - Within a session an encode segment is either armed (begun) or not;
//!   `encode` and `finish_segment` require an armed segment.
//! - `shutdown` releases the device exactly once, also runs on drop, and is
//!   safe on a handle that never initialized.
//!
//! Backends implement [`DecodeEncodeBackend`]; the hardware and software
//! variants live in [`ffmpeg`]. Tests plug in synthetic backends.

pub mod ffmpeg;

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

use vstream_models::{EngineConfig, EngineKind};

use crate::error::{MediaError, MediaResult};

pub use ffmpeg::{FfmpegBackend, FfmpegVariant};

/// One decoded frame. `index` counts frames from the start of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: u64,
    pub data: Vec<u8>,
}

/// The decode/encode capability behind an [`EngineHandle`].
///
/// Implementations are driven only through the handle, which guarantees the
/// call order described in the module docs.
#[async_trait]
pub trait DecodeEncodeBackend: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Extension of the artifacts `finish_segment` produces.
    fn artifact_extension(&self) -> &str;

    /// Bind the device context and create decode/encode streams.
    async fn initialize(&mut self, device_id: u32) -> MediaResult<()>;

    /// Start decoding `path` from its first frame.
    async fn open_source(&mut self, path: &Path) -> MediaResult<()>;

    /// Decode the next frame, `None` at end of stream.
    async fn decode_next(&mut self) -> MediaResult<Option<Vec<u8>>>;

    /// Open a new encode segment.
    async fn begin_segment(&mut self) -> MediaResult<()>;

    /// Feed one frame to the open segment.
    async fn encode(&mut self, frame: &Frame) -> MediaResult<()>;

    /// Close the open segment and return its encoded bytes.
    async fn finish_segment(&mut self) -> MediaResult<Vec<u8>>;

    /// Release per-source decode state and abandon any open segment.
    fn close_source(&mut self);

    /// Release the device context. Must tolerate a never-initialized backend.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Created,
    Ready,
    ShutDown,
}

/// Exclusive owner of one decode/encode backend and its device binding.
pub struct EngineHandle {
    backend: Box<dyn DecodeEncodeBackend>,
    device_id: u32,
    state: HandleState,
    init_attempted: bool,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("backend", &self.backend.name())
            .field("device_id", &self.device_id)
            .field("state", &self.state)
            .finish()
    }
}

impl EngineHandle {
    pub fn new(backend: Box<dyn DecodeEncodeBackend>, device_id: u32) -> Self {
        Self {
            backend,
            device_id,
            state: HandleState::Created,
            init_attempted: false,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn artifact_extension(&self) -> &str {
        self.backend.artifact_extension()
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn is_ready(&self) -> bool {
        self.state == HandleState::Ready
    }

    pub fn is_shut_down(&self) -> bool {
        self.state == HandleState::ShutDown
    }

    /// Bind the device. Allowed once per handle, even if the first call failed.
    pub async fn initialize(&mut self) -> MediaResult<()> {
        if self.init_attempted {
            return Err(MediaError::protocol("initialize called more than once"));
        }
        if self.state == HandleState::ShutDown {
            return Err(MediaError::protocol("initialize called after shutdown"));
        }
        self.init_attempted = true;

        match self.backend.initialize(self.device_id).await {
            Ok(()) => {
                self.state = HandleState::Ready;
                info!(
                    backend = self.backend.name(),
                    device_id = self.device_id,
                    "Decode/encode engine initialized"
                );
                Ok(())
            }
            Err(MediaError::EngineInit(message)) => Err(MediaError::EngineInit(message)),
            Err(e) => Err(MediaError::engine_init(e.to_string())),
        }
    }

    /// Begin a frame-sequential decode session over one source file.
    pub async fn open_source(&mut self, path: &Path) -> MediaResult<SourceSession<'_>> {
        if self.state != HandleState::Ready {
            return Err(MediaError::protocol(format!(
                "cannot open a source on a {:?} engine",
                self.state
            )));
        }
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        if let Err(e) = self.backend.open_source(path).await {
            // Partial decoder state must not leak into the next job
            self.backend.close_source();
            return Err(e);
        }

        debug!(source = %path.display(), "Source session opened");
        Ok(SourceSession {
            handle: self,
            frames_decoded: 0,
            armed: false,
            closed: false,
        })
    }

    /// Release the device. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == HandleState::ShutDown {
            return;
        }
        let was_ready = self.state == HandleState::Ready;
        self.backend.shutdown();
        self.state = HandleState::ShutDown;

        if was_ready {
            info!(
                backend = self.backend.name(),
                device_id = self.device_id,
                "Decode/encode engine shut down"
            );
        } else {
            debug!(
                backend = self.backend.name(),
                "Shut down engine that never initialized"
            );
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A decode session over one source file. Closes the source when dropped.
pub struct SourceSession<'a> {
    handle: &'a mut EngineHandle,
    frames_decoded: u64,
    armed: bool,
    closed: bool,
}

impl SourceSession<'_> {
    /// Decode the next frame in order, `None` once the source is exhausted.
    pub async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        match self.handle.backend.decode_next().await? {
            Some(data) => {
                let frame = Frame {
                    index: self.frames_decoded,
                    data,
                };
                self.frames_decoded += 1;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    pub async fn begin_segment(&mut self) -> MediaResult<()> {
        if self.armed {
            return Err(MediaError::protocol("segment already open"));
        }
        self.handle.backend.begin_segment().await?;
        self.armed = true;
        Ok(())
    }

    pub async fn encode(&mut self, frame: &Frame) -> MediaResult<()> {
        if !self.armed {
            return Err(MediaError::protocol("encode without an open segment"));
        }
        self.handle.backend.encode(frame).await
    }

    pub async fn finish_segment(&mut self) -> MediaResult<Vec<u8>> {
        if !self.armed {
            return Err(MediaError::protocol("finish without an open segment"));
        }
        self.armed = false;
        self.handle.backend.finish_segment().await
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn artifact_extension(&self) -> &str {
        self.handle.backend.artifact_extension()
    }

    /// Close the source now instead of at drop.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        if self.armed {
            warn!("Closing source with an unfinished segment; segment discarded");
            self.armed = false;
        }
        self.handle.backend.close_source();
        self.closed = true;
    }
}

impl Drop for SourceSession<'_> {
    fn drop(&mut self) {
        self.close_inner();
    }
}

/// Creates engine handles; called once per isolated worker, or once per
/// batch for the shared model.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Select a backend and wrap it in an uninitialized handle.
    async fn create(&self) -> MediaResult<EngineHandle>;
}

/// Factory for the FFmpeg hardware/software backends.
#[derive(Debug, Clone)]
pub struct FfmpegEngineFactory {
    config: EngineConfig,
}

impl FfmpegEngineFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Resolve `Auto` to a concrete variant by probing FFmpeg's hwaccels.
    async fn resolve_variant(&self) -> FfmpegVariant {
        match self.config.kind {
            EngineKind::Hardware => FfmpegVariant::Hardware,
            EngineKind::Software => FfmpegVariant::Software,
            EngineKind::Auto => {
                if ffmpeg::cuda_hwaccel_available().await {
                    info!("CUDA hwaccel available, using hardware engine");
                    FfmpegVariant::Hardware
                } else {
                    warn!("CUDA hwaccel unavailable, falling back to software engine");
                    FfmpegVariant::Software
                }
            }
        }
    }
}

#[async_trait]
impl EngineFactory for FfmpegEngineFactory {
    async fn create(&self) -> MediaResult<EngineHandle> {
        let variant = self.resolve_variant().await;
        let backend = FfmpegBackend::new(variant, self.config.geometry);
        Ok(EngineHandle::new(Box::new(backend), self.config.device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct Calls {
        initialize: u32,
        close_source: u32,
        shutdown: u32,
        encoded: Vec<u64>,
    }

    struct CountingBackend {
        calls: Arc<Mutex<Calls>>,
        frames: u64,
        next: u64,
        fail_init: bool,
    }

    impl CountingBackend {
        fn new(frames: u64, fail_init: bool) -> (Self, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            (
                Self {
                    calls: Arc::clone(&calls),
                    frames,
                    next: 0,
                    fail_init,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl DecodeEncodeBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn artifact_extension(&self) -> &str {
            "bin"
        }

        async fn initialize(&mut self, _device_id: u32) -> MediaResult<()> {
            self.calls.lock().unwrap().initialize += 1;
            if self.fail_init {
                return Err(MediaError::decode("no device"));
            }
            Ok(())
        }

        async fn open_source(&mut self, _path: &Path) -> MediaResult<()> {
            self.next = 0;
            Ok(())
        }

        async fn decode_next(&mut self) -> MediaResult<Option<Vec<u8>>> {
            if self.next >= self.frames {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(vec![0u8; 4]))
        }

        async fn begin_segment(&mut self) -> MediaResult<()> {
            Ok(())
        }

        async fn encode(&mut self, frame: &Frame) -> MediaResult<()> {
            self.calls.lock().unwrap().encoded.push(frame.index);
            Ok(())
        }

        async fn finish_segment(&mut self) -> MediaResult<Vec<u8>> {
            Ok(b"segment".to_vec())
        }

        fn close_source(&mut self) {
            self.calls.lock().unwrap().close_source += 1;
        }

        fn shutdown(&mut self) {
            self.calls.lock().unwrap().shutdown += 1;
        }
    }

    fn source_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("src.mp4");
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[tokio::test]
    async fn test_initialize_at_most_once() {
        let (backend, calls) = CountingBackend::new(0, false);
        let mut handle = EngineHandle::new(Box::new(backend), 0);

        handle.initialize().await.unwrap();
        let second = handle.initialize().await;

        assert!(matches!(second, Err(MediaError::EngineProtocol(_))));
        assert_eq!(calls.lock().unwrap().initialize, 1);
    }

    #[tokio::test]
    async fn test_init_failure_maps_to_engine_init() {
        let (backend, calls) = CountingBackend::new(0, true);
        let mut handle = EngineHandle::new(Box::new(backend), 2);

        let result = handle.initialize().await;
        assert!(matches!(result, Err(MediaError::EngineInit(_))));
        assert!(!handle.is_ready());

        drop(handle);
        assert_eq!(calls.lock().unwrap().shutdown, 1);
    }

    #[tokio::test]
    async fn test_shutdown_idempotent_and_on_drop() {
        let (backend, calls) = CountingBackend::new(0, false);
        let mut handle = EngineHandle::new(Box::new(backend), 0);
        handle.initialize().await.unwrap();
        assert_eq!(handle.backend_name(), "counting");

        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_shut_down());
        assert!(!handle.is_ready());
        drop(handle);

        assert_eq!(calls.lock().unwrap().shutdown, 1);
    }

    #[tokio::test]
    async fn test_never_initialized_handle_shuts_down_once() {
        let (backend, calls) = CountingBackend::new(0, false);
        drop(EngineHandle::new(Box::new(backend), 0));

        assert_eq!(calls.lock().unwrap().shutdown, 1);
        assert_eq!(calls.lock().unwrap().initialize, 0);
    }

    #[tokio::test]
    async fn test_open_source_requires_initialize() {
        let dir = TempDir::new().unwrap();
        let path = source_file(&dir);
        let (backend, _calls) = CountingBackend::new(3, false);
        let mut handle = EngineHandle::new(Box::new(backend), 0);

        let result = handle.open_source(&path).await;
        assert!(matches!(result, Err(MediaError::EngineProtocol(_))));
    }

    #[tokio::test]
    async fn test_session_closes_once_on_every_path() {
        let dir = TempDir::new().unwrap();
        let path = source_file(&dir);
        let (backend, calls) = CountingBackend::new(3, false);
        let mut handle = EngineHandle::new(Box::new(backend), 0);
        handle.initialize().await.unwrap();

        // Explicit close
        let session = handle.open_source(&path).await.unwrap();
        session.close();
        assert_eq!(calls.lock().unwrap().close_source, 1);

        // Early exit through an error leaves the session to drop
        let result: MediaResult<()> = async {
            let mut session = handle.open_source(&path).await?;
            let frame = session.next_frame().await?.unwrap();
            session.encode(&frame).await?;
            Ok(())
        }
        .await;
        assert!(matches!(result, Err(MediaError::EngineProtocol(_))));
        assert_eq!(calls.lock().unwrap().close_source, 2);
        assert!(calls.lock().unwrap().encoded.is_empty());
    }

    #[tokio::test]
    async fn test_frames_are_indexed_in_order() {
        let dir = TempDir::new().unwrap();
        let path = source_file(&dir);
        let (backend, calls) = CountingBackend::new(3, false);
        let mut handle = EngineHandle::new(Box::new(backend), 0);
        handle.initialize().await.unwrap();

        let mut session = handle.open_source(&path).await.unwrap();
        session.begin_segment().await.unwrap();
        assert!(matches!(
            session.begin_segment().await,
            Err(MediaError::EngineProtocol(_))
        ));
        while let Some(frame) = session.next_frame().await.unwrap() {
            session.encode(&frame).await.unwrap();
        }
        assert_eq!(session.finish_segment().await.unwrap(), b"segment".to_vec());
        assert_eq!(session.frames_decoded(), 3);
        drop(session);

        assert_eq!(calls.lock().unwrap().encoded, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_missing_source_is_file_not_found() {
        let (backend, calls) = CountingBackend::new(3, false);
        let mut handle = EngineHandle::new(Box::new(backend), 0);
        handle.initialize().await.unwrap();

        let result = handle.open_source(Path::new("/nonexistent/src.mp4")).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
        assert_eq!(calls.lock().unwrap().close_source, 0);
    }
}
