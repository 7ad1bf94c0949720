//! Fetch adapter: bounded retries around a [`Downloader`].
//!
//! Every attempt snapshots the destination directory, runs the downloader,
//! and then looks for the video file the attempt produced. The adapter never
//! returns an error: exhausted attempts become `FetchResult::Failure`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use vstream_media::fs_utils::is_video_file;
use vstream_media::Downloader;
use vstream_models::{requested_video_id, FetchFailure, FetchResult, VideoId};

use crate::metrics;
use crate::retry::{retry_async, RetryPolicy, RetryResult};

/// Retries a [`Downloader`] and locates its output.
#[derive(Clone)]
pub struct FetchAdapter {
    downloader: Arc<dyn Downloader>,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl FetchAdapter {
    pub fn new(downloader: Arc<dyn Downloader>, policy: RetryPolicy) -> Self {
        Self {
            downloader,
            policy,
            attempt_timeout: None,
        }
    }

    /// Bound each attempt, in addition to the downloader's own timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `identifier` into `dest_dir`, making at most `max_attempts` attempts.
    pub async fn fetch(&self, identifier: &str, dest_dir: &Path, max_attempts: u32) -> FetchResult {
        let policy = self.policy.clone().with_max_attempts(max_attempts);
        let requested = requested_video_id(identifier);

        let result = retry_async(&policy, |attempt| {
            self.attempt(identifier, dest_dir, requested.as_deref(), attempt)
        })
        .await;

        match result {
            RetryResult::Success {
                value: (local_path, resolved_id),
                attempts,
            } => {
                info!(
                    identifier,
                    resolved_id = %resolved_id,
                    attempts,
                    "Fetched {}",
                    local_path.display()
                );
                FetchResult::Success {
                    local_path,
                    resolved_id,
                    attempts,
                }
            }
            RetryResult::Failed { error, attempts } => {
                warn!(identifier, attempts, "Download exhausted: {}", error);
                FetchResult::Failure {
                    reason: FetchFailure::DownloadExhausted {
                        attempts,
                        last_error: error,
                    },
                }
            }
        }
    }

    async fn attempt(
        &self,
        identifier: &str,
        dest_dir: &Path,
        requested: Option<&str>,
        attempt: u32,
    ) -> Result<(PathBuf, VideoId), String> {
        let outcome = self.attempt_inner(identifier, dest_dir, requested).await;
        metrics::record_fetch_attempt(outcome.is_ok());
        if let Err(ref e) = outcome {
            debug!(identifier, attempt, "Fetch attempt failed: {}", e);
        }
        outcome
    }

    async fn attempt_inner(
        &self,
        identifier: &str,
        dest_dir: &Path,
        requested: Option<&str>,
    ) -> Result<(PathBuf, VideoId), String> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| format!("cannot create {}: {}", dest_dir.display(), e))?;

        let before: HashSet<PathBuf> = video_files(dest_dir)
            .await
            .map_err(|e| format!("cannot scan {}: {}", dest_dir.display(), e))?
            .into_iter()
            .map(|(path, _)| path)
            .collect();

        let download = self.downloader.download(identifier, dest_dir);
        match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, download).await {
                Ok(result) => result.map_err(|e| e.to_string())?,
                Err(_) => return Err(format!("attempt timed out after {:?}", limit)),
            },
            None => download.await.map_err(|e| e.to_string())?,
        }

        let after = video_files(dest_dir)
            .await
            .map_err(|e| format!("cannot scan {}: {}", dest_dir.display(), e))?;

        let local_path = pick_output(&before, after, requested).ok_or_else(|| {
            "downloader reported success but produced no video file".to_string()
        })?;
        let resolved_id = resolve_id(&local_path)
            .ok_or_else(|| format!("cannot derive an id from {}", local_path.display()))?;

        Ok((local_path, resolved_id))
    }
}

/// Choose the file an attempt produced.
///
/// New files win, preferring one named after the requested id, then the most
/// recently modified. With no new file, an existing file named after the
/// requested id counts: the downloader never overwrites, so a re-fetch of an
/// id already on disk succeeds without writing.
fn pick_output(
    before: &HashSet<PathBuf>,
    after: Vec<(PathBuf, SystemTime)>,
    requested: Option<&str>,
) -> Option<PathBuf> {
    let matches_requested = |path: &Path| {
        requested.is_some() && resolve_id(path).as_ref().map(VideoId::as_str) == requested
    };

    let (fresh, existing): (Vec<_>, Vec<_>) =
        after.into_iter().partition(|(path, _)| !before.contains(path));

    if let Some((path, _)) = fresh.iter().find(|(path, _)| matches_requested(path.as_path())) {
        return Some(path.clone());
    }
    if let Some((path, _)) = fresh.iter().max_by_key(|(_, modified)| *modified) {
        return Some(path.clone());
    }
    existing
        .into_iter()
        .find(|(path, _)| matches_requested(path.as_path()))
        .map(|(path, _)| path)
}

fn resolve_id(path: &Path) -> Option<VideoId> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(VideoId::from)
}

async fn video_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, SystemTime)>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_video_file(&path) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            files.push((path, metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use vstream_media::{MediaError, MediaResult};

    /// Fails the first `failures` calls, then writes `{id}.mp4`.
    struct FlakyDownloader {
        failures: u32,
        calls: AtomicU32,
        write_file: bool,
    }

    impl FlakyDownloader {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                write_file: true,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Downloader for FlakyDownloader {
        async fn download(&self, identifier: &str, dest_dir: &Path) -> MediaResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(MediaError::download_failed(format!("HTTP 503 on call {}", call + 1)));
            }
            if self.write_file {
                tokio::fs::write(dest_dir.join(format!("{}.mp4", identifier)), b"video").await?;
            }
            Ok(())
        }
    }

    fn adapter(downloader: Arc<FlakyDownloader>) -> FetchAdapter {
        FetchAdapter::new(
            downloader,
            RetryPolicy::new("fetch").with_base_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_success_after_k_failures() {
        for k in 0..4 {
            let dir = TempDir::new().unwrap();
            let downloader = Arc::new(FlakyDownloader::new(k));
            let result = adapter(Arc::clone(&downloader))
                .fetch("abc", dir.path(), 5)
                .await;

            match result {
                FetchResult::Success {
                    local_path,
                    resolved_id,
                    attempts,
                } => {
                    assert_eq!(attempts, k + 1);
                    assert_eq!(resolved_id.as_str(), "abc");
                    assert_eq!(local_path, dir.path().join("abc.mp4"));
                }
                other => panic!("k={} unexpected {:?}", k, other),
            }
            assert_eq!(downloader.calls(), k + 1);
        }
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        for k in [3, 4, 10] {
            let dir = TempDir::new().unwrap();
            let downloader = Arc::new(FlakyDownloader::new(k));
            let result = adapter(Arc::clone(&downloader))
                .fetch("abc", dir.path(), 3)
                .await;

            match result {
                FetchResult::Failure {
                    reason: FetchFailure::DownloadExhausted { attempts, last_error },
                } => {
                    assert_eq!(attempts, 3);
                    assert!(last_error.contains("call 3"), "{}", last_error);
                }
                other => panic!("k={} unexpected {:?}", k, other),
            }
            assert_eq!(downloader.calls(), 3);
        }
    }

    #[tokio::test]
    async fn test_success_without_file_is_retried() {
        let dir = TempDir::new().unwrap();
        let downloader = Arc::new(FlakyDownloader {
            write_file: false,
            ..FlakyDownloader::new(0)
        });
        let result = adapter(Arc::clone(&downloader))
            .fetch("abc", dir.path(), 2)
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts(), 2);
        assert_eq!(downloader.calls(), 2);
    }

    #[tokio::test]
    async fn test_existing_file_for_requested_id_is_reused() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("abc.mp4"), b"old").await.unwrap();
        tokio::fs::write(dir.path().join("other.mp4"), b"old").await.unwrap();

        let downloader = Arc::new(FlakyDownloader {
            write_file: false,
            ..FlakyDownloader::new(0)
        });
        let result = adapter(downloader).fetch("abc", dir.path(), 1).await;

        match result {
            FetchResult::Success { resolved_id, .. } => assert_eq!(resolved_id.as_str(), "abc"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolved_id_comes_from_file_name() {
        struct Renaming;

        #[async_trait]
        impl Downloader for Renaming {
            async fn download(&self, _identifier: &str, dest_dir: &Path) -> MediaResult<()> {
                tokio::fs::write(dest_dir.join("dQw4w9WgXcQ.webm"), b"video").await?;
                tokio::fs::write(dest_dir.join("dQw4w9WgXcQ.webm.part"), b"").await?;
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let adapter = FetchAdapter::new(Arc::new(Renaming), RetryPolicy::new("fetch"));
        let result = adapter
            .fetch("https://example.com/watch/42", dir.path(), 1)
            .await;

        match result {
            FetchResult::Success { resolved_id, local_path, .. } => {
                assert_eq!(resolved_id.as_str(), "dQw4w9WgXcQ");
                assert_eq!(local_path.extension().unwrap(), "webm");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        struct Hanging;

        #[async_trait]
        impl Downloader for Hanging {
            async fn download(&self, _identifier: &str, _dest_dir: &Path) -> MediaResult<()> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let adapter = FetchAdapter::new(
            Arc::new(Hanging),
            RetryPolicy::new("fetch").with_base_delay(Duration::from_millis(1)),
        )
        .with_attempt_timeout(Duration::from_millis(20));

        let result = adapter.fetch("abc", dir.path(), 2).await;
        assert!(!result.is_success());
        assert_eq!(result.attempts(), 2);
    }
}
