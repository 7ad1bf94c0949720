//! Splitting a job list into per-worker shards.

use serde::{Deserialize, Serialize};

use vstream_models::{Job, WorkerShard};

use crate::error::{WorkerError, WorkerResult};

/// Shard shape.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum PartitionLayout {
    /// Shard sizes differ by at most one
    #[default]
    Balanced,
    /// Every shard holds `ceil(N/W)` jobs except possibly the last
    Chunked,
}

/// Split `jobs` into at most `workers` contiguous, non-empty shards.
///
/// Concatenating the shards in order reproduces `jobs`. Worker ids are
/// assigned `0..` in shard order.
pub fn partition(
    jobs: Vec<Job>,
    workers: usize,
    layout: PartitionLayout,
) -> WorkerResult<Vec<WorkerShard>> {
    if workers == 0 {
        return Err(WorkerError::invalid_config("worker count must be at least 1"));
    }

    let sizes = shard_sizes(jobs.len(), workers, layout);
    let mut remaining = jobs.into_iter();
    let shards = sizes
        .into_iter()
        .enumerate()
        .map(|(worker_id, size)| WorkerShard {
            worker_id,
            jobs: remaining.by_ref().take(size).collect(),
        })
        .collect();

    Ok(shards)
}

/// Non-zero shard sizes for `total` jobs over `workers` workers.
fn shard_sizes(total: usize, workers: usize, layout: PartitionLayout) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }

    match layout {
        PartitionLayout::Balanced => {
            let base = total / workers;
            let extra = total % workers;
            (0..workers)
                .map(|i| base + usize::from(i < extra))
                .filter(|&size| size > 0)
                .collect()
        }
        PartitionLayout::Chunked => {
            let chunk = total.div_ceil(workers);
            let mut sizes = Vec::with_capacity(workers);
            let mut left = total;
            while left > 0 {
                let size = chunk.min(left);
                sizes.push(size);
                left -= size;
            }
            sizes
        }
    }
}
