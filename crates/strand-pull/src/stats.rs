//! Pull progress counters and the snapshot reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A point-in-time view of a pull's progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// `get_many` round trips that returned.
    pub fetch_batches: u64,
    pub chunks_fetched: u64,
    pub bytes_fetched: u64,
    /// Addresses the sink already had.
    pub chunks_skipped: u64,
    pub chunks_written: u64,
    pub bytes_written: u64,
    pub packs_staged: u64,
    pub fetch_retries: u64,
}

/// Shared counters behind [`Stats`], updated by every pull task.
#[derive(Debug, Default)]
pub struct PullProgress {
    fetch_batches: AtomicU64,
    chunks_fetched: AtomicU64,
    bytes_fetched: AtomicU64,
    chunks_skipped: AtomicU64,
    chunks_written: AtomicU64,
    bytes_written: AtomicU64,
    packs_staged: AtomicU64,
    fetch_retries: AtomicU64,
}

impl PullProgress {
    pub fn snapshot(&self) -> Stats {
        Stats {
            fetch_batches: self.fetch_batches.load(Ordering::Relaxed),
            chunks_fetched: self.chunks_fetched.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            packs_staged: self.packs_staged.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_fetch(&self, chunks: u64, bytes: u64) {
        self.fetch_batches.fetch_add(1, Ordering::Relaxed);
        self.chunks_fetched.fetch_add(chunks, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self, chunks: u64) {
        self.chunks_skipped.fetch_add(chunks, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, chunks: u64, bytes: u64) {
        self.chunks_written.fetch_add(chunks, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_pack(&self) {
        self.packs_staged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Send a snapshot every `interval` until `stop` fires.
///
/// Snapshots are offered with `try_send`: a slow receiver misses
/// intermediate snapshots instead of stalling the pull.
pub(crate) async fn report_stats(
    progress: std::sync::Arc<PullProgress>,
    tx: mpsc::Sender<Stats>,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(progress.snapshot()) {
                    break;
                }
            }
        }
    }
}
