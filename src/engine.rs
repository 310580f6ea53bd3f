//! The compaction engine: a dirty-row queue, a background flush worker and
//! the per-row read-merge-write-delete pipelines.
//!
//! Writers call [`CompactionEngine::enqueue`] for every row they touch. The
//! flush worker wakes on a fixed interval, sizes a batch proportional to the
//! queue depth and walks the queue in key order, compacting every row whose
//! base time has aged past the cutoff. Within a row the pipeline is strictly
//! ordered (the originals are only deleted once the canonical cell is
//! written); across rows everything runs concurrently up to the configured
//! cap.

use std::cmp::min;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence::StatsdClient;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Notify;

use crate::annotation::Annotation;
use crate::errors::Result;
use crate::merge::{merge, MergeOutcome};
use crate::metric_name::MetricName;
use crate::metrics::StatsdClientExt;
use crate::queue::DirtyQueue;
use crate::settings::Settings;
use crate::store::{Cell, RowKey, StoreClient, StoreError};
use crate::util::sec_since_epoch;

/// How many failures of one RPC kind pass between log lines.
const LOG_EVERY: u64 = 100;
/// Backoff before respawning a panicked flush worker.
const RESPAWN_BACKOFF: Duration = Duration::from_secs(1);

/// Counts failures of one store RPC kind and rate-limits their logging.
///
/// The count is a relaxed increment; an approximate rate is all the log
/// limiter needs.
struct RpcErrorHandler {
    name: &'static str,
    errors: AtomicU64,
}

impl RpcErrorHandler {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            errors: AtomicU64::new(0),
        }
    }

    /// React to a store error. Returns true when the error was absorbed: a
    /// throttle signal whose row went back on the queue counts as a
    /// successful pipeline completion.
    fn handle(&self, err: &StoreError, queue: &DirtyQueue, metrics: &StatsdClient) -> bool {
        if let StoreError::Throttle(rpc) = err {
            if let Some(row_key) = rpc.row_key() {
                debug!("Store throttled a {}; re-queueing row", self.name; "row" => %row_key);
                queue.enqueue(row_key.clone());
                metrics
                    .incr_with_tags(MetricName::CompactionRequeues)
                    .with_tag("rpc", self.name)
                    .send();
                return true;
            }
            // nothing to requeue; the next writer to touch the row will
            // re-dirty it
            warn!(
                "Store throttled a {} with no recoverable row key; row lost from this pass",
                self.name
            );
            metrics
                .incr_with_tags(MetricName::CompactionThrottleDropped)
                .with_tag("rpc", self.name)
                .send();
            return false;
        }
        let count = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
        if count % LOG_EVERY == 1 {
            error!("Store {} failure (seen {}): {}", self.name, count, err);
        }
        metrics
            .incr_with_tags(MetricName::CompactionErrors)
            .with_tag("rpc", self.name)
            .send();
        false
    }

    #[cfg(test)]
    fn count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

struct RpcErrors {
    read: RpcErrorHandler,
    put: RpcErrorHandler,
    delete: RpcErrorHandler,
}

impl RpcErrors {
    const fn new() -> Self {
        Self {
            read: RpcErrorHandler::new("read"),
            put: RpcErrorHandler::new("put"),
            delete: RpcErrorHandler::new("delete"),
        }
    }
}

/// Handle to the row compaction engine.
///
/// Cheap to clone; clones share the queue, the store client and the
/// counters.
#[derive(Clone)]
pub struct CompactionEngine {
    settings: Settings,
    store: Box<dyn StoreClient>,
    queue: Arc<DirtyQueue>,
    metrics: Arc<StatsdClient>,
    handlers: Arc<RpcErrors>,
    shutdown: Arc<Notify>,
}

impl CompactionEngine {
    pub fn new(settings: Settings, store: Box<dyn StoreClient>, metrics: Arc<StatsdClient>) -> Self {
        let queue = Arc::new(DirtyQueue::new(settings.metric_width));
        Self {
            settings,
            store,
            queue,
            metrics,
            handlers: Arc::new(RpcErrors::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Mark a row dirty. Called by writers on every datapoint put;
    /// idempotent and safe from any thread.
    pub fn enqueue(&self, row_key: RowKey) -> bool {
        self.queue.enqueue(row_key)
    }

    /// The approximate number of rows waiting for compaction.
    pub fn queue_size(&self) -> usize {
        self.queue.approx_size()
    }

    /// Drop all queued compaction debt. Operator escape hatch under memory
    /// pressure: writers re-dirty any row that still matters.
    pub fn drop_queue(&self) -> usize {
        let dropped = self.queue.clear();
        warn!("Dropped {} queued rows", dropped);
        dropped
    }

    /// Merge the cells of one row in memory and collect its annotations.
    /// Used by read paths that want the merged view; never touches the
    /// store.
    pub fn compact(&self, cells: &[Cell], annotations: &mut Vec<Annotation>) -> Result<Option<Cell>> {
        let mut row = merge(cells)?;
        annotations.append(&mut row.annotations);
        Ok(row.cell)
    }

    /// Emit the on-demand gauges. Counters are emitted at the point of the
    /// event; only the queue depth needs polling.
    pub fn collect_stats(&self) {
        self.metrics
            .gauge_with_tags(MetricName::CompactionQueueSize, self.queue.approx_size() as u64)
            .send();
    }

    /// Emit the queue gauges periodically.
    pub fn spawn_queue_size_reporter(&self, interval: Duration) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                engine.collect_stats();
                tokio::time::sleep(interval).await;
            }
        });
    }

    /// Start the background flush worker, supervised: a panicked worker is
    /// isolated from the shared state and respawned after a short backoff.
    pub fn spawn_flush_worker(&self) {
        if !self.settings.enable_compactions {
            info!("Compactions disabled; flush worker not started");
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let worker = engine.clone();
                let handle = tokio::spawn(async move { worker.run_flush_loop().await });
                match handle.await {
                    Ok(()) => break,
                    Err(e) if e.is_panic() => {
                        error!("Flush worker panicked; respawning after backoff");
                        tokio::time::sleep(RESPAWN_BACKOFF).await;
                    }
                    Err(_) => break,
                }
            }
        });
    }

    /// Stop the flush worker and run one final best-effort flush of every
    /// currently aging row.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        self.shutdown.notify_one();
        if let Err(e) = self.flush().await {
            error!("Final flush on shutdown failed: {}", e);
        }
    }

    /// Force a flush of all currently aging rows, with an unbounded budget.
    pub async fn flush(&self) -> Result<()> {
        let cutoff = self.settings.cutoff(sec_since_epoch());
        self.flush_batch(cutoff, usize::MAX).await
    }

    async fn run_flush_loop(&self) {
        info!("Starting compaction flush worker"; "interval" => ?self.settings.flush_interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.flush_interval) => {}
                _ = self.shutdown.notified() => {
                    debug!("Flush worker interrupted");
                    return;
                }
            }
            let size = self.queue.approx_size();
            self.collect_stats();
            if size <= self.settings.min_flush_threshold {
                continue;
            }
            // Sized to drain `size` rows within max_timespan / flush_speed
            // wall seconds, which keeps compaction ahead of the next row
            // generation's writes.
            let maxflushes = std::cmp::max(
                self.settings.min_flush_threshold,
                (size as u64 * self.settings.flush_interval.as_secs() * self.settings.flush_speed
                    / self.settings.max_timespan) as usize,
            );
            let cutoff = self.settings.cutoff(sec_since_epoch());
            trace!("Flush tick"; "queued" => size, "maxflushes" => maxflushes);
            if let Err(e) = self.flush_batch(cutoff, maxflushes).await {
                error!("Flush batch failed: {}", e);
            }
        }
    }

    /// Claim up to `max` aging rows and run their pipelines, at most
    /// `max_concurrent_flushes` in flight at a time. When the concurrency
    /// cap is the binding limit and budget remains, the store gets a flush
    /// hint so the next wave is not stuck behind batched RPCs.
    pub async fn flush_batch(&self, cutoff: u32, mut max: usize) -> Result<()> {
        loop {
            max = min(max, self.queue.approx_size());
            if max == 0 {
                return Ok(());
            }
            let budget = min(max, self.settings.max_concurrent_flushes);
            let claimed = self.queue.claim_batch(cutoff, budget);
            if claimed.is_empty() {
                return Ok(());
            }
            let n = claimed.len();

            let mut pipelines: FuturesUnordered<_> = claimed
                .into_iter()
                .map(|key| self.compact_row(key, cutoff))
                .collect();
            while let Some(result) = pipelines.next().await {
                // failures were already counted and logged; a bad row must
                // not stall the batch
                if let Err(e) = result {
                    trace!("Row pipeline failed: {}", e);
                }
            }

            max = max.saturating_sub(n);
            if n == budget && max > 0 {
                self.store.flush_hint();
            }
        }
    }

    /// One row's pipeline: read, merge, write the canonical cell, delete the
    /// merged originals. Strictly ordered; the deletes only run after a
    /// successful put.
    async fn compact_row(&self, key: RowKey, cutoff: u32) -> Result<()> {
        let cells = match self.store.get(&key).await {
            Ok(cells) => cells,
            Err(e) => {
                if self.handlers.read.handle(&e, &self.queue, &self.metrics) {
                    return Ok(());
                }
                return Err(e.into());
            }
        };

        let row = match merge(&cells) {
            Ok(row) => row,
            Err(e) => {
                // corrupt data needs an operator; re-enqueueing would just
                // spin on it
                error!("Not compacting corrupt row"; "row" => %key, "error" => %e);
                return Err(e);
            }
        };

        match row.outcome {
            MergeOutcome::TrivialMerged => {
                self.metrics
                    .incr_with_tags(MetricName::CompactionCount)
                    .with_tag("type", "trivial")
                    .send();
            }
            MergeOutcome::ComplexMerged => {
                self.metrics
                    .incr_with_tags(MetricName::CompactionCount)
                    .with_tag("type", "complex")
                    .send();
            }
            _ => {}
        }
        if row.duplicates > 0 {
            self.metrics
                .count_with_tags(MetricName::CompactionDuplicates, row.duplicates as i64)
                .send();
        }

        let Some(cell) = row.cell else {
            return Ok(());
        };

        // claim_batch filters on the cutoff already; this guards rows that
        // raced in via a requeue or carry no base time at all
        let base_time = key.base_time(self.settings.metric_width).unwrap_or(u32::MAX);
        if base_time > cutoff {
            return Ok(());
        }

        if row.write {
            if let Err(e) = self.store.put(&key, cell).await {
                if self.handlers.put.handle(&e, &self.queue, &self.metrics) {
                    return Ok(());
                }
                return Err(e.into());
            }
            self.metrics.incr_with_tags(MetricName::CompactionWrites).send();
        }

        if !row.to_delete.is_empty() {
            let deleted = row.to_delete.len();
            if let Err(e) = self.store.delete(&key, &row.to_delete).await {
                if self.handlers.delete.handle(&e, &self.queue, &self.metrics) {
                    return Ok(());
                }
                return Err(e.into());
            }
            self.metrics
                .count_with_tags(MetricName::CompactionDeletes, deleted as i64)
                .send();
        }

        Ok(())
    }
}
