//! Compaction engine
//!
//! Owns the dirty-row queue and the background flush worker. Writers call
//! [`CompactionEngine::enqueue`] for every row they touch; the worker wakes
//! on a fixed interval, sizes a batch proportional to the backlog, and
//! drives each aged row through the read → merge → put → delete pipeline.
//!
//! Pipelines run concurrently up to a cap; within one row the put strictly
//! precedes the deletes so a crash can only leave extra cells behind, never
//! lose data. Backpressure from the store re-enqueues the row and counts as
//! success. The worker runs under a supervisor that respawns it after a
//! panic, so a poisoned row can never take compaction down for good.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, error, info};

use crate::annotation::Annotation;
use crate::compaction::error::{CompactionError, CompactionResult};
use crate::compaction::merge::{merge, MergeOutcome, RowMerge};
use crate::compaction::queue::DirtyRowQueue;
use crate::config::{CompactionConfig, ConfigError};
use crate::stats::StatsCollector;
use crate::store::{base_time_from_key, pretty_key, Cell, StoreClient, StoreError};

/// Row compaction engine
///
/// Cheap to share: construct once with [`CompactionEngine::new`], call
/// [`start`](CompactionEngine::start) to launch the background worker, and
/// hand clones of the `Arc` to writers and read paths.
pub struct CompactionEngine {
    store: Arc<dyn StoreClient>,
    config: CompactionConfig,
    queue: DirtyRowQueue,
    trivial_compactions: AtomicU64,
    complex_compactions: AtomicU64,
    written_cells: AtomicU64,
    deleted_cells: AtomicU64,
    read_errors: RpcErrorHandler,
    put_errors: RpcErrorHandler,
    delete_errors: RpcErrorHandler,
    shutting_down: AtomicBool,
}

impl CompactionEngine {
    /// Create an engine over the given store client
    pub fn new(
        store: Arc<dyn StoreClient>,
        config: CompactionConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let queue = DirtyRowQueue::new(
            usize::from(config.metric_width),
            config.claim_jitter_modulus,
        );
        Ok(Arc::new(Self {
            store,
            config,
            queue,
            trivial_compactions: AtomicU64::new(0),
            complex_compactions: AtomicU64::new(0),
            written_cells: AtomicU64::new(0),
            deleted_cells: AtomicU64::new(0),
            read_errors: RpcErrorHandler::new("read"),
            put_errors: RpcErrorHandler::new("put"),
            delete_errors: RpcErrorHandler::new("delete"),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Launch the background flush worker.
    ///
    /// A no-op when compactions are disabled; the pure merge surface keeps
    /// working either way.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enable_compactions {
            info!("compactions disabled, flush worker not started");
            return;
        }
        Self::spawn_worker(Arc::clone(self));
    }

    /// Mark a row as dirty so a future flush pass considers it
    pub fn enqueue(&self, row_key: &[u8]) {
        self.queue.enqueue(row_key);
    }

    /// Force a flush of all currently aged rows, with an unbounded budget
    pub async fn flush(self: &Arc<Self>) -> CompactionResult<()> {
        let size = self.queue.approx_size();
        if size > 0 {
            info!(rows = size, "flushing all old outstanding rows");
        }
        self.flush_batch(self.cutoff(), usize::MAX).await
    }

    /// Merge a row's cells in memory, e.g. for a read path that wants the
    /// canonical view before the background worker gets to the row.
    ///
    /// Annotations found in the row are appended to `annotations`. When the
    /// row is old enough and compactions are enabled, the canonical form is
    /// also written back in the background (must be called within a tokio
    /// runtime for that to happen).
    pub fn compact(
        self: &Arc<Self>,
        row_key: &[u8],
        cells: Vec<Cell>,
        annotations: &mut Vec<Annotation>,
    ) -> CompactionResult<Option<Cell>> {
        let mut merged = merge(cells)?;
        annotations.append(&mut merged.annotations);
        self.note_outcome(merged.outcome);
        let compacted = merged.compacted.clone();

        let cutoff = self.cutoff();
        let old_enough = base_time_from_key(row_key, usize::from(self.config.metric_width))
            .map(|base_time| base_time <= cutoff)
            .unwrap_or(false);
        if self.config.enable_compactions && old_enough && merged.mutates_store() {
            let engine = Arc::clone(self);
            let key = row_key.to_vec();
            tokio::spawn(async move {
                if let Err(error) = engine.apply(&key, merged, cutoff).await {
                    debug!(row = %pretty_key(&key), %error, "write-back of merged row failed");
                }
            });
        }
        Ok(compacted)
    }

    /// Record the engine's counters into the given collector
    pub fn collect_stats(&self, collector: &mut dyn StatsCollector) {
        collector.record(
            "compaction.count",
            self.trivial_compactions.load(Ordering::Relaxed),
            Some("type=trivial"),
        );
        collector.record(
            "compaction.count",
            self.complex_compactions.load(Ordering::Relaxed),
            Some("type=complex"),
        );
        if !self.config.enable_compactions {
            return;
        }
        // The remaining stats only make sense with compactions enabled.
        collector.record(
            "compaction.queue.size",
            self.queue.approx_size() as u64,
            None,
        );
        collector.record("compaction.errors", self.read_errors.count(), Some("rpc=read"));
        collector.record("compaction.errors", self.put_errors.count(), Some("rpc=put"));
        collector.record(
            "compaction.errors",
            self.delete_errors.count(),
            Some("rpc=delete"),
        );
        collector.record(
            "compaction.writes",
            self.written_cells.load(Ordering::Relaxed),
            None,
        );
        collector.record(
            "compaction.deletes",
            self.deleted_cells.load(Ordering::Relaxed),
            None,
        );
    }

    /// Stop the worker and run one final best-effort flush
    pub async fn shutdown(self: &Arc<Self>) -> CompactionResult<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.flush().await
    }

    /// Rows with a base time at or below this are old enough to compact
    fn cutoff(&self) -> u32 {
        let now = Utc::now().timestamp().max(0) as u64;
        now.saturating_sub(self.config.max_timespan_secs + 1)
            .min(u64::from(u32::MAX)) as u32
    }

    fn note_outcome(&self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::TrivialMerged => {
                self.trivial_compactions.fetch_add(1, Ordering::Relaxed);
            }
            MergeOutcome::ComplexMerged => {
                self.complex_compactions.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn spawn_worker(engine: Arc<Self>) {
        tokio::spawn(async move {
            let worker = Arc::clone(&engine);
            let handle = tokio::spawn(async move { worker.worker_loop().await });
            match handle.await {
                Err(join_error) if join_error.is_panic() => {
                    error!("compaction worker panicked, respawning after backoff");
                    sleep(Duration::from_secs(1)).await;
                    if !engine.shutting_down.load(Ordering::SeqCst) {
                        Self::spawn_worker(engine);
                    }
                }
                _ => {}
            }
        });
    }

    async fn worker_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.config.flush_interval_secs));
        loop {
            // The first tick completes immediately, so the first backlog
            // check runs as soon as the worker is up.
            ticker.tick().await;
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let size = self.queue.approx_size();
            if size <= self.config.min_flush_threshold {
                continue;
            }
            // Adaptive batch sizing: flush at a rate proportional to the
            // backlog, so `size` rows drain in max_timespan / flush_speed
            // wall time and the engine stays ahead of the next hour's rows.
            // Many queued rows are usually too young to flush, which only
            // makes the pass cheaper.
            let maxflushes = ((size as u64)
                .saturating_mul(self.config.flush_interval_secs)
                .saturating_mul(self.config.flush_speed)
                / self.config.max_timespan_secs) as usize;
            let maxflushes = maxflushes.max(self.config.min_flush_threshold);

            let started = Instant::now();
            if let Err(error) = self.flush_batch(self.cutoff(), maxflushes).await {
                error!(%error, "flush batch failed");
            }
            let new_size = self.queue.approx_size();
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                queue_size = new_size,
                delta = new_size as i64 - size as i64,
                "flush pass finished"
            );
        }
    }

    /// Claim up to `max` aged rows and compact them, `max_concurrent_flushes`
    /// at a time.
    ///
    /// Every claimed row runs to completion even when siblings fail; the
    /// first error is reported once all pipelines settle.
    async fn flush_batch(self: &Arc<Self>, cutoff: u32, max: usize) -> CompactionResult<()> {
        let mut budget = max.min(self.queue.approx_size());
        let mut first_error: Option<CompactionError> = None;

        while budget > 0 {
            let cap = budget.min(self.config.max_concurrent_flushes);
            let batch = self.queue.claim_batch(cutoff, cap);
            if batch.is_empty() {
                break;
            }
            let claimed = batch.len();

            let mut pipelines = JoinSet::new();
            for key in batch {
                let engine = Arc::clone(self);
                pipelines.spawn(async move { engine.flush_row(key, cutoff).await });
            }

            // If the concurrency cap bound this round there is more to do
            // once these pipelines finish; nudge the client so the batch
            // completes sooner.
            let capped = claimed == self.config.max_concurrent_flushes && budget > claimed;
            if capped {
                self.store.flush_hint();
            }

            while let Some(joined) = pipelines.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        first_error.get_or_insert(error);
                    }
                    Err(join_error) => {
                        error!(%join_error, "row pipeline aborted");
                    }
                }
            }

            budget -= claimed;
            if !capped {
                break;
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// One row's pipeline: read, merge, then write back and delete originals
    async fn flush_row(self: Arc<Self>, key: Vec<u8>, cutoff: u32) -> CompactionResult<()> {
        let cells = match self.store.get(&key).await {
            Ok(cells) => cells,
            Err(error) => return self.read_errors.handle(&self.queue, &key, error),
        };
        let merged = match merge(cells) {
            Ok(merged) => merged,
            Err(error) => {
                // Fatal for the row: leave it for an operator repair pass,
                // do not re-enqueue.
                error!(row = %pretty_key(&key), %error, "cannot compact malformed row");
                return Err(error);
            }
        };
        self.note_outcome(merged.outcome);
        self.apply(&key, merged, cutoff).await
    }

    /// Apply a merge result to the store: put the canonical cell, then
    /// delete the originals. Rows still inside their live window are left
    /// untouched.
    async fn apply(&self, key: &[u8], merged: RowMerge, cutoff: u32) -> CompactionResult<()> {
        if !merged.mutates_store() || !self.config.enable_compactions {
            return Ok(());
        }
        if let Some(base_time) = base_time_from_key(key, usize::from(self.config.metric_width)) {
            if base_time > cutoff {
                return Ok(());
            }
        }
        let Some(compact) = &merged.compacted else {
            return Ok(());
        };

        self.deleted_cells
            .fetch_add(merged.deletes.len() as u64, Ordering::Relaxed);
        if merged.write {
            self.written_cells.fetch_add(1, Ordering::Relaxed);
            if let Err(error) = self
                .store
                .put(key, &compact.qualifier, &compact.value)
                .await
            {
                return self.put_errors.handle(&self.queue, key, error);
            }
        }
        if !merged.deletes.is_empty() {
            if let Err(error) = self.store.delete(key, &merged.deletes).await {
                return self.delete_errors.handle(&self.queue, key, error);
            }
        }
        Ok(())
    }
}

/// Per-RPC error accounting: throttle recovery, a lossy counter, and
/// rate-limited logging.
struct RpcErrorHandler {
    what: &'static str,
    errors: AtomicU64,
}

impl RpcErrorHandler {
    fn new(what: &'static str) -> Self {
        Self {
            what,
            errors: AtomicU64::new(0),
        }
    }

    fn count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Absorb a store error. A throttle signal completes the pipeline
    /// successfully, re-enqueueing the row when the failed RPC carries its
    /// key; any other error is counted, occasionally logged, and
    /// propagated.
    fn handle(
        &self,
        queue: &DirtyRowQueue,
        row_key: &[u8],
        error: StoreError,
    ) -> CompactionResult<()> {
        if let StoreError::Throttle { key } = &error {
            if let Some(key) = key {
                // The store is falling behind; give the row back to the
                // queue and let the scheduler pace itself.
                queue.enqueue(key);
            } else {
                // Still just backpressure, not an RPC failure. Without a
                // key there is nothing to re-schedule; a writer will dirty
                // the row again.
                error!(
                    rpc = self.what,
                    row = %pretty_key(row_key),
                    "throttled rpc carries no row key; row lost from this pass"
                );
            }
            return Ok(());
        }
        let errors = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
        if errors % 100 == 1 {
            error!(
                rpc = self.what,
                errors,
                row = %pretty_key(row_key),
                %error,
                "failed to {} a row to re-compact",
                self.what
            );
        }
        Err(error.into())
    }
}
