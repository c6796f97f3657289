//! Bounded fan-out of batches to a fixed set of workers
//!
//! The producer feeds a queue of depth `queue_depth`; `workers` tasks pull from
//! it and report one outcome per batch to a collector task, which aggregates a
//! [`PoolSummary`]. A full queue blocks the producer, so at most
//! `queue_depth + workers` batches are in flight at any time.
//!
//! A failing batch does not stop the pool. Once more than
//! `max_consecutive_failures` batches fail in a row, the collector cancels the
//! run token; workers finish the batch they hold and exit.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_WORKERS};
use crate::decode::Batch;
use crate::error::Result;
use crate::report::{BatchFailure, RecordError};

const PROGRESS_EVERY_BATCHES: usize = 10;

/// Per-batch work run by each worker
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    /// An `Err` means the batch was rolled back as a whole
    async fn process(&self, batch: &Batch) -> Result<BatchStats>;
}

/// Outcome of a committed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub healed: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub max_consecutive_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_WORKERS * 2,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub batches: usize,
    pub failed_batches: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub healed: usize,
    pub skipped: usize,
    /// Records in rolled-back batches
    pub failed_records: usize,
    pub errors: Vec<RecordError>,
    pub batch_failures: Vec<BatchFailure>,
    /// The consecutive failure limit was exceeded
    pub aborted: bool,
}

enum Outcome {
    Committed { sequence: usize, stats: BatchStats },
    Failed(BatchFailure),
}

pub struct WorkerPool {
    sender: mpsc::Sender<Batch>,
    workers: Vec<JoinHandle<()>>,
    collector: JoinHandle<PoolSummary>,
}

impl WorkerPool {
    pub fn start<P: BatchProcessor>(
        processor: Arc<P>,
        config: PoolConfig,
        cancel: CancellationToken,
    ) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel::<Batch>(config.queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (outcome_tx, outcome_rx) = mpsc::channel::<Outcome>(workers * 2);

        debug!(workers, queue_depth = config.queue_depth, "Starting worker pool");

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let processor = Arc::clone(&processor);
            let receiver = Arc::clone(&receiver);
            let outcomes = outcome_tx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker, processor, receiver, outcomes, cancel).await
            }));
        }
        drop(outcome_tx);

        let collector = tokio::spawn(collect(
            outcome_rx,
            config.max_consecutive_failures,
            cancel,
        ));

        Self {
            sender,
            workers: handles,
            collector,
        }
    }

    /// A producer handle; sending waits while the queue is full
    ///
    /// Sends fail once every worker has exited.
    pub fn sender(&self) -> mpsc::Sender<Batch> {
        self.sender.clone()
    }

    /// Close the queue, wait for the workers to drain it and return the totals
    ///
    /// Outstanding [`sender`](Self::sender) clones must be dropped first or this
    /// waits for them.
    pub async fn finish(self) -> Result<PoolSummary> {
        let WorkerPool {
            sender,
            workers,
            collector,
        } = self;
        drop(sender);

        for (worker, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker, error = %e, "Worker panicked");
                return Err(e.into());
            }
        }

        Ok(collector.await?)
    }
}

async fn worker_loop<P: BatchProcessor>(
    worker: usize,
    processor: Arc<P>,
    receiver: Arc<Mutex<mpsc::Receiver<Batch>>>,
    outcomes: mpsc::Sender<Outcome>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            batch = async { receiver.lock().await.recv().await } => batch,
        };
        let Some(batch) = next else {
            break;
        };

        let outcome = match processor.process(&batch).await {
            Ok(stats) => Outcome::Committed {
                sequence: batch.sequence,
                stats,
            },
            Err(e) => {
                warn!(
                    worker,
                    sequence = batch.sequence,
                    start_index = batch.start_index,
                    records = batch.len(),
                    error = %e,
                    "Batch failed and was rolled back"
                );
                Outcome::Failed(BatchFailure {
                    sequence: batch.sequence,
                    start_index: batch.start_index,
                    len: batch.len(),
                    reason: e.to_string(),
                })
            },
        };

        if outcomes.send(outcome).await.is_err() {
            break;
        }
    }

    debug!(worker, "Worker exiting");
}

async fn collect(
    mut outcomes: mpsc::Receiver<Outcome>,
    max_consecutive_failures: u32,
    cancel: CancellationToken,
) -> PoolSummary {
    let mut summary = PoolSummary::default();
    let mut consecutive_failures: u32 = 0;

    while let Some(outcome) = outcomes.recv().await {
        summary.batches += 1;

        match outcome {
            Outcome::Committed { sequence, stats } => {
                consecutive_failures = 0;
                debug!(sequence, processed = stats.processed, "Batch done");
                summary.processed += stats.processed;
                summary.created += stats.created;
                summary.updated += stats.updated;
                summary.healed += stats.healed;
                summary.skipped += stats.skipped;
                summary.errors.extend(stats.errors);
            },
            Outcome::Failed(failure) => {
                consecutive_failures += 1;
                summary.failed_batches += 1;
                summary.failed_records += failure.len;
                summary.batch_failures.push(failure);

                if consecutive_failures > max_consecutive_failures && !summary.aborted {
                    error!(
                        consecutive_failures,
                        max_consecutive_failures, "Too many consecutive batch failures, aborting run"
                    );
                    summary.aborted = true;
                    cancel.cancel();
                }
            },
        }

        if summary.batches % PROGRESS_EVERY_BATCHES == 0 {
            info!(
                batches = summary.batches,
                processed = summary.processed,
                created = summary.created,
                updated = summary.updated,
                skipped = summary.skipped,
                failed_batches = summary.failed_batches,
                "Import progress"
            );
        }
    }

    // Order by dataset position; workers complete out of order
    summary.errors.sort_by_key(|e| e.index);
    summary.batch_failures.sort_by_key(|f| f.sequence);
    summary
}
