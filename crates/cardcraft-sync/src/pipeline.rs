//! One import run: descriptor, download, decode, reconcile, cursor
//!
//! Decoding runs on a blocking thread and feeds the worker pool through its
//! bounded queue. The cursor only moves once every batch of the run has
//! committed; record-level validation errors do not hold it back. A dataset that
//! fails to decode is evicted from the cache so the next run downloads it again.

use async_trait::async_trait;
use chrono::Utc;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::decode::{decode_batches, DecodeSummary};
use crate::error::{Result, SyncError};
use crate::pool::{PoolConfig, WorkerPool};
use crate::reconcile::BatchReconciler;
use crate::report::RunReport;
use crate::scheduler::SourceRunner;
use crate::source::{SourceClient, SourceSpec};
use crate::storage::{CatalogStore, ImportCursorStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Ignore the cursor: no up-to-date short-circuit and no per-record skip
    pub force: bool,
}

pub struct SyncPipeline {
    client: SourceClient,
    store: Arc<dyn CatalogStore>,
    cursors: Arc<dyn ImportCursorStore>,
    sources: Vec<SourceSpec>,
    batch_size: usize,
    pool: PoolConfig,
    cancel: CancellationToken,
}

impl SyncPipeline {
    pub fn new(
        client: SourceClient,
        store: Arc<dyn CatalogStore>,
        cursors: Arc<dyn ImportCursorStore>,
        sources: Vec<SourceSpec>,
    ) -> Self {
        Self {
            client,
            store,
            cursors,
            sources,
            batch_size: DEFAULT_BATCH_SIZE,
            pool: PoolConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Runs stop taking new batches once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn source(&self, source_id: &str) -> Result<&SourceSpec> {
        self.sources
            .iter()
            .find(|s| s.id == source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))
    }

    pub async fn run_import(&self, source_id: &str) -> Result<RunReport> {
        self.run_import_with(source_id, ImportOptions::default())
            .await
    }

    #[instrument(skip_all, fields(source = %source_id, force = options.force))]
    pub async fn run_import_with(
        &self,
        source_id: &str,
        options: ImportOptions,
    ) -> Result<RunReport> {
        let source = self.source(source_id)?.clone();
        let started_at = Utc::now();
        let mut report = RunReport::new(&source.id, started_at);

        let cursor = self.cursors.get(&source.id).await?;
        info!(cursor = ?cursor, "Starting import");

        let descriptor = self.client.fetch_descriptor(&source, &self.cancel).await?;
        report.dataset_id = Some(descriptor.dataset_id.clone());

        if !options.force {
            if let (Some(updated_at), Some(cursor)) = (descriptor.updated_at, cursor) {
                if updated_at <= cursor {
                    info!(%updated_at, %cursor, "Dataset unchanged since last run");
                    report.up_to_date = true;
                    report.complete(Utc::now());
                    return Ok(report);
                }
            }
        }

        let dataset = self.client.download(&source, &descriptor, &self.cancel).await?;
        report.from_cache = dataset.from_cache;

        let run_cancel = self.cancel.child_token();
        let record_cursor = if options.force { None } else { cursor };
        let pool = WorkerPool::start(
            Arc::new(BatchReconciler::new(Arc::clone(&self.store), record_cursor)),
            self.pool,
            run_cancel.clone(),
        );

        let sender = pool.sender();
        let decode_cancel = run_cancel.clone();
        let game = source.game;
        let batch_size = self.batch_size;
        let decoded = tokio::task::spawn_blocking(move || -> Result<DecodeSummary> {
            let reader = dataset.open()?;
            decode_batches(reader, game, batch_size, |batch| {
                if decode_cancel.is_cancelled() || sender.blocking_send(batch).is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
        })
        .await
        .map_err(SyncError::from)
        .and_then(|result| result);

        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                run_cancel.cancel();
                let summary = pool.finish().await?;
                error!(
                    error = %e,
                    committed_batches = summary.batches - summary.failed_batches,
                    "Import failed while decoding; cursor not advanced"
                );
                if matches!(e, SyncError::Decode { .. }) {
                    self.discard_cached(&source.id).await;
                }
                return Err(e);
            },
        };

        let summary = pool.finish().await?;

        report.decoded = decoded.records;
        report.processed = summary.processed;
        report.created = summary.created;
        report.updated = summary.updated;
        report.healed = summary.healed;
        report.skipped = summary.skipped;
        report.failed = summary.failed_records;
        report.batches = summary.batches;
        report.failed_batches = summary.failed_batches;
        report.errors = summary.errors;
        report.batch_failures = summary.batch_failures;

        if summary.aborted {
            error!(
                failed_batches = report.failed_batches,
                processed = report.processed,
                "Import aborted; cursor not advanced"
            );
            return Err(SyncError::TooManyBatchFailures(summary.failed_batches as u32));
        }
        if self.cancel.is_cancelled() || decoded.stopped_early {
            warn!(
                batches = report.batches,
                "Import cancelled; cursor not advanced"
            );
            return Err(SyncError::Cancelled);
        }

        if report.failed_batches == 0 {
            self.cursors.set(&source.id, started_at).await?;
            report.cursor_advanced = true;
        } else {
            warn!(
                failed_batches = report.failed_batches,
                "Some batches failed; cursor not advanced"
            );
        }

        report.complete(Utc::now());
        info!(
            decoded = report.decoded,
            processed = report.processed,
            created = report.created,
            updated = report.updated,
            healed = report.healed,
            skipped = report.skipped,
            errors = report.error_count(),
            duration_ms = report.duration.as_millis() as u64,
            "Import completed"
        );

        Ok(report)
    }

    /// A malformed dataset must not be served again from cache
    async fn discard_cached(&self, source_id: &str) {
        match self.client.cache().evict(source_id).await {
            Ok(true) => warn!("Discarded malformed cached dataset"),
            Ok(false) => {},
            Err(e) => warn!(error = %e, "Failed to discard malformed cached dataset"),
        }
    }
}

#[async_trait]
impl SourceRunner for SyncPipeline {
    async fn run_source(&self, source_id: &str) -> Result<RunReport> {
        self.run_import(source_id).await
    }
}
