//! Batch reconciliation against the catalog
//!
//! [`ChangeDetector`] decides what a batch needs, [`Upserter`] writes it, and
//! [`BatchReconciler`] glues the two together as the worker pool's processor.

pub mod detector;
pub mod signature;
pub mod upsert;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::decode::Batch;
use crate::error::Result;
use crate::pool::{BatchProcessor, BatchStats};
use crate::storage::CatalogStore;

pub use detector::{CardUpdate, ChangeDetector, ChangeSet, ExtensionHeal, NewCard};
pub use signature::CardSignature;
pub use upsert::{UpsertCounts, Upserter};

/// Detect-then-upsert for one run; `cursor` is fixed for the run's duration
pub struct BatchReconciler {
    detector: ChangeDetector,
    upserter: Upserter,
    cursor: Option<DateTime<Utc>>,
}

impl BatchReconciler {
    pub fn new(store: Arc<dyn CatalogStore>, cursor: Option<DateTime<Utc>>) -> Self {
        Self {
            detector: ChangeDetector::new(Arc::clone(&store)),
            upserter: Upserter::new(store),
            cursor,
        }
    }
}

#[async_trait]
impl BatchProcessor for BatchReconciler {
    async fn process(&self, batch: &Batch) -> Result<BatchStats> {
        let changes = self.detector.detect(batch, self.cursor).await?;
        let counts = self.upserter.apply(&changes).await?;

        Ok(BatchStats {
            processed: changes.valid_records(),
            created: counts.created,
            updated: counts.updated,
            healed: counts.healed,
            skipped: changes.skipped,
            errors: changes.errors,
        })
    }
}
