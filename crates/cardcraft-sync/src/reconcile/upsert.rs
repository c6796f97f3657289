//! Apply one batch's change set in a single transaction

use std::sync::Arc;
use tracing::{debug, warn};

use super::detector::ChangeSet;
use crate::error::Result;
use crate::storage::{CatalogStore, CatalogTransaction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub created: usize,
    pub updated: usize,
    pub healed: usize,
}

pub struct Upserter {
    store: Arc<dyn CatalogStore>,
}

impl Upserter {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Write `changes` atomically; on error nothing from this batch is visible
    pub async fn apply(&self, changes: &ChangeSet) -> Result<UpsertCounts> {
        if !changes.has_writes() {
            return Ok(UpsertCounts::default());
        }

        let mut tx = self.store.begin().await?;
        match write_all(tx.as_mut(), changes).await {
            Ok(counts) => {
                tx.commit().await?;
                debug!(
                    created = counts.created,
                    updated = counts.updated,
                    healed = counts.healed,
                    "Batch committed"
                );
                Ok(counts)
            },
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            },
        }
    }
}

async fn write_all(tx: &mut dyn CatalogTransaction, changes: &ChangeSet) -> Result<UpsertCounts> {
    let mut counts = UpsertCounts::default();

    for new in &changes.creates {
        tx.create_record(&new.record).await?;
        tx.create_extension(new.record.id, &new.extension).await?;
        counts.created += 1;
    }

    for heal in &changes.heals {
        tx.create_extension(heal.card_id, &heal.extension).await?;
        counts.healed += 1;
    }

    for update in &changes.updates {
        tx.update_record(&update.record).await?;
        tx.update_extension(update.record.id, &update.extension).await?;
        counts.updated += 1;
    }

    Ok(counts)
}
