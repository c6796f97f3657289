//! Classify a batch into creates, self-heals, updates and skips

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::signature::CardSignature;
use crate::catalog::{CatalogRecord, GameExtension, NaturalKey};
use crate::decode::Batch;
use crate::error::Result;
use crate::provider::IncomingCard;
use crate::report::RecordError;
use crate::storage::CatalogStore;

/// A never-seen card
#[derive(Debug, Clone, PartialEq)]
pub struct NewCard {
    pub record: CatalogRecord,
    pub extension: GameExtension,
}

/// A stored card whose extension row is missing
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionHeal {
    pub card_id: Uuid,
    pub key: NaturalKey,
    pub extension: GameExtension,
}

/// A stored card whose content changed
#[derive(Debug, Clone, PartialEq)]
pub struct CardUpdate {
    pub record: CatalogRecord,
    pub extension: GameExtension,
}

/// Everything one batch needs written, in write order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub creates: Vec<NewCard>,
    pub heals: Vec<ExtensionHeal>,
    pub updates: Vec<CardUpdate>,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
}

impl ChangeSet {
    pub fn has_writes(&self) -> bool {
        !(self.creates.is_empty() && self.heals.is_empty() && self.updates.is_empty())
    }

    /// Records that passed validation
    pub fn valid_records(&self) -> usize {
        self.creates.len() + self.heals.len() + self.updates.len() + self.skipped
    }
}

pub struct ChangeDetector {
    store: Arc<dyn CatalogStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Classify every record of `batch` against the catalog
    ///
    /// Invalid records land in [`ChangeSet::errors`]. Only a lookup failure
    /// fails the call.
    pub async fn detect(&self, batch: &Batch, cursor: Option<DateTime<Utc>>) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let mut candidates: Vec<IncomingCard> = Vec::with_capacity(batch.len());
        let mut seen: HashSet<NaturalKey> = HashSet::with_capacity(batch.len());

        for (offset, card) in batch.cards.iter().enumerate() {
            let index = batch.start_index + offset;
            let incoming = match card.clone().into_incoming() {
                Ok(incoming) => incoming,
                Err(e) => {
                    warn!(
                        index,
                        provider_id = card.provider_id(),
                        name = card.name(),
                        error = %e,
                        "Skipping invalid record"
                    );
                    changes.errors.push(RecordError {
                        index,
                        key: None,
                        provider_id: card.provider_id().to_string(),
                        name: card.name().to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                },
            };

            if !seen.insert(incoming.key.clone()) {
                warn!(index, key = %incoming.key, "Duplicate natural key in batch");
                changes.errors.push(RecordError {
                    index,
                    key: Some(incoming.key.to_string()),
                    provider_id: incoming.provider_id,
                    name: incoming.name,
                    reason: "duplicate natural key in batch".to_string(),
                });
                continue;
            }

            if let (Some(updated_at), Some(cursor)) = (incoming.provider_updated_at, cursor) {
                if updated_at <= cursor {
                    changes.skipped += 1;
                    continue;
                }
            }

            candidates.push(incoming);
        }

        if candidates.is_empty() {
            return Ok(changes);
        }

        let keys: Vec<NaturalKey> = candidates.iter().map(|c| c.key.clone()).collect();
        let mut existing = self.store.find_many_by_natural_keys(&keys).await?;
        let now = Utc::now();

        for incoming in candidates {
            let Some(stored) = existing.remove(&incoming.key) else {
                changes.creates.push(NewCard {
                    record: new_record(&incoming, now),
                    extension: incoming.extension,
                });
                continue;
            };

            let Some(stored_extension) = stored.extension else {
                debug!(key = %incoming.key, card_id = %stored.record.id, "Extension missing, healing");
                changes.heals.push(ExtensionHeal {
                    card_id: stored.record.id,
                    key: incoming.key,
                    extension: incoming.extension,
                });
                continue;
            };

            if CardSignature::of_incoming(&incoming)
                == CardSignature::of_stored(&stored.record, &stored_extension)
            {
                changes.skipped += 1;
                continue;
            }

            let record = CatalogRecord {
                name: incoming.name,
                set_name: incoming.set_name,
                rarity: incoming.rarity,
                image_url: incoming.image_url,
                updated_at: now,
                ..stored.record
            };
            changes.updates.push(CardUpdate {
                record,
                extension: incoming.extension,
            });
        }

        debug!(
            sequence = batch.sequence,
            creates = changes.creates.len(),
            heals = changes.heals.len(),
            updates = changes.updates.len(),
            skipped = changes.skipped,
            errors = changes.errors.len(),
            "Batch classified"
        );

        Ok(changes)
    }
}

fn new_record(incoming: &IncomingCard, now: DateTime<Utc>) -> CatalogRecord {
    CatalogRecord {
        id: Uuid::new_v4(),
        name: incoming.name.clone(),
        game: incoming.key.game,
        set_code: incoming.key.set_code.clone(),
        set_name: incoming.set_name.clone(),
        number: incoming.key.number.clone(),
        rarity: incoming.rarity.clone(),
        image_url: incoming.image_url.clone(),
        created_at: now,
        updated_at: now,
    }
}
