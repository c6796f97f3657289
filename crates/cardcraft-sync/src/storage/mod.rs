//! Storage abstraction for catalog synchronization
//!
//! The pipeline talks to the catalog only through [`CatalogStore`] and
//! [`ImportCursorStore`]. Postgres backs production runs; the in-memory
//! implementations back dry runs and tests with the same transaction semantics.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::catalog::{CatalogRecord, ExistingCard, GameExtension, NaturalKey};
use crate::error::Result;

pub use memory::{MemoryCatalogStore, MemoryCursorStore};
pub use postgres::{PgCatalogStore, PgImportCursorStore};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<ExistingCard>>;

    /// Look up many keys in a single round trip; absent keys are simply missing
    /// from the returned map
    async fn find_many_by_natural_keys(
        &self,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, ExistingCard>>;

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>>;
}

/// A unit of work whose writes become visible only on [`commit`](Self::commit)
#[async_trait]
pub trait CatalogTransaction: Send {
    async fn create_record(&mut self, record: &CatalogRecord) -> Result<()>;

    async fn update_record(&mut self, record: &CatalogRecord) -> Result<()>;

    async fn create_extension(&mut self, card_id: Uuid, extension: &GameExtension) -> Result<()>;

    async fn update_extension(&mut self, card_id: Uuid, extension: &GameExtension) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Per-source timestamp of the last fully successful run
#[async_trait]
pub trait ImportCursorStore: Send + Sync {
    async fn get(&self, source_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Record a successful run. Implementations never move a cursor backwards.
    async fn set(&self, source_id: &str, at: DateTime<Utc>) -> Result<()>;
}
