//! CardCraft catalog synchronization
//!
//! Keeps the card catalog in step with provider bulk datasets (Scryfall for
//! Magic: The Gathering, the Pokémon TCG dataset for Pokémon).
//!
//! # Pipeline
//!
//! ```text
//! SourceClient ──► decode_batches ──► WorkerPool ──► ChangeDetector ──► Upserter
//!  (descriptor,     (blocking thread,   (bounded       (one lookup        (one transaction
//!   cached file)     fixed-size batches) queue)          per batch)         per batch)
//! ```
//!
//! - [`source`]: dataset descriptor lookup, retried downloads and the on-disk cache
//! - [`decode`]: streaming JSON array decoding into [`decode::Batch`]es
//! - [`reconcile`]: change detection by natural key and content signature, and
//!   transactional upserts
//! - [`pool`]: bounded fan-out of batches to workers
//! - [`pipeline`]: one import run per source, including the import cursor
//! - [`scheduler`]: periodic runs over every configured source
//! - [`storage`]: catalog and cursor stores (Postgres and in-memory)
//!
//! # Example
//!
//! ```no_run
//! use cardcraft_sync::config::SyncConfig;
//! use cardcraft_sync::pipeline::SyncPipeline;
//! use cardcraft_sync::source::SourceClient;
//! use cardcraft_sync::storage::{MemoryCatalogStore, MemoryCursorStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> cardcraft_sync::Result<()> {
//! let config = SyncConfig::load()?;
//! let pipeline = SyncPipeline::new(
//!     SourceClient::new(&config.client_settings())?,
//!     Arc::new(MemoryCatalogStore::new()),
//!     Arc::new(MemoryCursorStore::new()),
//!     config.source_specs()?,
//! );
//!
//! let report = pipeline.run_import("mtg").await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod decode;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod provider;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod storage;

pub use error::{Result, SyncError};
pub use pipeline::{ImportOptions, SyncPipeline};
pub use report::RunReport;
pub use scheduler::{Scheduler, SchedulerState};
