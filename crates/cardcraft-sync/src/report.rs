//! Run outcome reporting

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A record that was rejected without failing its batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// 0-based position in the dataset
    pub index: usize,
    /// Natural key text, when the record got far enough to have one
    pub key: Option<String>,
    pub provider_id: String,
    pub name: String,
    pub reason: String,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ", self.index)?;
        if let Some(key) = &self.key {
            write!(f, "{key} ")?;
        }
        write!(f, "({} \"{}\"): {}", self.provider_id, self.name, self.reason)
    }
}

/// A batch whose transaction was rolled back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub sequence: usize,
    pub start_index: usize,
    pub len: usize,
    pub reason: String,
}

/// Summary of one import run for one source
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source_id: String,
    pub dataset_id: Option<String>,
    pub from_cache: bool,
    /// The provider had nothing newer than the cursor; nothing was downloaded
    pub up_to_date: bool,
    pub decoded: usize,
    /// Records that passed validation in committed batches
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub healed: usize,
    pub skipped: usize,
    /// Records in rolled-back batches
    pub failed: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub errors: Vec<RecordError>,
    pub batch_failures: Vec<BatchFailure>,
    pub cursor_advanced: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_duration_ms", rename = "duration_ms")]
    pub duration: Duration,
}

impl RunReport {
    pub fn new(source_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            dataset_id: None,
            from_cache: false,
            up_to_date: false,
            decoded: 0,
            processed: 0,
            created: 0,
            updated: 0,
            healed: 0,
            skipped: 0,
            failed: 0,
            batches: 0,
            failed_batches: 0,
            errors: Vec::new(),
            batch_failures: Vec::new(),
            cursor_advanced: false,
            started_at,
            completed_at: started_at,
            duration: Duration::ZERO,
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + self.batch_failures.len()
    }

    /// Errors were reported and nothing at all went through
    pub fn should_fail_exit(&self) -> bool {
        self.error_count() > 0 && self.processed == 0
    }

    pub fn complete(&mut self, completed_at: DateTime<Utc>) {
        self.completed_at = completed_at;
        self.duration = (completed_at - self.started_at).to_std().unwrap_or_default();
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.up_to_date {
            return write!(f, "{}: up to date", self.source_id);
        }

        writeln!(
            f,
            "{}: processed={} created={} updated={} healed={} skipped={} errors={} ({:.1}s)",
            self.source_id,
            self.processed,
            self.created,
            self.updated,
            self.healed,
            self.skipped,
            self.error_count(),
            self.duration.as_secs_f64()
        )?;
        writeln!(
            f,
            "  dataset={} cached={} batches={} failed_batches={} cursor_advanced={}",
            self.dataset_id.as_deref().unwrap_or("-"),
            self.from_cache,
            self.batches,
            self.failed_batches,
            self.cursor_advanced
        )?;
        for failure in &self.batch_failures {
            writeln!(
                f,
                "  batch {} (records {}..{}): {}",
                failure.sequence,
                failure.start_index,
                failure.start_index + failure.len,
                failure.reason
            )?;
        }
        for error in &self.errors {
            writeln!(f, "  {error}")?;
        }
        Ok(())
    }
}

fn serialize_duration_ms<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
