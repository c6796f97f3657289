//! On-disk dataset cache
//!
//! One file per source, `<cache_dir>/<source_id>.json`. A file is fresh while its
//! modification time is within `max_age`. New downloads stream into a uniquely
//! named `.part` file in the same directory and are renamed over the cache file
//! only once complete, so readers never observe a partial dataset.

use cardcraft_common::checksum::StreamingDigest;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct DatasetCache {
    dir: PathBuf,
    max_age: Duration,
}

/// A cache entry young enough to reuse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDataset {
    pub path: PathBuf,
    pub bytes: u64,
    pub age: Duration,
}

impl DatasetCache {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{source_id}.json"))
    }

    /// The cached dataset for `source_id`, if present and fresh
    ///
    /// Entries whose modification time cannot be read are treated as stale.
    pub async fn fresh(&self, source_id: &str) -> Result<Option<CachedDataset>> {
        let path = self.path_for(source_id);
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(age) = metadata.modified().ok().and_then(|m| m.elapsed().ok()) else {
            return Ok(None);
        };

        if age >= self.max_age {
            debug!(path = %path.display(), age_secs = age.as_secs(), "Cached dataset is stale");
            return Ok(None);
        }

        Ok(Some(CachedDataset {
            path,
            bytes: metadata.len(),
            age,
        }))
    }

    /// Drop the cache entry for `source_id`; returns whether one existed
    pub async fn evict(&self, source_id: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(source_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Start writing a replacement for the cache entry of `source_id`
    pub async fn writer(&self, source_id: &str) -> Result<CacheWriter> {
        fs::create_dir_all(&self.dir).await?;
        let temp_path = self
            .dir
            .join(format!("{source_id}.json.{}.part", Uuid::new_v4().simple()));
        let file = fs::File::create(&temp_path).await?;

        Ok(CacheWriter {
            file: BufWriter::new(file),
            temp_path,
            final_path: self.path_for(source_id),
            digest: StreamingDigest::new(),
            committed: false,
        })
    }
}

/// A completed cache write
#[derive(Debug, Clone)]
pub struct WrittenDataset {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Streams a download into a temporary file; dropped writers delete it
pub struct CacheWriter {
    file: BufWriter<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    digest: StreamingDigest,
    committed: bool,
}

impl CacheWriter {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        self.digest.update(chunk);
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.digest.bytes()
    }

    /// Flush to disk and atomically replace the cache entry
    pub async fn commit(mut self) -> Result<WrittenDataset> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        fs::rename(&self.temp_path, &self.final_path).await?;
        self.committed = true;

        let digest = std::mem::take(&mut self.digest);
        Ok(WrittenDataset {
            path: self.final_path.clone(),
            bytes: digest.bytes(),
            sha256: digest.finish(),
        })
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn part_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".part")
            })
            .count()
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_fresh() {
        let dir = TempDir::new().unwrap();
        let cache = DatasetCache::new(dir.path(), DEFAULT_MAX_AGE);
        assert!(cache.fresh("mtg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_committed_write_is_fresh_and_complete() {
        let dir = TempDir::new().unwrap();
        let cache = DatasetCache::new(dir.path().join("nested"), DEFAULT_MAX_AGE);

        let mut writer = cache.writer("mtg").await.unwrap();
        writer.write_chunk(b"[{\"id\":").await.unwrap();
        writer.write_chunk(b"\"a\"}]").await.unwrap();
        assert_eq!(writer.bytes_written(), 12);
        let written = writer.commit().await.unwrap();

        assert_eq!(written.path, cache.path_for("mtg"));
        assert_eq!(written.sha256.len(), 64);
        assert_eq!(std::fs::read(&written.path).unwrap(), b"[{\"id\":\"a\"}]");

        let fresh = cache.fresh("mtg").await.unwrap().unwrap();
        assert_eq!(fresh.bytes, 12);
        assert_eq!(part_files(cache.dir()), 0);
    }

    #[tokio::test]
    async fn test_abandoned_write_leaves_previous_entry_untouched() {
        let dir = TempDir::new().unwrap();
        let cache = DatasetCache::new(dir.path(), DEFAULT_MAX_AGE);
        std::fs::write(cache.path_for("mtg"), b"[]").unwrap();

        let mut writer = cache.writer("mtg").await.unwrap();
        writer.write_chunk(b"[{\"trunc").await.unwrap();
        drop(writer);

        assert_eq!(std::fs::read(cache.path_for("mtg")).unwrap(), b"[]");
        assert_eq!(part_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_evicted_entry_is_no_longer_fresh() {
        let dir = TempDir::new().unwrap();
        let cache = DatasetCache::new(dir.path(), DEFAULT_MAX_AGE);
        std::fs::write(cache.path_for("mtg"), b"[{\"trunc").unwrap();

        assert!(cache.evict("mtg").await.unwrap());
        assert!(cache.fresh("mtg").await.unwrap().is_none());
        assert!(!cache.evict("mtg").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_max_age_is_always_stale() {
        let dir = TempDir::new().unwrap();
        let cache = DatasetCache::new(dir.path(), Duration::ZERO);
        std::fs::write(cache.path_for("pokemon"), b"[]").unwrap();

        assert!(cache.fresh("pokemon").await.unwrap().is_none());
    }
}
