//! Remote dataset access
//!
//! [`SourceClient`] resolves a source's current dataset ([`SourceDescriptor`])
//! and materializes it as a local file, reusing a fresh cache entry when one
//! exists. All requests go through [`retry::retry_with_backoff`].
//!
//! Paged sources have no single dataset file. Their pages are written one after
//! another into the cache entry as a single JSON array, so every source is
//! decoded the same way.

pub mod cache;
pub mod retry;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::catalog::Game;
use crate::error::{Result, SyncError};
use crate::provider::PokemonSet;
use cache::DatasetCache;
use retry::{retry_with_backoff, RetryPolicy};

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// How a source publishes its dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEndpoint {
    /// A listing of the shape `{"data": [{"type": .., "download_uri": ..}, ..]}`
    /// from which the entry of `dataset_type` is selected
    Listing { url: String, dataset_type: String },
    /// A fixed dataset URL
    Direct { url: String },
    /// A set listing of the shape `{"data": [{"id": .., "updatedAt": ..}, ..]}`
    /// and a card search fetched per set as `?q=set.id:<id>&page=N&pageSize=..`
    Paged {
        sets_url: String,
        cards_url: String,
        page_size: u32,
    },
}

/// A configured data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub id: String,
    pub game: Game,
    pub endpoint: SourceEndpoint,
    /// Sent as `X-Api-Key` on every request
    pub api_key: Option<String>,
}

/// Provider metadata for the dataset to import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub dataset_id: String,
    pub dataset_type: String,
    pub download_url: String,
    /// Declared size in bytes
    pub size: Option<u64>,
    /// When the provider last regenerated the dataset
    pub updated_at: Option<DateTime<Utc>>,
    /// Set ids of a paged source, fetched in this order
    pub partitions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    download_uri: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SetListing {
    data: Vec<PokemonSet>,
}

#[derive(Debug, Deserialize)]
struct CardPage {
    data: Vec<serde_json::Value>,
    #[serde(default, rename = "totalCount")]
    total_count: Option<usize>,
}

/// A dataset materialized on local disk
#[derive(Debug, Clone)]
pub struct DatasetFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub from_cache: bool,
    /// Digest of a fresh download; not recomputed for cache hits
    pub sha256: Option<String>,
}

impl DatasetFile {
    pub fn open(&self) -> std::io::Result<BufReader<std::fs::File>> {
        Ok(BufReader::with_capacity(
            256 * 1024,
            std::fs::File::open(&self.path)?,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub user_agent: String,
    /// Whole-request timeout for metadata, idle timeout for dataset bodies
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_dir: PathBuf,
    pub cache_max_age: Duration,
}

pub struct SourceClient {
    http: Client,
    timeout: Duration,
    retry: RetryPolicy,
    cache: DatasetCache,
}

impl SourceClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            timeout: settings.timeout,
            retry: settings.retry,
            cache: DatasetCache::new(settings.cache_dir.clone(), settings.cache_max_age),
        })
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    /// Resolve the dataset a run should import
    #[instrument(skip_all, fields(source = %source.id))]
    pub async fn fetch_descriptor(
        &self,
        source: &SourceSpec,
        cancel: &CancellationToken,
    ) -> Result<SourceDescriptor> {
        let (url, dataset_type) = match &source.endpoint {
            SourceEndpoint::Direct { url } => {
                return Ok(SourceDescriptor {
                    dataset_id: source.id.clone(),
                    dataset_type: "direct".to_string(),
                    download_url: url.clone(),
                    size: None,
                    updated_at: None,
                    partitions: Vec::new(),
                });
            },
            SourceEndpoint::Paged {
                sets_url,
                cards_url,
                ..
            } => return self.fetch_set_listing(source, sets_url, cards_url, cancel).await,
            SourceEndpoint::Listing { url, dataset_type } => (url, dataset_type),
        };

        let listing: Listing = retry_with_backoff(&self.retry, cancel, url, move |_| async move {
            let response = self.send_checked(source, url, Some(self.timeout)).await?;
            Ok(response.json::<Listing>().await?)
        })
        .await
        .into_result(url)?;

        let entry = listing
            .data
            .into_iter()
            .find(|entry| &entry.kind == dataset_type)
            .ok_or_else(|| SyncError::DatasetNotFound {
                url: url.clone(),
                dataset_type: dataset_type.clone(),
            })?;

        info!(
            dataset_id = %entry.id,
            size = entry.size,
            updated_at = ?entry.updated_at,
            "Resolved dataset"
        );

        Ok(SourceDescriptor {
            dataset_id: entry.id,
            dataset_type: entry.kind,
            download_url: entry.download_uri,
            size: entry.size,
            updated_at: entry.updated_at,
            partitions: Vec::new(),
        })
    }

    /// Descriptor of a paged source: its set ids and the newest set update time
    async fn fetch_set_listing(
        &self,
        source: &SourceSpec,
        sets_url: &str,
        cards_url: &str,
        cancel: &CancellationToken,
    ) -> Result<SourceDescriptor> {
        let listing: SetListing = retry_with_backoff(&self.retry, cancel, sets_url, move |_| async move {
            let response = self.send_checked(source, sets_url, Some(self.timeout)).await?;
            Ok(response.json::<SetListing>().await?)
        })
        .await
        .into_result(sets_url)?;

        if listing.data.is_empty() {
            return Err(SyncError::DatasetNotFound {
                url: sets_url.to_string(),
                dataset_type: "sets".to_string(),
            });
        }

        let updated_at = listing.data.iter().filter_map(PokemonSet::updated_at).max();
        info!(sets = listing.data.len(), updated_at = ?updated_at, "Resolved set listing");

        Ok(SourceDescriptor {
            dataset_id: source.id.clone(),
            dataset_type: "paged".to_string(),
            download_url: cards_url.to_string(),
            size: None,
            updated_at,
            partitions: listing.data.into_iter().map(|set| set.id).collect(),
        })
    }

    /// Local copy of the dataset, from cache when fresh, else downloaded
    #[instrument(skip_all, fields(source = %source.id))]
    pub async fn download(
        &self,
        source: &SourceSpec,
        descriptor: &SourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<DatasetFile> {
        if let Some(cached) = self.cache.fresh(&source.id).await? {
            info!(
                path = %cached.path.display(),
                bytes = cached.bytes,
                age_secs = cached.age.as_secs(),
                "Reusing cached dataset"
            );
            return Ok(DatasetFile {
                path: cached.path,
                bytes: cached.bytes,
                from_cache: true,
                sha256: None,
            });
        }

        if let SourceEndpoint::Paged { page_size, .. } = &source.endpoint {
            return self.download_pages(source, descriptor, *page_size, cancel).await;
        }

        let url = descriptor.download_url.as_str();
        info!(url, declared_bytes = descriptor.size, "Downloading dataset");

        retry_with_backoff(&self.retry, cancel, url, move |_| {
            self.download_once(source, descriptor)
        })
            .await
            .into_result(url)
    }

    async fn download_once(
        &self,
        source: &SourceSpec,
        descriptor: &SourceDescriptor,
    ) -> Result<DatasetFile> {
        let url = descriptor.download_url.as_str();
        let response = self.send_checked(source, url, None).await?;
        let mut writer = self.cache.writer(&source.id).await?;
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.timeout, body.next())
                .await
                .map_err(|_| SyncError::Stalled {
                    url: url.to_string(),
                    secs: self.timeout.as_secs(),
                })?;
            match next {
                Some(chunk) => writer.write_chunk(&chunk?).await?,
                None => break,
            }
        }

        // A short body must never replace the cache entry
        if let Some(expected) = descriptor.size {
            let received = writer.bytes_written();
            if received != expected {
                return Err(SyncError::IncompleteDownload {
                    url: url.to_string(),
                    expected,
                    received,
                });
            }
        }

        let written = writer.commit().await?;
        info!(
            path = %written.path.display(),
            bytes = written.bytes,
            sha256 = %written.sha256,
            "Dataset downloaded"
        );

        Ok(DatasetFile {
            path: written.path,
            bytes: written.bytes,
            from_cache: false,
            sha256: Some(written.sha256),
        })
    }

    /// Fetch every page of every set into one cache entry
    ///
    /// Each page is retried on its own. A set ends at an empty or short page, or
    /// once the provider's `totalCount` has been reached.
    async fn download_pages(
        &self,
        source: &SourceSpec,
        descriptor: &SourceDescriptor,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<DatasetFile> {
        let cards_url = descriptor.download_url.as_str();
        let page_size = page_size.max(1);
        info!(sets = descriptor.partitions.len(), page_size, "Downloading card pages");

        let mut writer = self.cache.writer(&source.id).await?;
        writer.write_chunk(b"[").await?;
        let mut total = 0usize;

        for set_id in &descriptor.partitions {
            let mut page = 1u32;
            let mut set_cards = 0usize;

            loop {
                let page_url = cards_page_url(cards_url, set_id, page, page_size)?;
                let url = page_url.as_str();
                let cards: CardPage = retry_with_backoff(&self.retry, cancel, url, move |_| async move {
                    let response = self.send_checked(source, url, Some(self.timeout)).await?;
                    Ok(response.json::<CardPage>().await?)
                })
                .await
                .into_result(url)?;

                for card in &cards.data {
                    if total > 0 {
                        writer.write_chunk(b",").await?;
                    }
                    writer.write_chunk(card.to_string().as_bytes()).await?;
                    total += 1;
                }

                let fetched = cards.data.len();
                set_cards += fetched;
                debug!(set = %set_id, page, cards = fetched, "Fetched card page");

                let reached_total = cards.total_count.is_some_and(|n| set_cards >= n);
                if fetched < page_size as usize || reached_total {
                    break;
                }
                page += 1;
            }

            info!(set = %set_id, cards = set_cards, pages = page, "Fetched set");
        }

        writer.write_chunk(b"]").await?;
        let written = writer.commit().await?;
        info!(
            path = %written.path.display(),
            cards = total,
            bytes = written.bytes,
            "Card pages downloaded"
        );

        Ok(DatasetFile {
            path: written.path,
            bytes: written.bytes,
            from_cache: false,
            sha256: Some(written.sha256),
        })
    }

    fn request(&self, source: &SourceSpec, url: &str) -> RequestBuilder {
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &source.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        request
    }

    /// Send a GET and turn non-2xx responses into [`SyncError::HttpStatus`]
    async fn send_checked(
        &self,
        source: &SourceSpec,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let mut request = self.request(source, url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }

        Err(SyncError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

fn cards_page_url(cards_url: &str, set_id: &str, page: u32, page_size: u32) -> Result<reqwest::Url> {
    reqwest::Url::parse_with_params(
        cards_url,
        &[
            ("q", format!("set.id:{set_id}")),
            ("page", page.to_string()),
            ("pageSize", page_size.to_string()),
        ],
    )
    .map_err(|e| SyncError::Config(format!("Invalid cards URL {cards_url}: {e}")))
}
