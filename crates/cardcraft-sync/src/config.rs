//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::Game;
use crate::error::{Result, SyncError};
use crate::pool::PoolConfig;
use crate::source::retry::RetryPolicy;
use crate::source::{ClientSettings, SourceEndpoint, SourceSpec};

// ============================================================================
// Defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/cardcraft";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

pub const DEFAULT_BATCH_SIZE: usize = 100;

pub const DEFAULT_WORKERS: usize = 8;

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Default scheduler interval in seconds (1 day).
pub const DEFAULT_INTERVAL_SECS: u64 = 86_400;

pub const DEFAULT_CACHE_DIR: &str = "./.cache/cardcraft";

pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 86_400;

/// Default HTTP timeout in seconds; idle timeout for dataset bodies.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2_000;

pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

pub const DEFAULT_USER_AGENT: &str = "CardCraftSync/0.1";

pub const DEFAULT_SOURCES: &str = "mtg";

pub const DEFAULT_SCRYFALL_BULK_DATA_URL: &str = "https://api.scryfall.com/bulk-data";

pub const DEFAULT_SCRYFALL_DATASET_TYPE: &str = "default_cards";

/// Newest sets first, so a fresh install gets current cards early
pub const DEFAULT_POKEMON_SETS_URL: &str = "https://api.pokemontcg.io/v2/sets?orderBy=-releaseDate";

pub const DEFAULT_POKEMON_CARDS_URL: &str = "https://api.pokemontcg.io/v2/cards";

/// Largest page the Pokémon TCG API serves
pub const DEFAULT_POKEMON_PAGE_SIZE: u32 = 250;

/// Source ids this binary knows how to build
pub const KNOWN_SOURCES: [&str; 2] = ["mtg", "pokemon"];

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub queue_depth: usize,
    pub max_consecutive_failures: u32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SourcesConfig {
    /// Enabled source ids, in run order
    pub enabled: Vec<String>,
    pub scryfall_bulk_data_url: String,
    pub scryfall_dataset_type: String,
    pub pokemon_sets_url: String,
    pub pokemon_cards_url: String,
    pub pokemon_page_size: u32,
    /// A bulk JSON array to use instead of the paged API
    pub pokemon_dataset_url: Option<String>,
    pub pokemon_api_key: Option<String>,
}

impl SyncConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an arbitrary variable lookup, without validating
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let workers = parsed(&lookup, "SYNC_WORKERS", DEFAULT_WORKERS);

        Self {
            database: DatabaseConfig {
                url: text("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: parsed(
                    &lookup,
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
            },
            pipeline: PipelineConfig {
                batch_size: parsed(&lookup, "SYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                workers,
                queue_depth: parsed(&lookup, "SYNC_QUEUE_DEPTH", workers.saturating_mul(2)),
                max_consecutive_failures: parsed(
                    &lookup,
                    "SYNC_MAX_CONSECUTIVE_FAILURES",
                    DEFAULT_MAX_CONSECUTIVE_FAILURES,
                ),
                interval_secs: parsed(&lookup, "SYNC_INTERVAL_SECS", DEFAULT_INTERVAL_SECS),
            },
            http: HttpConfig {
                user_agent: text("SYNC_USER_AGENT", DEFAULT_USER_AGENT),
                timeout_secs: parsed(&lookup, "SYNC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
                max_retries: parsed(&lookup, "SYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                retry_base_delay_ms: parsed(
                    &lookup,
                    "SYNC_RETRY_BASE_DELAY_MS",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                ),
                retry_max_delay_ms: parsed(
                    &lookup,
                    "SYNC_RETRY_MAX_DELAY_MS",
                    DEFAULT_RETRY_MAX_DELAY_MS,
                ),
            },
            cache: CacheConfig {
                dir: PathBuf::from(text("SYNC_CACHE_DIR", DEFAULT_CACHE_DIR)),
                max_age_secs: parsed(&lookup, "SYNC_CACHE_MAX_AGE_SECS", DEFAULT_CACHE_MAX_AGE_SECS),
            },
            sources: SourcesConfig {
                enabled: text("SYNC_SOURCES", DEFAULT_SOURCES)
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
                scryfall_bulk_data_url: text("SCRYFALL_BULK_DATA_URL", DEFAULT_SCRYFALL_BULK_DATA_URL),
                scryfall_dataset_type: text("SCRYFALL_DATASET_TYPE", DEFAULT_SCRYFALL_DATASET_TYPE),
                pokemon_sets_url: text("POKEMON_SETS_URL", DEFAULT_POKEMON_SETS_URL),
                pokemon_cards_url: text("POKEMON_CARDS_URL", DEFAULT_POKEMON_CARDS_URL),
                pokemon_page_size: parsed(&lookup, "POKEMON_PAGE_SIZE", DEFAULT_POKEMON_PAGE_SIZE),
                pokemon_dataset_url: optional("POKEMON_DATASET_URL"),
                pokemon_api_key: optional("POKEMON_TCG_API_KEY"),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(config_error("Database URL cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(config_error("Database max_connections must be greater than 0"));
        }
        if self.pipeline.batch_size == 0 {
            return Err(config_error("SYNC_BATCH_SIZE must be greater than 0"));
        }
        if self.pipeline.workers == 0 {
            return Err(config_error("SYNC_WORKERS must be greater than 0"));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(config_error("SYNC_QUEUE_DEPTH must be greater than 0"));
        }
        if self.pipeline.interval_secs == 0 {
            return Err(config_error("SYNC_INTERVAL_SECS must be greater than 0"));
        }
        if self.http.max_retries == 0 {
            return Err(config_error("SYNC_MAX_RETRIES must be greater than 0"));
        }
        if self.http.timeout_secs == 0 {
            return Err(config_error("SYNC_HTTP_TIMEOUT_SECS must be greater than 0"));
        }
        if self.sources.enabled.is_empty() {
            return Err(config_error("SYNC_SOURCES must name at least one source"));
        }

        for id in &self.sources.enabled {
            if !KNOWN_SOURCES.contains(&id.as_str()) {
                return Err(SyncError::Config(format!(
                    "Unknown source '{id}' in SYNC_SOURCES (known: {})",
                    KNOWN_SOURCES.join(", ")
                )));
            }
        }

        if self.sources.pokemon_page_size == 0 {
            return Err(config_error("POKEMON_PAGE_SIZE must be greater than 0"));
        }

        if self.http.retry_base_delay_ms > self.http.retry_max_delay_ms {
            tracing::warn!(
                base_ms = self.http.retry_base_delay_ms,
                max_ms = self.http.retry_max_delay_ms,
                "Retry base delay exceeds the maximum; every retry waits the maximum"
            );
        }

        Ok(())
    }

    /// Specs for every enabled source, in configured order
    pub fn source_specs(&self) -> Result<Vec<SourceSpec>> {
        self.sources
            .enabled
            .iter()
            .map(|id| self.source_spec(id))
            .collect()
    }

    fn source_spec(&self, id: &str) -> Result<SourceSpec> {
        match id {
            "mtg" => Ok(SourceSpec {
                id: id.to_string(),
                game: Game::Mtg,
                endpoint: SourceEndpoint::Listing {
                    url: self.sources.scryfall_bulk_data_url.clone(),
                    dataset_type: self.sources.scryfall_dataset_type.clone(),
                },
                api_key: None,
            }),
            "pokemon" => {
                let endpoint = match &self.sources.pokemon_dataset_url {
                    Some(url) => SourceEndpoint::Direct { url: url.clone() },
                    None => SourceEndpoint::Paged {
                        sets_url: self.sources.pokemon_sets_url.clone(),
                        cards_url: self.sources.pokemon_cards_url.clone(),
                        page_size: self.sources.pokemon_page_size,
                    },
                };
                Ok(SourceSpec {
                    id: id.to_string(),
                    game: Game::Pokemon,
                    endpoint,
                    api_key: self.sources.pokemon_api_key.clone(),
                })
            },
            other => Err(SyncError::UnknownSource(other.to_string())),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            user_agent: self.http.user_agent.clone(),
            timeout: Duration::from_secs(self.http.timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.http.max_retries,
                base_delay: Duration::from_millis(self.http.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.http.retry_max_delay_ms),
            },
            cache_dir: self.cache.dir.clone(),
            cache_max_age: Duration::from_secs(self.cache.max_age_secs),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.pipeline.workers,
            queue_depth: self.pipeline.queue_depth,
            max_consecutive_failures: self.pipeline.max_consecutive_failures,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.interval_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    lookup(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn config_error(message: &str) -> SyncError {
    SyncError::Config(message.to_string())
}
