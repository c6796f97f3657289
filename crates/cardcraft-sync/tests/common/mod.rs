//! Shared fixtures for cardcraft-sync integration tests
//!
//! - a wiremock provider serving a Scryfall-style listing and dataset
//! - a paged Pokémon TCG API with set listing and card pages
//! - dataset builders for both games
//! - pipelines wired to in-memory stores with fast retries
//! - a PostgreSQL container with the catalog schema applied (requires Docker)

#![allow(dead_code)]

use anyhow::{Context, Result};
use cardcraft_sync::catalog::Game;
use cardcraft_sync::pool::PoolConfig;
use cardcraft_sync::source::retry::RetryPolicy;
use cardcraft_sync::source::{ClientSettings, SourceClient, SourceEndpoint, SourceSpec};
use cardcraft_sync::storage::{CatalogStore, ImportCursorStore};
use cardcraft_sync::SyncPipeline;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const LISTING_PATH: &str = "/bulk-data";
pub const MTG_DATASET_PATH: &str = "/files/default-cards.json";
pub const POKEMON_DATASET_PATH: &str = "/pokemon/cards.json";
pub const POKEMON_SETS_PATH: &str = "/v2/sets";
pub const POKEMON_CARDS_PATH: &str = "/v2/cards";
pub const BATCH_SIZE: usize = 100;

/// Initialize tracing for tests; safe to call from every test
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,cardcraft_sync=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Datasets
// ============================================================================

/// A Scryfall card object with collector number `i` in set `tst`
pub fn mtg_card(i: usize) -> Value {
    json!({
        "object": "card",
        "id": format!("{i:08}-0000-4000-8000-000000000000"),
        "name": format!("Test Card {i}"),
        "set": "tst",
        "set_name": "Test Set",
        "collector_number": i.to_string(),
        "rarity": "common",
        "mana_cost": "{1}{G}",
        "cmc": 2.0,
        "type_line": "Creature — Elf Druid",
        "oracle_text": "{T}: Add {G}.",
        "power": "1",
        "toughness": "1",
        "colors": ["G"],
        "color_identity": ["G"],
        "keywords": [],
        "legalities": {"standard": "not_legal", "modern": "legal", "legacy": "legal"},
        "set_type": "expansion",
        "released_at": "2024-02-09",
        "image_uris": {"large": format!("https://cards.test/large/{i}.jpg")}
    })
}

pub fn mtg_dataset(count: usize) -> Vec<Value> {
    (0..count).map(mtg_card).collect()
}

pub fn pokemon_card(number: usize) -> Value {
    pokemon_set_card("base1", number)
}

pub fn pokemon_set_card(set_id: &str, number: usize) -> Value {
    json!({
        "id": format!("{set_id}-{number}"),
        "name": format!("Pokémon {number}"),
        "supertype": "Pokémon",
        "subtypes": ["Basic"],
        "hp": "60",
        "types": ["Grass"],
        "set": {"id": set_id, "name": format!("Set {set_id}"), "updatedAt": "2022/10/10 15:12:00"},
        "number": number.to_string(),
        "rarity": "Common",
        "attacks": [{
            "name": "Tackle",
            "cost": ["Colorless", "Colorless"],
            "convertedEnergyCost": 2,
            "damage": "20",
            "text": ""
        }],
        "weaknesses": [{"type": "Fire", "value": "×2"}],
        "retreatCost": ["Colorless"],
        "images": {"large": format!("https://images.test/{set_id}/{number}_hires.png")}
    })
}

pub fn body(records: &[Value]) -> String {
    Value::Array(records.to_vec()).to_string()
}

// ============================================================================
// Mock provider
// ============================================================================

/// Serve a listing whose `default_cards` entry points at the mock's dataset path
pub async fn mount_listing(server: &MockServer, updated_at: Option<&str>) {
    mount_listing_entry(server, updated_at, None).await;
}

/// Like [`mount_listing`], but the entry declares the dataset's byte size
pub async fn mount_sized_listing(server: &MockServer, size: usize) {
    mount_listing_entry(server, None, Some(size)).await;
}

async fn mount_listing_entry(server: &MockServer, updated_at: Option<&str>, size: Option<usize>) {
    let mut entry = json!({
        "object": "bulk_data",
        "id": "27bf3214-1271-490b-bdfe-c0be6c23d02e",
        "type": "default_cards",
        "name": "Default Cards",
        "download_uri": format!("{}{MTG_DATASET_PATH}", server.uri())
    });
    if let Some(updated_at) = updated_at {
        entry["updated_at"] = json!(updated_at);
    }
    if let Some(size) = size {
        entry["size"] = json!(size);
    }

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "has_more": false,
            "data": [entry]
        })))
        .mount(server)
        .await;
}

pub async fn mount_dataset(server: &MockServer, records: &[Value]) {
    Mock::given(method("GET"))
        .and(path(MTG_DATASET_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(body(records)),
        )
        .mount(server)
        .await;
}

/// Listing plus dataset, the common case
pub async fn mtg_provider(records: &[Value]) -> MockServer {
    let server = MockServer::start().await;
    mount_sized_listing(&server, body(records).len()).await;
    mount_dataset(&server, records).await;
    server
}

/// Serve the set listing, newest first, each set stamped with `updated_at`
pub async fn mount_sets(server: &MockServer, set_ids: &[&str], updated_at: &str) {
    let sets: Vec<Value> = set_ids
        .iter()
        .map(|id| json!({"id": id, "name": format!("Set {id}"), "updatedAt": updated_at}))
        .collect();
    Mock::given(method("GET"))
        .and(path(POKEMON_SETS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": sets,
            "count": set_ids.len(),
            "totalCount": set_ids.len()
        })))
        .mount(server)
        .await;
}

/// Serve one page of a set's cards; `total_count` is left out when `None`
pub async fn mount_card_page(
    server: &MockServer,
    set_id: &str,
    page: u32,
    cards: &[Value],
    total_count: Option<usize>,
) {
    let mut payload = json!({"data": cards, "page": page, "count": cards.len()});
    if let Some(total_count) = total_count {
        payload["totalCount"] = json!(total_count);
    }
    Mock::given(method("GET"))
        .and(path(POKEMON_CARDS_PATH))
        .and(query_param("q", format!("set.id:{set_id}")))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload))
        .expect(1)
        .mount(server)
        .await;
}

// ============================================================================
// Pipelines
// ============================================================================

pub fn mtg_source(server: &MockServer) -> SourceSpec {
    SourceSpec {
        id: "mtg".to_string(),
        game: Game::Mtg,
        endpoint: SourceEndpoint::Listing {
            url: format!("{}{LISTING_PATH}", server.uri()),
            dataset_type: "default_cards".to_string(),
        },
        api_key: None,
    }
}

pub fn pokemon_source(server: &MockServer, api_key: &str) -> SourceSpec {
    SourceSpec {
        id: "pokemon".to_string(),
        game: Game::Pokemon,
        endpoint: SourceEndpoint::Direct {
            url: format!("{}{POKEMON_DATASET_PATH}", server.uri()),
        },
        api_key: Some(api_key.to_string()),
    }
}

pub fn pokemon_paged_source(server: &MockServer, api_key: &str, page_size: u32) -> SourceSpec {
    SourceSpec {
        id: "pokemon".to_string(),
        game: Game::Pokemon,
        endpoint: SourceEndpoint::Paged {
            sets_url: format!("{}{POKEMON_SETS_PATH}?orderBy=-releaseDate", server.uri()),
            cards_url: format!("{}{POKEMON_CARDS_PATH}", server.uri()),
            page_size,
        },
        api_key: Some(api_key.to_string()),
    }
}

pub fn client_settings(cache_dir: &Path) -> ClientSettings {
    ClientSettings {
        user_agent: "CardCraftSync/test".to_string(),
        timeout: Duration::from_secs(10),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        cache_dir: cache_dir.to_path_buf(),
        cache_max_age: Duration::from_secs(3600),
    }
}

pub fn pipeline(
    sources: Vec<SourceSpec>,
    cache_dir: &Path,
    store: Arc<dyn CatalogStore>,
    cursors: Arc<dyn ImportCursorStore>,
) -> SyncPipeline {
    let client = SourceClient::new(&client_settings(cache_dir)).expect("client");
    SyncPipeline::new(client, store, cursors, sources)
        .with_batch_size(BATCH_SIZE)
        .with_pool_config(PoolConfig {
            workers: 4,
            queue_depth: 8,
            max_consecutive_failures: 5,
        })
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

const CATALOG_SCHEMA: &str = include_str!("../fixtures/catalog_schema.sql");

/// PostgreSQL container with the catalog schema applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::raw_sql(CATALOG_SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to apply catalog schema")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
