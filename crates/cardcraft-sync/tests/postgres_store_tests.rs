//! PostgreSQL store tests
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test -p cardcraft-sync --test postgres_store_tests -- --ignored --nocapture
//! ```

mod common;

use cardcraft_sync::catalog::{
    Ability, Attack, CatalogRecord, Game, GameExtension, MtgExtension, NaturalKey,
    PokemonExtension, TypeModifier,
};
use cardcraft_sync::storage::{
    CatalogStore, ImportCursorStore, PgCatalogStore, PgImportCursorStore,
};
use chrono::{Duration, NaiveDate, SubsecRound, Utc};
use common::{init_test_tracing, mtg_dataset, mtg_provider, pipeline, TestPostgres};
use serial_test::serial;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn record(game: Game, set_code: &str, number: &str) -> CatalogRecord {
    // Postgres keeps microseconds
    let now = Utc::now().trunc_subsecs(6);
    CatalogRecord {
        id: Uuid::new_v4(),
        name: format!("{set_code} #{number}"),
        game,
        set_code: set_code.to_string(),
        set_name: "Integration Set".to_string(),
        number: number.to_string(),
        rarity: "rare".to_string(),
        image_url: format!("https://img.test/{set_code}/{number}.png"),
        created_at: now,
        updated_at: now,
    }
}

fn mtg_extension() -> GameExtension {
    GameExtension::Mtg(MtgExtension {
        mana_cost: "{2}{U}{U}".to_string(),
        cmc: 4.0,
        type_line: "Creature — Sphinx".to_string(),
        oracle_text: "Flying".to_string(),
        power: "4".to_string(),
        toughness: "4".to_string(),
        colors: vec!["U".to_string()],
        color_identity: vec!["U".to_string()],
        keywords: vec!["Flying".to_string()],
        legalities: BTreeMap::from([("modern".to_string(), "legal".to_string())]),
        nonfoil: true,
        set_type: "expansion".to_string(),
        released_at: NaiveDate::from_ymd_opt(2024, 2, 9),
        ..MtgExtension::default()
    })
}

fn pokemon_extension() -> GameExtension {
    GameExtension::Pokemon(PokemonExtension {
        hp: Some(120),
        evolves_from: Some("Charmeleon".to_string()),
        types: vec!["Fire".to_string()],
        subtypes: vec!["Stage 2".to_string()],
        supertype: "Pokémon".to_string(),
        abilities: vec![Ability {
            name: "Energy Burn".to_string(),
            text: "All Energy attached to Charizard are Fire Energy.".to_string(),
            kind: "Pokémon Power".to_string(),
        }],
        attacks: vec![Attack {
            name: "Fire Spin".to_string(),
            cost: vec!["Fire".to_string(); 4],
            converted_energy_cost: 4,
            damage: "100".to_string(),
            text: "Discard 2 Energy cards.".to_string(),
        }],
        weaknesses: vec![TypeModifier {
            kind: "Water".to_string(),
            value: "×2".to_string(),
        }],
        retreat_cost: vec!["Colorless".to_string(); 3],
        ..PokemonExtension::default()
    })
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_record_and_extension_round_trip() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = PgCatalogStore::new(pg.pool().clone());

    let mtg = record(Game::Mtg, "neo", "57");
    let pokemon = record(Game::Pokemon, "base1", "4");
    let mut tx = store.begin().await.unwrap();
    tx.create_record(&mtg).await.unwrap();
    tx.create_extension(mtg.id, &mtg_extension()).await.unwrap();
    tx.create_record(&pokemon).await.unwrap();
    tx.create_extension(pokemon.id, &pokemon_extension()).await.unwrap();
    tx.commit().await.unwrap();

    let found = store
        .find_many_by_natural_keys(&[
            mtg.natural_key(),
            pokemon.natural_key(),
            NaturalKey::new(Game::Mtg, "neo", "999"),
        ])
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    let stored_mtg = &found[&mtg.natural_key()];
    assert_eq!(stored_mtg.record, mtg);
    assert_eq!(stored_mtg.extension, Some(mtg_extension()));
    let stored_pokemon = &found[&pokemon.natural_key()];
    assert_eq!(stored_pokemon.extension, Some(pokemon_extension()));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_rollback_discards_batch_writes() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = PgCatalogStore::new(pg.pool().clone());

    let kept = record(Game::Mtg, "neo", "1");
    let mut tx = store.begin().await.unwrap();
    tx.create_record(&kept).await.unwrap();
    tx.commit().await.unwrap();

    let discarded = record(Game::Mtg, "neo", "2");
    let mut tx = store.begin().await.unwrap();
    tx.create_record(&discarded).await.unwrap();
    tx.create_extension(discarded.id, &mtg_extension()).await.unwrap();
    // Same natural key under a new id violates the unique constraint
    let duplicate = CatalogRecord {
        id: Uuid::new_v4(),
        ..kept.clone()
    };
    assert!(tx.create_record(&duplicate).await.is_err());
    tx.rollback().await.unwrap();

    assert!(store.find_by_natural_key(&kept.natural_key()).await.unwrap().is_some());
    assert!(store
        .find_by_natural_key(&discarded.natural_key())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_missing_extension_is_reported_as_absent() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = PgCatalogStore::new(pg.pool().clone());

    let bare = record(Game::Pokemon, "base1", "58");
    let mut tx = store.begin().await.unwrap();
    tx.create_record(&bare).await.unwrap();
    tx.commit().await.unwrap();

    let found = store.find_by_natural_key(&bare.natural_key()).await.unwrap().unwrap();
    assert_eq!(found.record.id, bare.id);
    assert!(found.extension.is_none());

    let mut tx = store.begin().await.unwrap();
    assert!(tx.update_extension(bare.id, &pokemon_extension()).await.is_err());
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_cursor_never_moves_backwards() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let cursors = PgImportCursorStore::new(pg.pool().clone());

    assert_eq!(cursors.get("mtg").await.unwrap(), None);

    let later = Utc::now().trunc_subsecs(6);
    cursors.set("mtg", later).await.unwrap();
    cursors.set("mtg", later - Duration::hours(1)).await.unwrap();

    assert_eq!(cursors.get("mtg").await.unwrap(), Some(later));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_full_import_against_postgres() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let server = mtg_provider(&mtg_dataset(250)).await;
    let cache = TempDir::new().unwrap();

    let pipeline = pipeline(
        vec![common::mtg_source(&server)],
        cache.path(),
        Arc::new(PgCatalogStore::new(pg.pool().clone())),
        Arc::new(PgImportCursorStore::new(pg.pool().clone())),
    );

    let first = pipeline.run_import("mtg").await.unwrap();
    assert_eq!(first.created, 250);
    assert!(first.cursor_advanced);

    let second = pipeline.run_import("mtg").await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 250);

    let (cards,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cards")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    let (extensions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mtg_cards")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(cards, 250);
    assert_eq!(extensions, 250);
}
