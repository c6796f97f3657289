//! Postgres-backed catalog and cursor stores
//!
//! Expects the `cards`, `mtg_cards`, `pokemon_cards` and `import_cursors`
//! tables managed by the application's migrations. Batch lookups join the
//! catalog against `UNNEST` of the requested keys so that one query serves a
//! whole batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

use super::{CatalogStore, CatalogTransaction, ImportCursorStore};
use crate::catalog::{
    Ability, Attack, CatalogRecord, ExistingCard, Game, GameExtension, MtgExtension, NaturalKey,
    PokemonExtension, TypeModifier,
};
use crate::error::{Result, SyncError};

const CARD_COLUMNS: &str = "c.id, c.name, c.game, c.set_code, c.set_name, c.number, c.rarity, \
     c.image_url, c.created_at, c.updated_at";

const MTG_COLUMNS: &str = "e.card_id AS ext_card_id, e.mana_cost, e.cmc, e.type_line, \
     e.oracle_text, e.power, e.toughness, e.loyalty, e.colors, e.color_identity, e.keywords, \
     e.legalities, e.reserved, e.foil, e.nonfoil, e.promo, e.reprint, e.variation, e.set_type, \
     e.released_at";

const POKEMON_COLUMNS: &str = "e.card_id AS ext_card_id, e.hp, e.evolves_from, e.evolves_to, \
     e.types, e.subtypes, e.supertype, e.rules, e.abilities, e.attacks, e.weaknesses, \
     e.resistances, e.retreat_cost";

/// Extension table and its selected columns for a game
fn extension_source(game: Game) -> (&'static str, &'static str) {
    match game {
        Game::Mtg => ("mtg_cards", MTG_COLUMNS),
        Game::Pokemon => ("pokemon_cards", POKEMON_COLUMNS),
    }
}

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<ExistingCard>> {
        let (table, columns) = extension_source(key.game);
        let sql = format!(
            "SELECT {CARD_COLUMNS}, {columns} FROM cards c \
             LEFT JOIN {table} e ON e.card_id = c.id \
             WHERE c.game = $1 AND c.set_code = $2 AND c.number = $3"
        );

        let row = sqlx::query(&sql)
            .bind(key.game.as_str())
            .bind(&key.set_code)
            .bind(&key.number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(existing_from_row).transpose()
    }

    async fn find_many_by_natural_keys(
        &self,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, ExistingCard>> {
        let mut by_game: BTreeMap<Game, (Vec<String>, Vec<String>)> = BTreeMap::new();
        for key in keys {
            let (sets, numbers) = by_game.entry(key.game).or_default();
            sets.push(key.set_code.clone());
            numbers.push(key.number.clone());
        }

        let mut found = HashMap::with_capacity(keys.len());
        for (game, (sets, numbers)) in by_game {
            let (table, columns) = extension_source(game);
            let sql = format!(
                "SELECT {CARD_COLUMNS}, {columns} FROM cards c \
                 JOIN UNNEST($2::text[], $3::text[]) AS k(set_code, number) \
                   ON c.set_code = k.set_code AND c.number = k.number \
                 LEFT JOIN {table} e ON e.card_id = c.id \
                 WHERE c.game = $1"
            );

            let rows = sqlx::query(&sql)
                .bind(game.as_str())
                .bind(&sets)
                .bind(&numbers)
                .fetch_all(&self.pool)
                .await?;

            debug!(game = %game, requested = sets.len(), found = rows.len(), "Batch lookup");
            for row in &rows {
                let existing = existing_from_row(row)?;
                found.insert(existing.record.natural_key(), existing);
            }
        }

        Ok(found)
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCatalogTransaction { tx }))
    }
}

fn existing_from_row(row: &PgRow) -> Result<ExistingCard> {
    let game: String = row.try_get("game")?;
    let game: Game = game
        .parse()
        .map_err(|_| SyncError::Storage(format!("unknown game '{game}' in cards table")))?;

    let record = CatalogRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        game,
        set_code: row.try_get("set_code")?,
        set_name: row.try_get("set_name")?,
        number: row.try_get("number")?,
        rarity: row.try_get("rarity")?,
        image_url: row.try_get("image_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    };

    let ext_card_id: Option<Uuid> = row.try_get("ext_card_id")?;
    let extension = match ext_card_id {
        None => None,
        Some(_) => Some(match game {
            Game::Mtg => GameExtension::Mtg(mtg_from_row(row)?),
            Game::Pokemon => GameExtension::Pokemon(pokemon_from_row(row)?),
        }),
    };

    Ok(ExistingCard { record, extension })
}

fn mtg_from_row(row: &PgRow) -> std::result::Result<MtgExtension, sqlx::Error> {
    let legalities: Json<BTreeMap<String, String>> = row.try_get("legalities")?;
    Ok(MtgExtension {
        mana_cost: row.try_get("mana_cost")?,
        cmc: row.try_get("cmc")?,
        type_line: row.try_get("type_line")?,
        oracle_text: row.try_get("oracle_text")?,
        power: row.try_get("power")?,
        toughness: row.try_get("toughness")?,
        loyalty: row.try_get("loyalty")?,
        colors: row.try_get("colors")?,
        color_identity: row.try_get("color_identity")?,
        keywords: row.try_get("keywords")?,
        legalities: legalities.0,
        reserved: row.try_get("reserved")?,
        foil: row.try_get("foil")?,
        nonfoil: row.try_get("nonfoil")?,
        promo: row.try_get("promo")?,
        reprint: row.try_get("reprint")?,
        variation: row.try_get("variation")?,
        set_type: row.try_get("set_type")?,
        released_at: row.try_get("released_at")?,
    })
}

fn pokemon_from_row(row: &PgRow) -> std::result::Result<PokemonExtension, sqlx::Error> {
    let abilities: Json<Vec<Ability>> = row.try_get("abilities")?;
    let attacks: Json<Vec<Attack>> = row.try_get("attacks")?;
    let weaknesses: Json<Vec<TypeModifier>> = row.try_get("weaknesses")?;
    let resistances: Json<Vec<TypeModifier>> = row.try_get("resistances")?;
    Ok(PokemonExtension {
        hp: row.try_get("hp")?,
        evolves_from: row.try_get("evolves_from")?,
        evolves_to: row.try_get("evolves_to")?,
        types: row.try_get("types")?,
        subtypes: row.try_get("subtypes")?,
        supertype: row.try_get("supertype")?,
        rules: row.try_get("rules")?,
        abilities: abilities.0,
        attacks: attacks.0,
        weaknesses: weaknesses.0,
        resistances: resistances.0,
        retreat_cost: row.try_get("retreat_cost")?,
    })
}

pub struct PgCatalogTransaction {
    tx: Transaction<'static, Postgres>,
}

const INSERT_MTG: &str = "INSERT INTO mtg_cards (card_id, mana_cost, cmc, type_line, oracle_text, \
     power, toughness, loyalty, colors, color_identity, keywords, legalities, reserved, foil, \
     nonfoil, promo, reprint, variation, set_type, released_at, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
     $19, $20, NOW(), NOW())";

const UPDATE_MTG: &str = "UPDATE mtg_cards SET mana_cost = $2, cmc = $3, type_line = $4, \
     oracle_text = $5, power = $6, toughness = $7, loyalty = $8, colors = $9, \
     color_identity = $10, keywords = $11, legalities = $12, reserved = $13, foil = $14, \
     nonfoil = $15, promo = $16, reprint = $17, variation = $18, set_type = $19, \
     released_at = $20, updated_at = NOW() WHERE card_id = $1";

const INSERT_POKEMON: &str = "INSERT INTO pokemon_cards (card_id, hp, evolves_from, evolves_to, \
     types, subtypes, supertype, rules, abilities, attacks, weaknesses, resistances, \
     retreat_cost, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())";

const UPDATE_POKEMON: &str = "UPDATE pokemon_cards SET hp = $2, evolves_from = $3, \
     evolves_to = $4, types = $5, subtypes = $6, supertype = $7, rules = $8, abilities = $9, \
     attacks = $10, weaknesses = $11, resistances = $12, retreat_cost = $13, \
     updated_at = NOW() WHERE card_id = $1";

fn bind_mtg<'q>(
    query: Query<'q, Postgres, PgArguments>,
    card_id: Uuid,
    ext: &'q MtgExtension,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(card_id)
        .bind(&ext.mana_cost)
        .bind(ext.cmc)
        .bind(&ext.type_line)
        .bind(&ext.oracle_text)
        .bind(&ext.power)
        .bind(&ext.toughness)
        .bind(&ext.loyalty)
        .bind(&ext.colors)
        .bind(&ext.color_identity)
        .bind(&ext.keywords)
        .bind(Json(&ext.legalities))
        .bind(ext.reserved)
        .bind(ext.foil)
        .bind(ext.nonfoil)
        .bind(ext.promo)
        .bind(ext.reprint)
        .bind(ext.variation)
        .bind(&ext.set_type)
        .bind(ext.released_at)
}

fn bind_pokemon<'q>(
    query: Query<'q, Postgres, PgArguments>,
    card_id: Uuid,
    ext: &'q PokemonExtension,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(card_id)
        .bind(ext.hp)
        .bind(&ext.evolves_from)
        .bind(&ext.evolves_to)
        .bind(&ext.types)
        .bind(&ext.subtypes)
        .bind(&ext.supertype)
        .bind(&ext.rules)
        .bind(Json(&ext.abilities))
        .bind(Json(&ext.attacks))
        .bind(Json(&ext.weaknesses))
        .bind(Json(&ext.resistances))
        .bind(&ext.retreat_cost)
}

fn expect_one_row(rows_affected: u64, what: &str, id: Uuid) -> Result<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(SyncError::Storage(format!("no {what} row for card {id}")))
    }
}

#[async_trait]
impl CatalogTransaction for PgCatalogTransaction {
    async fn create_record(&mut self, record: &CatalogRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO cards (id, name, game, set_code, set_name, number, rarity, image_url, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.game.as_str())
        .bind(&record.set_code)
        .bind(&record.set_name)
        .bind(&record.number)
        .bind(&record.rarity)
        .bind(&record.image_url)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_record(&mut self, record: &CatalogRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE cards SET name = $2, set_name = $3, rarity = $4, image_url = $5, \
             updated_at = $6 WHERE id = $1",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.set_name)
        .bind(&record.rarity)
        .bind(&record.image_url)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        expect_one_row(result.rows_affected(), "cards", record.id)
    }

    async fn create_extension(&mut self, card_id: Uuid, extension: &GameExtension) -> Result<()> {
        let query = match extension {
            GameExtension::Mtg(ext) => bind_mtg(sqlx::query(INSERT_MTG), card_id, ext),
            GameExtension::Pokemon(ext) => bind_pokemon(sqlx::query(INSERT_POKEMON), card_id, ext),
        };
        query.execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn update_extension(&mut self, card_id: Uuid, extension: &GameExtension) -> Result<()> {
        let (query, table) = match extension {
            GameExtension::Mtg(ext) => (bind_mtg(sqlx::query(UPDATE_MTG), card_id, ext), "mtg_cards"),
            GameExtension::Pokemon(ext) => (
                bind_pokemon(sqlx::query(UPDATE_POKEMON), card_id, ext),
                "pokemon_cards",
            ),
        };
        let result = query.execute(&mut *self.tx).await?;
        expect_one_row(result.rows_affected(), table, card_id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgImportCursorStore {
    pool: PgPool,
}

impl PgImportCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportCursorStore for PgImportCursorStore {
    async fn get(&self, source_id: &str) -> Result<Option<DateTime<Utc>>> {
        let at = sqlx::query_scalar("SELECT last_success_at FROM import_cursors WHERE source_id = $1")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(at)
    }

    async fn set(&self, source_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO import_cursors (source_id, last_success_at) VALUES ($1, $2) \
             ON CONFLICT (source_id) DO UPDATE \
             SET last_success_at = GREATEST(import_cursors.last_success_at, EXCLUDED.last_success_at)",
        )
        .bind(source_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
