//! Catalog domain model
//!
//! A [`CatalogRecord`] is the game-agnostic card row. Everything that only makes
//! sense for one game lives in its [`GameExtension`] variant, owned 1:1 by the
//! record through `card_id`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::SyncError;

/// Supported trading-card games
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Mtg,
    Pokemon,
}

impl Game {
    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Mtg => "mtg",
            Game::Pokemon => "pokemon",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Game {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mtg" => Ok(Game::Mtg),
            "pokemon" => Ok(Game::Pokemon),
            other => Err(SyncError::Config(format!("unknown game: {other}"))),
        }
    }
}

/// `(game, set_code, number)`: unique per catalog and the reconciliation key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub game: Game,
    pub set_code: String,
    pub number: String,
}

impl NaturalKey {
    pub fn new(game: Game, set_code: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            game,
            set_code: set_code.into(),
            number: number.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.game, self.set_code, self.number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: Uuid,
    pub name: String,
    pub game: Game,
    pub set_code: String,
    pub set_name: String,
    pub number: String,
    pub rarity: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.game, self.set_code.clone(), self.number.clone())
    }
}

/// Per-game card details
#[derive(Debug, Clone, PartialEq)]
pub enum GameExtension {
    Mtg(MtgExtension),
    Pokemon(PokemonExtension),
}

impl GameExtension {
    pub fn game(&self) -> Game {
        match self {
            GameExtension::Mtg(_) => Game::Mtg,
            GameExtension::Pokemon(_) => Game::Pokemon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MtgExtension {
    pub mana_cost: String,
    pub cmc: f64,
    pub type_line: String,
    pub oracle_text: String,
    pub power: String,
    pub toughness: String,
    pub loyalty: String,
    pub colors: Vec<String>,
    pub color_identity: Vec<String>,
    pub keywords: Vec<String>,
    /// format -> legality ("legal", "banned", ...)
    pub legalities: BTreeMap<String, String>,
    pub reserved: bool,
    pub foil: bool,
    pub nonfoil: bool,
    pub promo: bool,
    pub reprint: bool,
    pub variation: bool,
    pub set_type: String,
    pub released_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PokemonExtension {
    pub hp: Option<i32>,
    pub evolves_from: Option<String>,
    pub evolves_to: Vec<String>,
    pub types: Vec<String>,
    pub subtypes: Vec<String>,
    pub supertype: String,
    pub rules: Vec<String>,
    pub abilities: Vec<Ability>,
    pub attacks: Vec<Attack>,
    pub weaknesses: Vec<TypeModifier>,
    pub resistances: Vec<TypeModifier>,
    pub retreat_cost: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ability {
    pub name: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Attack {
    pub name: String,
    pub cost: Vec<String>,
    pub converted_energy_cost: u32,
    pub damage: String,
    pub text: String,
}

/// Weakness or resistance entry, e.g. `{"type": "Fire", "value": "×2"}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeModifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// A stored card as returned by a natural-key lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingCard {
    pub record: CatalogRecord,
    /// `None` when the extension row is missing and must be recreated
    pub extension: Option<GameExtension>,
}
