//! Provider record shapes and their validation into catalog candidates
//!
//! Provider payloads are decoded leniently (missing fields default) so that a
//! single bad record is reported as a validation failure instead of aborting the
//! whole dataset.

pub mod pokemon;
pub mod scryfall;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::catalog::{Game, GameExtension, NaturalKey};

pub use pokemon::{PokemonSet, PokemonTcgCard};
pub use scryfall::ScryfallCard;

/// One decoded dataset element
#[derive(Debug, Clone)]
pub enum SourceCard {
    Mtg(ScryfallCard),
    Pokemon(PokemonTcgCard),
}

impl SourceCard {
    pub fn game(&self) -> Game {
        match self {
            SourceCard::Mtg(_) => Game::Mtg,
            SourceCard::Pokemon(_) => Game::Pokemon,
        }
    }

    pub fn provider_id(&self) -> &str {
        match self {
            SourceCard::Mtg(card) => &card.id,
            SourceCard::Pokemon(card) => &card.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SourceCard::Mtg(card) => &card.name,
            SourceCard::Pokemon(card) => &card.name,
        }
    }

    pub fn into_incoming(self) -> Result<IncomingCard, ValidationError> {
        match self {
            SourceCard::Mtg(card) => card.into_incoming(),
            SourceCard::Pokemon(card) => card.into_incoming(),
        }
    }
}

/// A validated provider record, ready for change detection
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCard {
    pub provider_id: String,
    pub key: NaturalKey,
    pub name: String,
    pub set_name: String,
    pub rarity: String,
    pub image_url: String,
    pub extension: GameExtension,
    /// Provider-side last modification, when the provider publishes one
    pub provider_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing set code")]
    MissingSetCode,

    #[error("missing collector number")]
    MissingNumber,

    #[error("unparsable {field}: {value:?}")]
    InvalidDate { field: &'static str, value: String },
}

/// Trimmed, non-empty value of a required natural-key field
fn required(value: Option<&str>, missing: ValidationError) -> Result<String, ValidationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(missing),
    }
}
