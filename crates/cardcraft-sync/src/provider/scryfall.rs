//! Scryfall bulk card objects (Magic: The Gathering)

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{required, IncomingCard, ValidationError};
use crate::catalog::{Game, GameExtension, MtgExtension, NaturalKey};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScryfallCard {
    pub id: String,
    pub name: String,
    pub set: Option<String>,
    pub set_name: String,
    pub collector_number: Option<String>,
    pub rarity: String,
    pub image_uris: Option<ImageUris>,
    /// Double-faced cards carry images per face instead of at the top level
    pub card_faces: Vec<CardFace>,
    pub mana_cost: Option<String>,
    pub cmc: f64,
    pub type_line: Option<String>,
    pub oracle_text: Option<String>,
    pub power: Option<String>,
    pub toughness: Option<String>,
    pub loyalty: Option<String>,
    pub colors: Vec<String>,
    pub color_identity: Vec<String>,
    pub keywords: Vec<String>,
    pub legalities: BTreeMap<String, String>,
    pub reserved: bool,
    pub foil: bool,
    pub nonfoil: bool,
    pub promo: bool,
    pub reprint: bool,
    pub variation: bool,
    pub set_type: String,
    /// `YYYY-MM-DD`
    pub released_at: Option<String>,
    /// RFC 3339
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageUris {
    pub small: Option<String>,
    pub normal: Option<String>,
    pub large: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardFace {
    pub name: String,
    pub image_uris: Option<ImageUris>,
}

impl ScryfallCard {
    /// Large image, falling back to the front face for double-faced cards
    pub fn image_url(&self) -> String {
        self.image_uris
            .as_ref()
            .or_else(|| self.card_faces.first().and_then(|f| f.image_uris.as_ref()))
            .and_then(|uris| uris.large.clone())
            .unwrap_or_default()
    }

    pub(super) fn into_incoming(self) -> Result<IncomingCard, ValidationError> {
        let set_code = required(self.set.as_deref(), ValidationError::MissingSetCode)?;
        let number = required(self.collector_number.as_deref(), ValidationError::MissingNumber)?;

        let released_at = match self.released_at.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                ValidationError::InvalidDate {
                    field: "released_at",
                    value: raw.to_string(),
                }
            })?),
            None => None,
        };

        let provider_updated_at = match self.updated_at.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| ValidationError::InvalidDate {
                        field: "updated_at",
                        value: raw.to_string(),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let image_url = self.image_url();

        Ok(IncomingCard {
            provider_id: self.id,
            key: NaturalKey::new(Game::Mtg, set_code.to_lowercase(), number),
            name: self.name,
            set_name: self.set_name,
            rarity: self.rarity,
            image_url,
            extension: GameExtension::Mtg(MtgExtension {
                mana_cost: self.mana_cost.unwrap_or_default(),
                cmc: self.cmc,
                type_line: self.type_line.unwrap_or_default(),
                oracle_text: self.oracle_text.unwrap_or_default(),
                power: self.power.unwrap_or_default(),
                toughness: self.toughness.unwrap_or_default(),
                loyalty: self.loyalty.unwrap_or_default(),
                colors: self.colors,
                color_identity: self.color_identity,
                keywords: self.keywords,
                legalities: self.legalities,
                reserved: self.reserved,
                foil: self.foil,
                nonfoil: self.nonfoil,
                promo: self.promo,
                reprint: self.reprint,
                variation: self.variation,
                set_type: self.set_type,
                released_at,
            }),
            provider_updated_at,
        })
    }
}
