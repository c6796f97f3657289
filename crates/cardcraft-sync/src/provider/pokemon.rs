//! Pokémon TCG API card objects

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use super::{required, IncomingCard, ValidationError};
use crate::catalog::{
    Ability, Attack, Game, GameExtension, NaturalKey, PokemonExtension, TypeModifier,
};

/// Format of `set.updatedAt`, always UTC
const SET_UPDATED_AT_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PokemonTcgCard {
    /// e.g. "swsh4-25"
    pub id: String,
    pub name: String,
    pub set: Option<PokemonSetRef>,
    pub number: Option<String>,
    pub rarity: Option<String>,
    pub images: Option<PokemonImages>,
    /// Numeric in practice, but published as a string
    pub hp: Option<String>,
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

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PokemonSetRef {
    pub id: String,
    pub name: String,
    pub updated_at: Option<String>,
}

/// An entry of the `/v2/sets` listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PokemonSet {
    pub id: String,
    pub name: String,
    pub release_date: Option<String>,
    pub updated_at: Option<String>,
}

impl PokemonSet {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.as_deref().and_then(parse_updated_at)
    }
}

/// Parse the API's `updatedAt` timestamp (UTC, no zone marker)
pub fn parse_updated_at(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), SET_UPDATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PokemonImages {
    pub small: Option<String>,
    pub large: Option<String>,
}

impl PokemonTcgCard {
    /// Set id, falling back to the card id prefix ("swsh4-25" -> "swsh4") for
    /// per-set dumps that omit the embedded set object
    fn set_code(&self) -> Option<&str> {
        match self.set.as_ref().map(|s| s.id.trim()) {
            Some(id) if !id.is_empty() => Some(id),
            _ => self.id.rsplit_once('-').map(|(prefix, _)| prefix),
        }
    }

    pub(super) fn into_incoming(self) -> Result<IncomingCard, ValidationError> {
        let set_code = required(self.set_code(), ValidationError::MissingSetCode)?;
        let number = required(self.number.as_deref(), ValidationError::MissingNumber)?;

        let (set_name, raw_updated_at) = match self.set {
            Some(set) => (set.name, set.updated_at),
            None => (String::new(), None),
        };

        let provider_updated_at = match raw_updated_at.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_updated_at(raw).ok_or_else(|| {
                ValidationError::InvalidDate {
                    field: "set.updatedAt",
                    value: raw.to_string(),
                }
            })?),
            None => None,
        };

        Ok(IncomingCard {
            provider_id: self.id,
            key: NaturalKey::new(Game::Pokemon, set_code, number),
            name: self.name,
            set_name,
            rarity: self.rarity.unwrap_or_default(),
            image_url: self.images.and_then(|i| i.large).unwrap_or_default(),
            extension: GameExtension::Pokemon(PokemonExtension {
                hp: self.hp.as_deref().and_then(|hp| hp.trim().parse().ok()),
                evolves_from: self.evolves_from.filter(|s| !s.is_empty()),
                evolves_to: self.evolves_to,
                types: self.types,
                subtypes: self.subtypes,
                supertype: self.supertype,
                rules: self.rules,
                abilities: self.abilities,
                attacks: self.attacks,
                weaknesses: self.weaknesses,
                resistances: self.resistances,
                retreat_cost: self.retreat_cost,
            }),
            provider_updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn card(value: serde_json::Value) -> PokemonTcgCard {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_api_card_maps_to_catalog_fields() {
        let incoming = card(json!({
            "id": "swsh4-25",
            "name": "Charizard",
            "supertype": "Pokémon",
            "subtypes": ["Stage 2"],
            "hp": "170",
            "types": ["Fire"],
            "evolvesFrom": "Charmeleon",
            "abilities": [{"name": "Battle Sense", "text": "Look at the top 3 cards", "type": "Ability"}],
            "attacks": [{"name": "Royal Blaze", "cost": ["Fire", "Fire"], "convertedEnergyCost": 2, "damage": "100+", "text": ""}],
            "weaknesses": [{"type": "Water", "value": "×2"}],
            "retreatCost": ["Colorless", "Colorless", "Colorless"],
            "set": {"id": "swsh4", "name": "Vivid Voltage", "updatedAt": "2020/11/13 16:20:00"},
            "number": "25",
            "rarity": "Rare",
            "images": {"small": "https://images.example/swsh4/25.png", "large": "https://images.example/swsh4/25_hires.png"}
        }))
        .into_incoming()
        .unwrap();

        assert_eq!(incoming.key, NaturalKey::new(Game::Pokemon, "swsh4", "25"));
        assert_eq!(incoming.set_name, "Vivid Voltage");
        assert_eq!(incoming.image_url, "https://images.example/swsh4/25_hires.png");
        assert_eq!(
            incoming.provider_updated_at.unwrap().to_rfc3339(),
            "2020-11-13T16:20:00+00:00"
        );

        let GameExtension::Pokemon(ext) = incoming.extension else {
            panic!("expected pokemon extension");
        };
        assert_eq!(ext.hp, Some(170));
        assert_eq!(ext.evolves_from.as_deref(), Some("Charmeleon"));
        assert_eq!(ext.abilities[0].kind, "Ability");
        assert_eq!(ext.retreat_cost.len(), 3);
    }

    #[test]
    fn test_set_code_falls_back_to_id_prefix() {
        let incoming = card(json!({"id": "base1-4", "name": "Charizard", "number": "4"}))
            .into_incoming()
            .unwrap();
        assert_eq!(incoming.key.set_code, "base1");
        assert!(incoming.provider_updated_at.is_none());
    }

    #[test]
    fn test_non_numeric_hp_is_dropped() {
        let incoming = card(json!({"id": "xy1-1", "name": "Venusaur-EX", "number": "1", "hp": "???"}))
            .into_incoming()
            .unwrap();
        let GameExtension::Pokemon(ext) = incoming.extension else {
            panic!("expected pokemon extension");
        };
        assert_eq!(ext.hp, None);
    }

    #[test]
    fn test_missing_number_is_rejected() {
        let result = card(json!({"id": "xy1-1", "name": "Venusaur-EX"})).into_incoming();
        assert_eq!(result.unwrap_err(), ValidationError::MissingNumber);
    }

    #[test]
    fn test_bad_set_timestamp_is_rejected() {
        let result = card(json!({
            "id": "xy1-1",
            "name": "Venusaur-EX",
            "number": "1",
            "set": {"id": "xy1", "name": "XY", "updatedAt": "last tuesday"}
        }))
        .into_incoming();
        assert!(matches!(result, Err(ValidationError::InvalidDate { .. })));
    }

    #[test]
    fn test_set_listing_entry_parses_update_time() {
        let set: PokemonSet = serde_json::from_value(json!({
            "id": "sv1",
            "name": "Scarlet & Violet",
            "releaseDate": "2023/03/31",
            "updatedAt": "2024/01/05 09:30:00"
        }))
        .unwrap();

        let updated_at = set.updated_at().unwrap();
        assert_eq!(updated_at.to_rfc3339(), "2024-01-05T09:30:00+00:00");
        assert!(PokemonSet::default().updated_at().is_none());
    }
}
