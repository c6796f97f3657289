//! Content signatures for change detection
//!
//! A signature is the SHA-256 of a canonical JSON document built from every
//! mutable display and gameplay field. Object keys are emitted in sorted order
//! (`serde_json::Map` is a `BTreeMap`), and collections whose order carries no
//! meaning are sorted first, so two logically equal cards always hash the same
//! regardless of how the provider ordered them. Rules text, abilities and
//! attacks keep their printed order.

use cardcraft_common::checksum::sha256_hex;
use serde_json::{json, Value};
use std::fmt;

use crate::catalog::{CatalogRecord, GameExtension, MtgExtension, PokemonExtension, TypeModifier};
use crate::provider::IncomingCard;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardSignature(String);

impl CardSignature {
    pub fn compute(
        name: &str,
        set_name: &str,
        rarity: &str,
        image_url: &str,
        extension: &GameExtension,
    ) -> Self {
        let document = json!({
            "name": name,
            "setName": set_name,
            "rarity": rarity,
            "imageUrl": image_url,
            "game": extension.game().as_str(),
            "details": canonical_extension(extension),
        });
        CardSignature(sha256_hex(document.to_string()))
    }

    pub fn of_incoming(card: &IncomingCard) -> Self {
        Self::compute(
            &card.name,
            &card.set_name,
            &card.rarity,
            &card.image_url,
            &card.extension,
        )
    }

    pub fn of_stored(record: &CatalogRecord, extension: &GameExtension) -> Self {
        Self::compute(
            &record.name,
            &record.set_name,
            &record.rarity,
            &record.image_url,
            extension,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = values.iter().map(String::as_str).collect();
    out.sort_unstable();
    out
}

fn sorted_modifiers(values: &[TypeModifier]) -> Vec<&TypeModifier> {
    let mut out: Vec<&TypeModifier> = values.iter().collect();
    out.sort_unstable();
    out
}

fn canonical_extension(extension: &GameExtension) -> Value {
    match extension {
        GameExtension::Mtg(mtg) => canonical_mtg(mtg),
        GameExtension::Pokemon(pokemon) => canonical_pokemon(pokemon),
    }
}

fn canonical_mtg(ext: &MtgExtension) -> Value {
    json!({
        "manaCost": ext.mana_cost,
        "cmc": ext.cmc,
        "typeLine": ext.type_line,
        "oracleText": ext.oracle_text,
        "power": ext.power,
        "toughness": ext.toughness,
        "loyalty": ext.loyalty,
        "colors": sorted(&ext.colors),
        "colorIdentity": sorted(&ext.color_identity),
        "keywords": sorted(&ext.keywords),
        "legalities": ext.legalities,
        "reserved": ext.reserved,
        "foil": ext.foil,
        "nonfoil": ext.nonfoil,
        "promo": ext.promo,
        "reprint": ext.reprint,
        "variation": ext.variation,
        "setType": ext.set_type,
        "releasedAt": ext.released_at.map(|d| d.to_string()),
    })
}

fn canonical_pokemon(ext: &PokemonExtension) -> Value {
    let attacks: Vec<Value> = ext
        .attacks
        .iter()
        .map(|attack| {
            json!({
                "name": attack.name,
                "cost": sorted(&attack.cost),
                "convertedEnergyCost": attack.converted_energy_cost,
                "damage": attack.damage,
                "text": attack.text,
            })
        })
        .collect();

    json!({
        "hp": ext.hp,
        "evolvesFrom": ext.evolves_from,
        "evolvesTo": sorted(&ext.evolves_to),
        "types": sorted(&ext.types),
        "subtypes": sorted(&ext.subtypes),
        "supertype": ext.supertype,
        "rules": ext.rules,
        "abilities": ext.abilities,
        "attacks": attacks,
        "weaknesses": sorted_modifiers(&ext.weaknesses),
        "resistances": sorted_modifiers(&ext.resistances),
        "retreatCost": sorted(&ext.retreat_cost),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Ability, Attack};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn mtg(colors: &[&str], keywords: &[&str]) -> GameExtension {
        GameExtension::Mtg(MtgExtension {
            mana_cost: "{1}{W}{U}".to_string(),
            cmc: 3.0,
            type_line: "Creature — Human Wizard".to_string(),
            colors: colors.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            legalities: BTreeMap::from([
                ("modern".to_string(), "legal".to_string()),
                ("standard".to_string(), "not_legal".to_string()),
            ]),
            ..MtgExtension::default()
        })
    }

    fn signature(ext: &GameExtension) -> CardSignature {
        CardSignature::compute("Lyra", "Set", "rare", "https://img.example/l.jpg", ext)
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let sig = signature(&mtg(&["W"], &[]));
        assert_eq!(sig.as_str().len(), 64);
        assert!(sig.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unordered_collections_do_not_affect_signature() {
        assert_eq!(
            signature(&mtg(&["W", "U"], &["Flying", "Vigilance"])),
            signature(&mtg(&["U", "W"], &["Vigilance", "Flying"]))
        );
    }

    #[test]
    fn test_display_field_change_alters_signature() {
        let ext = mtg(&["W"], &[]);
        let before = CardSignature::compute("Lyra", "Set", "rare", "a.jpg", &ext);
        let after = CardSignature::compute("Lyra", "Set", "mythic", "a.jpg", &ext);
        assert_ne!(before, after);
    }

    #[test]
    fn test_game_specific_field_change_alters_signature() {
        let GameExtension::Mtg(mut changed) = mtg(&["W"], &[]) else {
            unreachable!()
        };
        changed.oracle_text = "Flying".to_string();
        assert_ne!(signature(&mtg(&["W"], &[])), signature(&GameExtension::Mtg(changed)));
    }

    #[test]
    fn test_attack_order_is_significant() {
        let attack = |name: &str| Attack {
            name: name.to_string(),
            ..Attack::default()
        };
        let ordered = |names: [&str; 2]| {
            GameExtension::Pokemon(PokemonExtension {
                attacks: names.iter().map(|n| attack(n)).collect(),
                ..PokemonExtension::default()
            })
        };
        assert_ne!(
            signature(&ordered(["Scratch", "Ember"])),
            signature(&ordered(["Ember", "Scratch"]))
        );
    }

    #[test]
    fn test_weakness_order_is_not_significant() {
        let modifier = |kind: &str| TypeModifier {
            kind: kind.to_string(),
            value: "×2".to_string(),
        };
        let with = |kinds: [&str; 2]| {
            GameExtension::Pokemon(PokemonExtension {
                hp: Some(60),
                weaknesses: kinds.iter().map(|k| modifier(k)).collect(),
                abilities: vec![Ability::default()],
                ..PokemonExtension::default()
            })
        };
        assert_eq!(
            signature(&with(["Water", "Grass"])),
            signature(&with(["Grass", "Water"]))
        );
    }

    proptest! {
        #[test]
        fn prop_signature_ignores_color_and_keyword_order(
            colors in proptest::collection::vec("[WUBRG]", 0..5),
            keywords in proptest::collection::vec("[A-Z][a-z]{2,8}", 0..6),
            seed in any::<u64>(),
        ) {
            let mut shuffled_colors = colors.clone();
            let mut shuffled_keywords = keywords.clone();
            let shift = (seed % 7) as usize;
            shuffled_colors.reverse();
            if !shuffled_keywords.is_empty() {
                let len = shuffled_keywords.len();
                shuffled_keywords.rotate_left(shift % len);
            }

            let a: Vec<&str> = colors.iter().map(String::as_str).collect();
            let b: Vec<&str> = keywords.iter().map(String::as_str).collect();
            let c: Vec<&str> = shuffled_colors.iter().map(String::as_str).collect();
            let d: Vec<&str> = shuffled_keywords.iter().map(String::as_str).collect();

            prop_assert_eq!(signature(&mtg(&a, &b)), signature(&mtg(&c, &d)));
        }
    }
}
