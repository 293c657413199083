//! The move catalog: builtin downtime moves plus GM-configured craft,
//! custom, and item-linked moves, filtered per character.
//!
//! Move keys are strings on the wire (they live in replicated choice
//! records); [`MoveAction`] gives them a typed form the settlement engine
//! dispatches on. Parsing a key that no longer means anything yields
//! `None`, which settlement treats as a stale selection and skips.

use crate::character::{Character, ItemKind, ItemRef, RestType};
use crate::features::{FeatureFlag, FeatureSet};
use crate::host::Compendium;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const KEY_TEND_WOUNDS: &str = "tendWounds";
const KEY_CLEAR_STRESS: &str = "clearStress";
const KEY_REPAIR_ARMOR: &str = "repairArmor";
const KEY_PREPARE: &str = "prepare";
const KEY_WORK_ON_PROJECT: &str = "workOnProject";
const KEY_FORAGE: &str = "core_forager";
const PREFIX_CRAFT: &str = "craft_";
const PREFIX_CUSTOM: &str = "custom_";
const PREFIX_ITEM_MOVE: &str = "itemmove_";

/// Wire identity of a move. Unique within one character's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveKey(pub String);

impl MoveKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MoveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed form of a move key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveAction {
    TendWounds,
    ClearStress,
    RepairArmor,
    Prepare,
    WorkOnProject,
    Forage,
    Craft(ItemRef),
    Custom(String),
    ItemLinked(ItemRef),
}

impl MoveAction {
    /// Parse a wire key. `None` means the key matches no known shape.
    pub fn parse(key: &MoveKey) -> Option<MoveAction> {
        match key.as_str() {
            KEY_TEND_WOUNDS => Some(MoveAction::TendWounds),
            KEY_CLEAR_STRESS => Some(MoveAction::ClearStress),
            KEY_REPAIR_ARMOR => Some(MoveAction::RepairArmor),
            KEY_PREPARE => Some(MoveAction::Prepare),
            KEY_WORK_ON_PROJECT => Some(MoveAction::WorkOnProject),
            KEY_FORAGE => Some(MoveAction::Forage),
            other => {
                if let Some(reference) = other.strip_prefix(PREFIX_CRAFT) {
                    Some(MoveAction::Craft(ItemRef::new(reference)))
                } else if let Some(label) = other.strip_prefix(PREFIX_CUSTOM) {
                    Some(MoveAction::Custom(label.to_string()))
                } else {
                    other
                        .strip_prefix(PREFIX_ITEM_MOVE)
                        .map(|reference| MoveAction::ItemLinked(ItemRef::new(reference)))
                }
            }
        }
    }

    pub fn key(&self) -> MoveKey {
        match self {
            MoveAction::TendWounds => MoveKey::new(KEY_TEND_WOUNDS),
            MoveAction::ClearStress => MoveKey::new(KEY_CLEAR_STRESS),
            MoveAction::RepairArmor => MoveKey::new(KEY_REPAIR_ARMOR),
            MoveAction::Prepare => MoveKey::new(KEY_PREPARE),
            MoveAction::WorkOnProject => MoveKey::new(KEY_WORK_ON_PROJECT),
            MoveAction::Forage => MoveKey::new(KEY_FORAGE),
            MoveAction::Craft(reference) => MoveKey::new(format!("{PREFIX_CRAFT}{reference}")),
            MoveAction::Custom(label) => MoveKey::new(format!("{PREFIX_CUSTOM}{label}")),
            MoveAction::ItemLinked(reference) => {
                MoveKey::new(format!("{PREFIX_ITEM_MOVE}{reference}"))
            }
        }
    }

    /// Bonus moves never count against the move budget.
    pub fn is_bonus(&self) -> bool {
        matches!(self, MoveAction::Forage)
    }
}

/// When a configured move is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Any,
    Short,
    Long,
}

impl Availability {
    pub fn allows(&self, rest_type: RestType) -> bool {
        match self {
            Availability::Any => true,
            Availability::Short => rest_type == RestType::Short,
            Availability::Long => rest_type == RestType::Long,
        }
    }
}

/// Where a catalog entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveCategory {
    Builtin,
    Craft,
    Custom,
    ItemLinked,
    Bonus,
}

/// One selectable entry in a character's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDefinition {
    pub key: MoveKey,
    pub label: String,
    pub targetable: bool,
    pub availability: Availability,
    pub category: MoveCategory,
}

impl MoveDefinition {
    fn builtin(key: &str, label: &str, targetable: bool, availability: Availability) -> Self {
        Self {
            key: MoveKey::new(key),
            label: label.to_string(),
            targetable,
            availability,
            category: MoveCategory::Builtin,
        }
    }
}

lazy_static! {
    /// The fixed builtin moves. Work on a Project is the only one gated
    /// to long rests.
    pub static ref BUILTIN_MOVES: Vec<MoveDefinition> = vec![
        MoveDefinition::builtin(KEY_TEND_WOUNDS, "Tend to Wounds", true, Availability::Any),
        MoveDefinition::builtin(KEY_CLEAR_STRESS, "Clear Stress", false, Availability::Any),
        MoveDefinition::builtin(KEY_REPAIR_ARMOR, "Repair Armor", true, Availability::Any),
        MoveDefinition::builtin(KEY_PREPARE, "Prepare", false, Availability::Any),
        MoveDefinition::builtin(
            KEY_WORK_ON_PROJECT,
            "Work on a Project",
            false,
            Availability::Long,
        ),
    ];
}

// ============================================================================
// GM-configured catalog entries
// ============================================================================

/// A recipe-to-product crafting pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftEntry {
    pub recipe_ref: ItemRef,
    pub product_ref: ItemRef,
}

/// A GM-authored text-only move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMove {
    pub label: String,
    #[serde(rename = "restType", default)]
    pub availability: Availability,
}

/// A move granted by owning a specific item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMove {
    #[serde(rename = "itemRef")]
    pub item_ref: ItemRef,
    #[serde(rename = "restType", default)]
    pub availability: Availability,
}

/// The GM-configured parts of the catalog, loaded from settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    #[serde(default)]
    pub craft_entries: Vec<CraftEntry>,
    #[serde(default)]
    pub custom_moves: Vec<CustomMove>,
    #[serde(default)]
    pub item_moves: Vec<ItemMove>,
}

lazy_static! {
    /// Shipped crafting pairs, used until the GM saves their own list.
    pub static ref DEFAULT_CRAFT_ENTRIES: Vec<CraftEntry> = vec![
        CraftEntry {
            recipe_ref: ItemRef::new("Compendium.daggerheart.loot.Item.PQxvxAVBbkt0TleC"),
            product_ref: ItemRef::new("Compendium.daggerheart.consumables.Item.tPfKtKRRjv8qdSqy"),
        },
        CraftEntry {
            recipe_ref: ItemRef::new("Compendium.daggerheart.loot.Item.1TLpFsp3PLDsqoTw"),
            product_ref: ItemRef::new("Compendium.daggerheart.consumables.Item.b6vGSPFWOlzZZDLO"),
        },
        CraftEntry {
            recipe_ref: ItemRef::new("Compendium.daggerheart.loot.Item.5YZls8XH3MB7twNa"),
            product_ref: ItemRef::new("Compendium.daggerheart.consumables.Item.Zsh2AvZr8EkGtLyw"),
        },
        CraftEntry {
            recipe_ref: ItemRef::new("Compendium.daggerheart.loot.Item.MhCo8i0cRXzdnXbA"),
            product_ref: ItemRef::new("Compendium.daggerheart.consumables.Item.Nwv5ydGf0MWnzq1n"),
        },
    ];

    /// Shipped item-linked moves, used until the GM saves their own list.
    pub static ref DEFAULT_ITEM_MOVES: Vec<ItemMove> = vec![
        ItemMove {
            item_ref: ItemRef::new("Compendium.daggerheart.subclasses.Item.5bmB1YcxiJVNVXDM"),
            availability: Availability::Any,
        },
        ItemMove {
            item_ref: ItemRef::new("Compendium.daggerheart.subclasses.Item.TIUsIlTS1WkK5vr2"),
            availability: Availability::Any,
        },
    ];
}

// ============================================================================
// Forage option table
// ============================================================================

/// One row of the fixed forage result table. Finds have no compendium
/// counterpart; settlement creates them by name and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForagerOption {
    pub value: u8,
    pub label: &'static str,
    pub effect: &'static str,
    pub kind: ItemKind,
}

lazy_static! {
    /// The forage table. Die faces 1-5 pick a row directly; the top face
    /// defers to the player's pre-selected row.
    pub static ref FORAGER_OPTIONS: Vec<ForagerOption> = vec![
        ForagerOption {
            value: 1,
            label: "A unique food",
            effect: "Clear 2 Stress",
            kind: ItemKind::Consumable,
        },
        ForagerOption {
            value: 2,
            label: "A beautiful relic",
            effect: "Gain 2 Hope",
            kind: ItemKind::Loot,
        },
        ForagerOption {
            value: 3,
            label: "An arcane rune",
            effect: "+2 to a Spellcast Roll",
            kind: ItemKind::Consumable,
        },
        ForagerOption {
            value: 4,
            label: "A healing vial",
            effect: "Clear 2 Hit Points",
            kind: ItemKind::Consumable,
        },
        ForagerOption {
            value: 5,
            label: "A luck charm",
            effect: "Reroll any die",
            kind: ItemKind::Loot,
        },
    ];
}

/// Pick a forage row by 1-based value, clamping out-of-range picks to the
/// first row.
pub fn forager_option(value: u8) -> &'static ForagerOption {
    FORAGER_OPTIONS
        .iter()
        .find(|o| o.value == value)
        .unwrap_or(&FORAGER_OPTIONS[0])
}

// ============================================================================
// Catalog construction
// ============================================================================

/// Build the moves one character can currently select.
///
/// Builtins are filtered by rest type, except that an `efficient` character
/// sees the full long-rest list during a short rest (their chosen upgrade
/// move is then forced into the efficient slot at selection time). Craft
/// and item-linked moves require owning the referenced item by name; both
/// they and custom moves honor their configured rest-type eligibility.
/// Duplicate keys keep the first occurrence.
pub async fn available_moves(
    character: &Character,
    rest_type: RestType,
    features: &FeatureSet,
    config: &CatalogConfig,
    compendium: &dyn Compendium,
) -> Vec<MoveDefinition> {
    let mut moves = Vec::new();

    let sees_long_list = rest_type.is_long() || features.has(FeatureFlag::Efficient);
    for builtin in BUILTIN_MOVES.iter() {
        let offered = match builtin.availability {
            Availability::Long => sees_long_list,
            _ => builtin.availability.allows(rest_type),
        };
        if offered {
            moves.push(builtin.clone());
        }
    }

    for entry in &config.craft_entries {
        let recipe = match compendium.lookup(&entry.recipe_ref).await {
            Ok(Some(recipe)) => recipe,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(reference = %entry.recipe_ref, %err, "skipping craft entry");
                continue;
            }
        };
        if character.owns_item_named(&recipe.name) {
            moves.push(MoveDefinition {
                key: MoveAction::Craft(entry.recipe_ref.clone()).key(),
                label: recipe.name,
                targetable: false,
                availability: Availability::Any,
                category: MoveCategory::Craft,
            });
        }
    }

    for custom in &config.custom_moves {
        if custom.label.is_empty() || !custom.availability.allows(rest_type) {
            continue;
        }
        moves.push(MoveDefinition {
            key: MoveAction::Custom(custom.label.clone()).key(),
            label: custom.label.clone(),
            targetable: false,
            availability: custom.availability,
            category: MoveCategory::Custom,
        });
    }

    for item_move in &config.item_moves {
        if !item_move.availability.allows(rest_type) {
            continue;
        }
        let item = match compendium.lookup(&item_move.item_ref).await {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(reference = %item_move.item_ref, %err, "skipping item move");
                continue;
            }
        };
        if character.owns_item_named(&item.name) {
            moves.push(MoveDefinition {
                key: MoveAction::ItemLinked(item_move.item_ref.clone()).key(),
                label: item.name,
                targetable: false,
                availability: item_move.availability,
                category: MoveCategory::ItemLinked,
            });
        }
    }

    if features.has(FeatureFlag::Forager) {
        moves.push(MoveDefinition {
            key: MoveAction::Forage.key(),
            label: "Forage".to_string(),
            targetable: false,
            availability: Availability::Any,
            category: MoveCategory::Bonus,
        });
    }

    let mut seen = HashSet::new();
    moves.retain(|m| seen.insert(m.key.clone()));
    moves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin_keys() {
        assert_eq!(
            MoveAction::parse(&MoveKey::new("tendWounds")),
            Some(MoveAction::TendWounds)
        );
        assert_eq!(
            MoveAction::parse(&MoveKey::new("workOnProject")),
            Some(MoveAction::WorkOnProject)
        );
        assert_eq!(
            MoveAction::parse(&MoveKey::new("core_forager")),
            Some(MoveAction::Forage)
        );
    }

    #[test]
    fn test_parse_prefixed_keys() {
        assert_eq!(
            MoveAction::parse(&MoveKey::new("craft_Compendium.x.Item.abc")),
            Some(MoveAction::Craft(ItemRef::new("Compendium.x.Item.abc")))
        );
        assert_eq!(
            MoveAction::parse(&MoveKey::new("custom_Scout the Road")),
            Some(MoveAction::Custom("Scout the Road".to_string()))
        );
        assert_eq!(
            MoveAction::parse(&MoveKey::new("itemmove_Compendium.x.Item.def")),
            Some(MoveAction::ItemLinked(ItemRef::new("Compendium.x.Item.def")))
        );
    }

    #[test]
    fn test_parse_unknown_key() {
        assert_eq!(MoveAction::parse(&MoveKey::new("banana")), None);
        assert_eq!(MoveAction::parse(&MoveKey::new("")), None);
    }

    #[test]
    fn test_key_round_trip() {
        for action in [
            MoveAction::TendWounds,
            MoveAction::Prepare,
            MoveAction::Forage,
            MoveAction::Craft(ItemRef::new("Compendium.x.Item.abc")),
            MoveAction::Custom("Scout".to_string()),
            MoveAction::ItemLinked(ItemRef::new("Compendium.x.Item.def")),
        ] {
            assert_eq!(MoveAction::parse(&action.key()), Some(action));
        }
    }

    #[test]
    fn test_availability_allows() {
        assert!(Availability::Any.allows(RestType::Short));
        assert!(Availability::Any.allows(RestType::Long));
        assert!(Availability::Short.allows(RestType::Short));
        assert!(!Availability::Short.allows(RestType::Long));
        assert!(Availability::Long.allows(RestType::Long));
        assert!(!Availability::Long.allows(RestType::Short));
    }

    #[test]
    fn test_forager_option_clamps() {
        assert_eq!(forager_option(2).label, "A beautiful relic");
        assert_eq!(forager_option(0).value, 1);
        assert_eq!(forager_option(9).value, 1);
    }

    #[test]
    fn test_bonus_move_flagging() {
        assert!(MoveAction::Forage.is_bonus());
        assert!(!MoveAction::Prepare.is_bonus());
        assert!(!MoveAction::Custom("x".into()).is_bonus());
    }
}
