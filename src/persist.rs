//! Record formats for everything downtime keeps in the host settings
//! store, plus load/save helpers.
//!
//! Every record embeds `FORMAT_VERSION` so a future layout change can be
//! detected instead of silently misread. Loads of a missing record return
//! `None` (or the documented default); loads of a record written by a
//! different format version fail with [`PersistError::VersionMismatch`].

use crate::catalog::{
    CatalogConfig, CraftEntry, CustomMove, ItemMove, DEFAULT_CRAFT_ENTRIES, DEFAULT_ITEM_MOVES,
};
use crate::character::{CharacterId, ItemKind};
use crate::features::FeatureEntry;
use crate::host::{Compendium, HostError, Scope, SettingsStore};
use crate::session::{ParticipantChoice, ParticipantConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Bump when any record layout changes shape.
pub const FORMAT_VERSION: u32 = 1;

/// Settings keys used by the downtime engine. Session and world-level
/// configuration live at world scope; choice records live at user scope
/// under a single shared key.
pub mod keys {
    pub const SESSION: &str = "downtime.session";
    pub const CHOICES: &str = "downtime.choices";
    pub const ACTOR_CONFIGS: &str = "downtime.actor_configs";
    pub const CRAFT_ENTRIES: &str = "downtime.craft_entries";
    pub const CUSTOM_MOVES: &str = "downtime.custom_moves";
    pub const ITEM_MOVES: &str = "downtime.item_moves";
    pub const FEATURE_NAMES: &str = "downtime.feature_names";
    pub const FEAR: &str = "downtime.fear";
    pub const OPEN: &str = "downtime.open";
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("settings access failed: {0}")]
    Settings(#[from] HostError),

    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("invalid catalog entry: {0}")]
    InvalidEntry(String),
}

fn check_version(found: u32) -> Result<(), PersistError> {
    if found == FORMAT_VERSION {
        Ok(())
    } else {
        Err(PersistError::VersionMismatch {
            expected: FORMAT_VERSION,
            found,
        })
    }
}

// ============================================================================
// Record shapes
// ============================================================================

/// The replicated session: who is resting, how, and since when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub version: u32,
    pub timestamp_ms: u64,
    pub rest_type: crate::character::RestType,
    #[serde(default)]
    pub participants: BTreeMap<CharacterId, ParticipantConfig>,
}

/// One player's move selections, stored at user scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRecord {
    pub version: u32,
    #[serde(flatten)]
    pub choice: ParticipantChoice,
}

/// Lightweight ping the GM client writes when a session opens, so player
/// clients can tell a live session from a leftover record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBroadcast {
    pub timestamp_ms: u64,
}

impl OpenBroadcast {
    pub fn is_fresh(&self, now_ms: u64, staleness_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) <= staleness_ms
    }
}

/// Per-character GM configuration that outlives any one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedActorConfig {
    pub move_budget: u32,
    #[serde(default)]
    pub hp_modifier: u32,
    #[serde(default)]
    pub stress_modifier: u32,
    #[serde(default)]
    pub hope_modifier: u32,
    #[serde(default)]
    pub armor_modifier: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
struct ActorConfigRecord {
    version: u32,
    #[serde(default)]
    configs: BTreeMap<CharacterId, PersistedActorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CraftListRecord {
    version: u32,
    #[serde(default)]
    entries: Vec<CraftEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CustomMoveListRecord {
    version: u32,
    #[serde(default)]
    moves: Vec<CustomMove>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ItemMoveListRecord {
    version: u32,
    #[serde(default)]
    moves: Vec<ItemMove>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FeatureNameRecord {
    version: u32,
    #[serde(default)]
    entries: Vec<FeatureEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FearRecord {
    version: u32,
    value: u32,
}

// ============================================================================
// Load / save
// ============================================================================

async fn read_json<T: DeserializeOwned>(
    settings: &dyn SettingsStore,
    scope: Scope,
    key: &str,
) -> Result<Option<T>, PersistError> {
    match settings.read(scope, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

async fn write_json<T: Serialize>(
    settings: &dyn SettingsStore,
    scope: Scope,
    key: &str,
    record: &T,
) -> Result<(), PersistError> {
    let value = serde_json::to_value(record)?;
    settings.write(scope, key, value).await?;
    Ok(())
}

pub async fn load_session(
    settings: &dyn SettingsStore,
) -> Result<Option<SessionRecord>, PersistError> {
    let record: Option<SessionRecord> = read_json(settings, Scope::World, keys::SESSION).await?;
    if let Some(record) = &record {
        check_version(record.version)?;
    }
    Ok(record)
}

pub async fn save_session(
    settings: &dyn SettingsStore,
    record: &SessionRecord,
) -> Result<(), PersistError> {
    write_json(settings, Scope::World, keys::SESSION, record).await
}

pub async fn load_choice(
    settings: &dyn SettingsStore,
    user: crate::character::UserId,
) -> Result<Option<ChoiceRecord>, PersistError> {
    let record: Option<ChoiceRecord> =
        read_json(settings, Scope::User(user), keys::CHOICES).await?;
    if let Some(record) = &record {
        check_version(record.version)?;
    }
    Ok(record)
}

pub async fn save_choice(
    settings: &dyn SettingsStore,
    user: crate::character::UserId,
    choice: &ParticipantChoice,
) -> Result<(), PersistError> {
    let record = ChoiceRecord {
        version: FORMAT_VERSION,
        choice: choice.clone(),
    };
    write_json(settings, Scope::User(user), keys::CHOICES, &record).await
}

pub async fn delete_choice(
    settings: &dyn SettingsStore,
    user: crate::character::UserId,
) -> Result<(), PersistError> {
    settings.delete(Scope::User(user), keys::CHOICES).await?;
    Ok(())
}

pub async fn load_actor_configs(
    settings: &dyn SettingsStore,
) -> Result<BTreeMap<CharacterId, PersistedActorConfig>, PersistError> {
    let record: Option<ActorConfigRecord> =
        read_json(settings, Scope::World, keys::ACTOR_CONFIGS).await?;
    match record {
        Some(record) => {
            check_version(record.version)?;
            Ok(record.configs)
        }
        None => Ok(BTreeMap::new()),
    }
}

pub async fn save_actor_configs(
    settings: &dyn SettingsStore,
    configs: &BTreeMap<CharacterId, PersistedActorConfig>,
) -> Result<(), PersistError> {
    let record = ActorConfigRecord {
        version: FORMAT_VERSION,
        configs: configs.clone(),
    };
    write_json(settings, Scope::World, keys::ACTOR_CONFIGS, &record).await
}

/// Assemble the configured catalog. Saved craft and item-move lists
/// replace the shipped defaults wholesale when non-empty; custom moves
/// have no defaults.
pub async fn load_catalog_config(
    settings: &dyn SettingsStore,
) -> Result<CatalogConfig, PersistError> {
    let craft: Option<CraftListRecord> =
        read_json(settings, Scope::World, keys::CRAFT_ENTRIES).await?;
    let custom: Option<CustomMoveListRecord> =
        read_json(settings, Scope::World, keys::CUSTOM_MOVES).await?;
    let item: Option<ItemMoveListRecord> =
        read_json(settings, Scope::World, keys::ITEM_MOVES).await?;

    let craft_entries = match craft {
        Some(record) => {
            check_version(record.version)?;
            if record.entries.is_empty() {
                DEFAULT_CRAFT_ENTRIES.clone()
            } else {
                record.entries
            }
        }
        None => DEFAULT_CRAFT_ENTRIES.clone(),
    };
    let custom_moves = match custom {
        Some(record) => {
            check_version(record.version)?;
            record.moves
        }
        None => Vec::new(),
    };
    let item_moves = match item {
        Some(record) => {
            check_version(record.version)?;
            if record.moves.is_empty() {
                DEFAULT_ITEM_MOVES.clone()
            } else {
                record.moves
            }
        }
        None => DEFAULT_ITEM_MOVES.clone(),
    };

    Ok(CatalogConfig {
        craft_entries,
        custom_moves,
        item_moves,
    })
}

/// Persist the GM's crafting list. Every product must resolve in the
/// compendium and be something a character can actually carry.
pub async fn save_craft_entries(
    settings: &dyn SettingsStore,
    compendium: &dyn Compendium,
    entries: &[CraftEntry],
) -> Result<(), PersistError> {
    for entry in entries {
        let product = compendium
            .lookup(&entry.product_ref)
            .await?
            .ok_or_else(|| {
                PersistError::InvalidEntry(format!("unknown product {}", entry.product_ref))
            })?;
        match product.kind {
            ItemKind::Loot | ItemKind::Consumable | ItemKind::Weapon | ItemKind::Armor => {}
            ItemKind::Other => {
                return Err(PersistError::InvalidEntry(format!(
                    "product {} is not a grantable item",
                    entry.product_ref
                )));
            }
        }
    }
    let record = CraftListRecord {
        version: FORMAT_VERSION,
        entries: entries.to_vec(),
    };
    write_json(settings, Scope::World, keys::CRAFT_ENTRIES, &record).await
}

pub async fn save_custom_moves(
    settings: &dyn SettingsStore,
    moves: &[CustomMove],
) -> Result<(), PersistError> {
    for custom in moves {
        if custom.label.trim().is_empty() {
            return Err(PersistError::InvalidEntry(
                "custom move label is empty".to_string(),
            ));
        }
    }
    let record = CustomMoveListRecord {
        version: FORMAT_VERSION,
        moves: moves.to_vec(),
    };
    write_json(settings, Scope::World, keys::CUSTOM_MOVES, &record).await
}

pub async fn save_item_moves(
    settings: &dyn SettingsStore,
    moves: &[ItemMove],
) -> Result<(), PersistError> {
    let record = ItemMoveListRecord {
        version: FORMAT_VERSION,
        moves: moves.to_vec(),
    };
    write_json(settings, Scope::World, keys::ITEM_MOVES, &record).await
}

pub async fn load_feature_overrides(
    settings: &dyn SettingsStore,
) -> Result<Vec<FeatureEntry>, PersistError> {
    let record: Option<FeatureNameRecord> =
        read_json(settings, Scope::World, keys::FEATURE_NAMES).await?;
    match record {
        Some(record) => {
            check_version(record.version)?;
            Ok(record.entries)
        }
        None => Ok(Vec::new()),
    }
}

pub async fn save_feature_overrides(
    settings: &dyn SettingsStore,
    entries: &[FeatureEntry],
) -> Result<(), PersistError> {
    let record = FeatureNameRecord {
        version: FORMAT_VERSION,
        entries: entries.to_vec(),
    };
    write_json(settings, Scope::World, keys::FEATURE_NAMES, &record).await
}

pub async fn load_fear(settings: &dyn SettingsStore) -> Result<u32, PersistError> {
    let record: Option<FearRecord> = read_json(settings, Scope::World, keys::FEAR).await?;
    match record {
        Some(record) => {
            check_version(record.version)?;
            Ok(record.value)
        }
        None => Ok(0),
    }
}

pub async fn save_fear(settings: &dyn SettingsStore, value: u32) -> Result<(), PersistError> {
    let record = FearRecord {
        version: FORMAT_VERSION,
        value,
    };
    write_json(settings, Scope::World, keys::FEAR, &record).await
}

pub async fn announce_open(
    settings: &dyn SettingsStore,
    timestamp_ms: u64,
) -> Result<(), PersistError> {
    let record = OpenBroadcast { timestamp_ms };
    write_json(settings, Scope::World, keys::OPEN, &record).await
}

pub async fn load_open(
    settings: &dyn SettingsStore,
) -> Result<Option<OpenBroadcast>, PersistError> {
    read_json(settings, Scope::World, keys::OPEN).await
}
