//! Downtime feature flags and their resolution.
//!
//! A feature is detected by item ownership: the character holds an item
//! whose name matches the feature's display name. The GM can repoint a
//! feature at a different item name through the override table; overrides
//! merge over the default table by key so newly shipped features always
//! appear. Resolution is re-run on every read and never cached.

use crate::character::{Character, ItemRef};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The downtime capabilities a character can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureFlag {
    /// One selected move resolves at long-rest quality during a short rest.
    Efficient,
    /// Grants the bonus forage move, exempt from the move budget.
    Forager,
    /// Grants +1 move budget to one chosen other participant, per copy.
    Eloquent,
    /// +1 own move budget per copy.
    Industrious,
    /// Clears 1 stress per copy at settlement, no action required.
    Mender,
    /// +1 per copy to tend-wounds recovery; marks the same stress on the
    /// healer when tending someone else.
    FieldMedic,
}

impl FeatureFlag {
    pub fn all() -> [FeatureFlag; 6] {
        [
            FeatureFlag::Efficient,
            FeatureFlag::Forager,
            FeatureFlag::Eloquent,
            FeatureFlag::Industrious,
            FeatureFlag::Mender,
            FeatureFlag::FieldMedic,
        ]
    }

    /// Stable key used in the override table and persisted records.
    pub fn key(&self) -> &'static str {
        match self {
            FeatureFlag::Efficient => "efficient",
            FeatureFlag::Forager => "forager",
            FeatureFlag::Eloquent => "eloquent",
            FeatureFlag::Industrious => "industrious",
            FeatureFlag::Mender => "mender",
            FeatureFlag::FieldMedic => "fieldMedic",
        }
    }

    pub fn from_key(key: &str) -> Option<FeatureFlag> {
        FeatureFlag::all().into_iter().find(|f| f.key() == key)
    }

    /// Display name used when the GM has not overridden the entry.
    pub fn default_label(&self) -> &'static str {
        match self {
            FeatureFlag::Efficient => "Efficient",
            FeatureFlag::Forager => "Forager",
            FeatureFlag::Eloquent => "Eloquent",
            FeatureFlag::Industrious => "Industrious",
            FeatureFlag::Mender => "Mender",
            FeatureFlag::FieldMedic => "Field Medic",
        }
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// One row of the feature lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEntry {
    pub key: String,
    /// Display name to match against owned item names. Empty falls back
    /// to the flag's default label.
    #[serde(default)]
    pub label: String,
    /// The canonical item granting this feature, for host UIs.
    #[serde(default)]
    pub item_ref: Option<ItemRef>,
}

impl FeatureEntry {
    pub fn new(flag: FeatureFlag, item_ref: Option<ItemRef>) -> Self {
        Self {
            key: flag.key().to_string(),
            label: flag.default_label().to_string(),
            item_ref,
        }
    }
}

lazy_static! {
    /// Shipped feature table. GM overrides merge over this by key.
    pub static ref DEFAULT_FEATURES: Vec<FeatureEntry> = vec![
        FeatureEntry::new(
            FeatureFlag::Efficient,
            Some(ItemRef::new("Compendium.daggerheart.ancestries.Item.2xlqKOkDxWHbuj4t")),
        ),
        FeatureEntry::new(
            FeatureFlag::Forager,
            Some(ItemRef::new("Compendium.daggerheart.domains.Item.06UapZuaA5S6fAKl")),
        ),
        FeatureEntry::new(FeatureFlag::Eloquent, None),
        FeatureEntry::new(FeatureFlag::Industrious, None),
        FeatureEntry::new(FeatureFlag::Mender, None),
        FeatureEntry::new(FeatureFlag::FieldMedic, None),
    ];
}

/// Merge GM overrides over the default table. Defaults drive the key set;
/// override rows with unknown keys are dropped.
pub fn merged_table(overrides: &[FeatureEntry]) -> Vec<FeatureEntry> {
    let by_key: HashMap<&str, &FeatureEntry> =
        overrides.iter().map(|e| (e.key.as_str(), e)).collect();
    DEFAULT_FEATURES
        .iter()
        .map(|d| by_key.get(d.key.as_str()).copied().cloned().unwrap_or_else(|| d.clone()))
        .collect()
}

/// The flags a single character resolves to, with per-flag copy counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    counts: HashMap<FeatureFlag, u32>,
}

impl FeatureSet {
    pub fn has(&self, flag: FeatureFlag) -> bool {
        self.count(flag) > 0
    }

    /// Number of owned copies. Budget and recovery passives stack
    /// additively per copy with no upper bound.
    pub fn count(&self, flag: FeatureFlag) -> u32 {
        self.counts.get(&flag).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl FromIterator<(FeatureFlag, u32)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (FeatureFlag, u32)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().filter(|(_, count)| *count > 0).collect(),
        }
    }
}

/// Resolve a character's feature set against a merged table.
pub fn resolve(character: &Character, table: &[FeatureEntry]) -> FeatureSet {
    let mut counts = HashMap::new();
    for entry in table {
        let Some(flag) = FeatureFlag::from_key(&entry.key) else {
            continue;
        };
        let label = if entry.label.is_empty() {
            flag.default_label()
        } else {
            entry.label.as_str()
        };
        let count = character.count_items_named(label);
        if count > 0 {
            counts.insert(flag, count);
        }
    }
    FeatureSet { counts }
}
