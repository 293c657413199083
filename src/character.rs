//! Character snapshot types.
//!
//! The engine never owns live character documents; it reads snapshots of
//! this shape through the [`CharacterStore`](crate::host::CharacterStore)
//! port and writes back granular [`CharacterUpdate`]s.
//!
//! Daggerheart resource semantics: hit points, stress, and armor slots are
//! damage tracks whose `value` counts marked damage, so recovery subtracts
//! toward zero. Hope is a gain pool whose `value` counts up to `max`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for connected users (players and GM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an item owned by a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to an item definition in the host's content library
/// (e.g. a compendium path). Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef(pub String);

impl ItemRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Rest vocabulary
// ============================================================================

/// The two downtime rest types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestType {
    #[default]
    Short,
    Long,
}

impl RestType {
    pub fn is_long(&self) -> bool {
        matches!(self, RestType::Long)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RestType::Short => "Short Rest",
            RestType::Long => "Long Rest",
        }
    }
}

/// When a limited-use item part recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recovery {
    ShortRest,
    LongRest,
}

impl Recovery {
    /// Whether this marker qualifies for a sweep at the given rest quality.
    pub fn recovers(&self, effective_long: bool) -> bool {
        match self {
            Recovery::ShortRest => true,
            Recovery::LongRest => effective_long,
        }
    }
}

// ============================================================================
// Resources and items
// ============================================================================

/// A bounded resource counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub value: u32,
    pub max: u32,
}

impl Track {
    pub fn new(value: u32, max: u32) -> Self {
        Self { value, max }
    }
}

/// Limited uses on an item action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseTracker {
    pub value: u32,
    pub max: u32,
    pub recovery: Option<Recovery>,
}

/// An activatable part of an item with optional limited uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAction {
    pub id: String,
    pub uses: Option<UseTracker>,
}

/// Which way an item resource counts when spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Progression {
    /// Spending counts up from zero; resting resets to zero.
    Increasing,
    /// Spending counts down from max; resting resets to max.
    Decreasing,
}

/// An item-level resource counter with its own recovery marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResource {
    pub value: u32,
    pub max: u32,
    pub progression: Progression,
    pub recovery: Option<Recovery>,
}

impl ItemResource {
    /// The value this resource rests back to.
    pub fn reset_value(&self) -> u32 {
        match self.progression {
            Progression::Increasing => 0,
            Progression::Decreasing => self.max,
        }
    }
}

/// An item in a character's inventory as the engine sees it.
///
/// Armor is any equipped item carrying a marks counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedItem {
    pub id: ItemId,
    pub name: String,
    pub equipped: bool,
    /// Marked armor-slot damage, present only on armor.
    pub marks: Option<u32>,
    pub actions: Vec<ItemAction>,
    pub resource: Option<ItemResource>,
}

impl OwnedItem {
    /// A plain inventory item with no mechanics attached.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            name: name.into(),
            equipped: false,
            marks: None,
            actions: Vec::new(),
            resource: None,
        }
    }

    pub fn is_armor(&self) -> bool {
        self.equipped && self.marks.is_some()
    }
}

// ============================================================================
// Character
// ============================================================================

/// Snapshot of a player character's downtime-relevant state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub level: u8,
    pub hit_points: Track,
    pub stress: Track,
    pub hope: Track,
    pub items: Vec<OwnedItem>,
}

impl Character {
    /// Coarse power bucket derived from level.
    pub fn tier(&self) -> u32 {
        match self.level {
            8.. => 4,
            5..=7 => 3,
            2..=4 => 2,
            _ => 1,
        }
    }

    pub fn owns_item_named(&self, name: &str) -> bool {
        self.items.iter().any(|i| i.name == name)
    }

    /// How many owned items carry the given name. Feature passives stack
    /// per copy, so counting matters, not just presence.
    pub fn count_items_named(&self, name: &str) -> u32 {
        self.items.iter().filter(|i| i.name == name).count() as u32
    }

    pub fn armor_items(&self) -> impl Iterator<Item = &OwnedItem> {
        self.items.iter().filter(|i| i.is_armor())
    }

    pub fn total_armor_marks(&self) -> u32 {
        self.armor_items().map(|i| i.marks.unwrap_or(0)).sum()
    }

    pub fn item(&self, id: ItemId) -> Option<&OwnedItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut OwnedItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }
}

/// Create a first-level character with empty tracks, for tests and demos.
pub fn sample_adventurer(name: impl Into<String>, level: u8) -> Character {
    Character {
        id: CharacterId::new(),
        name: name.into(),
        level,
        hit_points: Track::new(0, 6),
        stress: Track::new(0, 6),
        hope: Track::new(2, 6),
        items: Vec::new(),
    }
}

// ============================================================================
// Updates and grants
// ============================================================================

/// Broad item categories as the host content library reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Loot,
    Consumable,
    Weapon,
    Armor,
    Other,
}

/// A concrete item definition, either resolved from the compendium or
/// built by the engine itself. `reference` names the source document when
/// one exists; without it the host creates the item from name and kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub reference: Option<ItemRef>,
    pub name: String,
    pub kind: ItemKind,
}

impl ItemSpec {
    pub fn new(reference: ItemRef, name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            reference: Some(reference),
            name: name.into(),
            kind,
        }
    }

    /// A spec with no backing document.
    pub fn adhoc(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            reference: None,
            name: name.into(),
            kind,
        }
    }
}

/// A granular state change the engine asks the character store to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharacterUpdate {
    SetHitPoints(u32),
    SetStress(u32),
    SetHope(u32),
    SetArmorMarks { item: ItemId, marks: u32 },
    ResetActionUses { item: ItemId, action: String },
    SetItemResource { item: ItemId, value: u32 },
}

impl CharacterUpdate {
    /// Apply this update to an in-memory snapshot. Mirrors what a live
    /// character store does to the backing document.
    pub fn apply_to(&self, character: &mut Character) {
        match self {
            CharacterUpdate::SetHitPoints(value) => character.hit_points.value = *value,
            CharacterUpdate::SetStress(value) => character.stress.value = *value,
            CharacterUpdate::SetHope(value) => character.hope.value = *value,
            CharacterUpdate::SetArmorMarks { item, marks } => {
                if let Some(item) = character.item_mut(*item) {
                    if item.marks.is_some() {
                        item.marks = Some(*marks);
                    }
                }
            }
            CharacterUpdate::ResetActionUses { item, action } => {
                if let Some(item) = character.item_mut(*item) {
                    if let Some(action) = item.actions.iter_mut().find(|a| &a.id == action) {
                        if let Some(uses) = action.uses.as_mut() {
                            uses.value = 0;
                        }
                    }
                }
            }
            CharacterUpdate::SetItemResource { item, value } => {
                if let Some(item) = character.item_mut(*item) {
                    if let Some(resource) = item.resource.as_mut() {
                        resource.value = *value;
                    }
                }
            }
        }
    }
}
