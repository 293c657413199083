//! Testing utilities for the downtime engine.
//!
//! This module provides tools for integration testing:
//! - In-memory implementations of every host port
//! - `FixedDice` for scripted, deterministic rolls
//! - `DowntimeHarness` for end-to-end settlement scenarios
//! - Assertion helpers for verifying settlement reports

use crate::character::{
    sample_adventurer, Character, CharacterId, CharacterUpdate, ItemRef, ItemSpec, OwnedItem,
    UserId,
};
use crate::dice::{DiceExpression, RollResult, TermRoll};
use crate::host::{
    ChangeNotice, CharacterStore, Compendium, DiceRoller, HostError, Notifier, Scope,
    SettingsStore,
};
use crate::rules::{DowntimeEngine, SettlementReport};
use crate::session::{RosterEntry, Session};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A dice roller that returns scripted faces in order.
///
/// Use this for deterministic settlement tests. An exhausted queue fails
/// the roll, which the engine treats like any other dice failure.
#[derive(Debug, Default)]
pub struct FixedDice {
    queue: Mutex<VecDeque<u32>>,
}

impl FixedDice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append faces to the script.
    pub fn queue_rolls(&self, faces: impl IntoIterator<Item = u32>) {
        lock(&self.queue).extend(faces);
    }

    pub fn remaining(&self) -> usize {
        lock(&self.queue).len()
    }
}

#[async_trait]
impl DiceRoller for FixedDice {
    async fn roll(&self, notation: &str, _visible: bool) -> Result<RollResult, HostError> {
        let face = lock(&self.queue).pop_front().ok_or_else(|| {
            HostError::Unavailable(format!("no scripted roll left for {notation}"))
        })?;
        let expression = DiceExpression::parse(notation)?;
        let die = expression
            .terms
            .first()
            .map(|t| t.die)
            .ok_or_else(|| HostError::Unavailable(format!("{notation} has no dice")))?;
        let modifier = expression.modifier;
        Ok(RollResult {
            expression,
            term_rolls: vec![TermRoll {
                die,
                faces: vec![face],
                subtotal: face,
            }],
            modifier,
            total: face as i32 + modifier,
        })
    }
}

/// An in-memory character store.
///
/// Characters are plain [`Character`] values; updates go through the same
/// [`CharacterUpdate`] path the live host would use. Individual characters
/// can be marked to fail writes, for partial-failure scenarios.
#[derive(Debug, Default)]
pub struct MemoryCharacters {
    sheets: Mutex<HashMap<CharacterId, Character>>,
    fail_writes: Mutex<HashSet<CharacterId>>,
}

impl MemoryCharacters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, character: Character) {
        lock(&self.sheets).insert(character.id, character);
    }

    /// Current stored state, cloned.
    pub fn get(&self, id: CharacterId) -> Option<Character> {
        lock(&self.sheets).get(&id).cloned()
    }

    pub fn remove(&self, id: CharacterId) {
        lock(&self.sheets).remove(&id);
    }

    /// Edit a stored character in place.
    pub fn edit(&self, id: CharacterId, f: impl FnOnce(&mut Character)) {
        if let Some(character) = lock(&self.sheets).get_mut(&id) {
            f(character);
        }
    }

    /// Make every write for this character fail until cleared.
    pub fn fail_writes_for(&self, id: CharacterId) {
        lock(&self.fail_writes).insert(id);
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_writes).clear();
    }

    fn check_writable(&self, id: CharacterId) -> Result<(), HostError> {
        if lock(&self.fail_writes).contains(&id) {
            Err(HostError::Unavailable(format!("writes disabled for {id}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CharacterStore for MemoryCharacters {
    async fn fetch(&self, id: CharacterId) -> Result<Option<Character>, HostError> {
        Ok(lock(&self.sheets).get(&id).cloned())
    }

    async fn apply(&self, id: CharacterId, update: CharacterUpdate) -> Result<(), HostError> {
        self.check_writable(id)?;
        let mut sheets = lock(&self.sheets);
        let character = sheets.get_mut(&id).ok_or(HostError::CharacterNotFound(id))?;
        update.apply_to(character);
        Ok(())
    }

    async fn grant_item(&self, id: CharacterId, item: &ItemSpec) -> Result<(), HostError> {
        self.check_writable(id)?;
        let mut sheets = lock(&self.sheets);
        let character = sheets.get_mut(&id).ok_or(HostError::CharacterNotFound(id))?;
        character.items.push(OwnedItem::named(item.name.clone()));
        Ok(())
    }
}

/// An in-memory compendium keyed by reference string.
#[derive(Debug, Default)]
pub struct MemoryCompendium {
    specs: Mutex<HashMap<String, ItemSpec>>,
}

impl MemoryCompendium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, spec: ItemSpec) {
        let reference = spec
            .reference
            .clone()
            .expect("compendium entries need a reference");
        lock(&self.specs).insert(reference.as_str().to_string(), spec);
    }

    pub fn remove(&self, reference: &ItemRef) {
        lock(&self.specs).remove(reference.as_str());
    }
}

#[async_trait]
impl Compendium for MemoryCompendium {
    async fn lookup(&self, reference: &ItemRef) -> Result<Option<ItemSpec>, HostError> {
        Ok(lock(&self.specs).get(reference.as_str()).cloned())
    }
}

/// A notifier that records everything it is told.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    infos: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infos(&self) -> Vec<String> {
        lock(&self.infos).clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        lock(&self.warnings).clone()
    }

    pub fn info_containing(&self, needle: &str) -> bool {
        lock(&self.infos).iter().any(|m| m.contains(needle))
    }

    pub fn warning_containing(&self, needle: &str) -> bool {
        lock(&self.warnings).iter().any(|m| m.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        lock(&self.infos).push(message.to_string());
    }

    fn warn(&self, message: &str) {
        lock(&self.warnings).push(message.to_string());
    }
}

/// An in-memory settings store with change notifications.
pub struct MemorySettings {
    records: Mutex<HashMap<(Scope, String), Value>>,
    version: AtomicU64,
    sender: watch::Sender<ChangeNotice>,
}

impl MemorySettings {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ChangeNotice::default());
        Self {
            records: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
            sender,
        }
    }

    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }

    fn notify(&self, scope: Scope, key: &str) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.sender.send_replace(ChangeNotice {
            version,
            scope,
            key: key.to_string(),
        });
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn read(&self, scope: Scope, key: &str) -> Result<Option<Value>, HostError> {
        Ok(lock(&self.records).get(&(scope, key.to_string())).cloned())
    }

    async fn write(&self, scope: Scope, key: &str, value: Value) -> Result<(), HostError> {
        lock(&self.records).insert((scope, key.to_string()), value);
        self.notify(scope, key);
        Ok(())
    }

    async fn delete(&self, scope: Scope, key: &str) -> Result<(), HostError> {
        lock(&self.records).remove(&(scope, key.to_string()));
        self.notify(scope, key);
        Ok(())
    }

    fn changes(&self) -> watch::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A fully wired engine over in-memory ports, for scenario tests.
pub struct DowntimeHarness {
    pub engine: DowntimeEngine,
    pub dice: Arc<FixedDice>,
    pub characters: Arc<MemoryCharacters>,
    pub compendium: Arc<MemoryCompendium>,
    pub notifier: Arc<RecordingNotifier>,
    pub settings: Arc<MemorySettings>,
    pub roster: Vec<RosterEntry>,
}

impl DowntimeHarness {
    /// Create a harness with empty stores.
    pub fn new() -> Self {
        let dice = Arc::new(FixedDice::new());
        let characters = Arc::new(MemoryCharacters::new());
        let compendium = Arc::new(MemoryCompendium::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let settings = Arc::new(MemorySettings::new());

        let engine = DowntimeEngine::new(
            dice.clone(),
            characters.clone(),
            compendium.clone(),
            notifier.clone(),
            settings.clone(),
        );
        Self {
            engine,
            dice,
            characters,
            compendium,
            notifier,
            settings,
            roster: Vec::new(),
        }
    }

    /// Add a connected sample character to the roster and store.
    pub fn add_character(&mut self, name: &str, level: u8) -> CharacterId {
        let character = sample_adventurer(name, level);
        let id = character.id;
        self.characters.insert(character);
        self.roster.push(RosterEntry {
            character: id,
            user: UserId::new(),
            connected: true,
        });
        id
    }

    /// Current stored state of a character. Panics when absent.
    pub fn character(&self, id: CharacterId) -> Character {
        self.characters
            .get(id)
            .unwrap_or_else(|| panic!("character {id} not in store"))
    }

    /// Edit a stored character in place.
    pub fn edit_character(&self, id: CharacterId, f: impl FnOnce(&mut Character)) {
        self.characters.edit(id, f);
    }

    pub fn queue_rolls(&self, faces: impl IntoIterator<Item = u32>) {
        self.dice.queue_rolls(faces);
    }

    /// Open a session over every character added so far.
    pub async fn open(&self) -> Session {
        self.engine
            .store()
            .open(&self.roster)
            .await
            .expect("session open failed")
    }

    /// Toggle a move by key string, validating against the live catalog.
    pub async fn toggle(&self, id: CharacterId, key: &str) {
        self.engine
            .toggle_move(id, &crate::catalog::MoveKey::new(key))
            .await
            .expect("move toggle failed");
    }

    /// Settle the open session.
    pub async fn settle(&self) -> SettlementReport {
        self.engine.settle().await.expect("settlement failed")
    }
}

impl Default for DowntimeHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

#[track_caller]
fn actor_events<'a>(report: &'a SettlementReport, name: &str) -> &'a [String] {
    report
        .actors
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.events.as_slice())
        .unwrap_or_else(|| panic!("Expected actor '{name}' in report"))
}

/// Assert that an actor's log has an event containing the needle.
#[track_caller]
pub fn assert_event_contains(report: &SettlementReport, name: &str, needle: &str) {
    let events = actor_events(report, name);
    assert!(
        events.iter().any(|e| e.contains(needle)),
        "Expected an event containing '{needle}' for {name}, got {events:?}"
    );
}

/// Assert that an actor's log has NO event containing the needle.
#[track_caller]
pub fn assert_no_event(report: &SettlementReport, name: &str, needle: &str) {
    let events = actor_events(report, name);
    assert!(
        !events.iter().any(|e| e.contains(needle)),
        "Expected no event containing '{needle}' for {name}, got {events:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::RestType;

    #[tokio::test]
    async fn test_fixed_dice_returns_script_in_order() {
        let dice = FixedDice::new();
        dice.queue_rolls([3, 1]);
        assert_eq!(dice.roll("1d4", true).await.unwrap().total, 3);
        assert_eq!(dice.roll("1d6", false).await.unwrap().total, 1);
        assert!(dice.roll("1d4", true).await.is_err());
    }

    #[tokio::test]
    async fn test_fixed_dice_applies_notation_modifier() {
        let dice = FixedDice::new();
        dice.queue_rolls([2]);
        assert_eq!(dice.roll("1d4+3", true).await.unwrap().total, 5);
    }

    #[tokio::test]
    async fn test_memory_characters_apply_and_fail_injection() {
        let store = MemoryCharacters::new();
        let character = sample_adventurer("Riva", 3);
        let id = character.id;
        store.insert(character);

        store
            .apply(id, CharacterUpdate::SetStress(4))
            .await
            .unwrap();
        assert_eq!(store.get(id).unwrap().stress.value, 4);

        store.fail_writes_for(id);
        assert!(store.apply(id, CharacterUpdate::SetStress(0)).await.is_err());
        assert_eq!(store.get(id).unwrap().stress.value, 4);
    }

    #[tokio::test]
    async fn test_memory_settings_notifies_on_write() {
        let settings = MemorySettings::new();
        let mut changes = settings.changes();
        settings
            .write(Scope::World, "downtime.session", Value::Null)
            .await
            .unwrap();
        changes.changed().await.unwrap();
        let notice = changes.borrow_and_update().clone();
        assert_eq!(notice.key, "downtime.session");
        assert_eq!(notice.version, 1);
    }

    #[tokio::test]
    async fn test_harness_open_defaults() {
        let mut harness = DowntimeHarness::new();
        harness.add_character("Riva", 3);
        harness.add_character("Tarn", 1);

        let session = harness.open().await;
        assert_eq!(session.rest_type, RestType::Short);
        assert_eq!(session.participants.len(), 2);
        assert!(session.eligible().count() == 2);
        assert!(session.choices.is_empty());
    }
}
