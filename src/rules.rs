//! Settlement: consume an open downtime session in one deterministic pass.
//!
//! The pass snapshots the session, rolls the GM fear gain, resolves every
//! participant's selected moves in order, applies automatic passives, runs
//! the refresh sweep, and clears the session. Character mutations go
//! through the host ports immediately per computed delta; a failed write
//! is logged and the pass continues, so a partial settlement still lands
//! everything it could (no rollback). Dice and document updates are
//! awaited in sequence, which keeps event order deterministic.

use crate::catalog::{self, CatalogConfig, MoveAction, MoveDefinition, MoveKey};
use crate::character::{Character, CharacterId, CharacterUpdate, ItemRef, ItemSpec, RestType};
use crate::features::{self, FeatureEntry, FeatureFlag, FeatureSet};
use crate::host::{CharacterStore, Compendium, DiceRoller, HostError, Notifier, SettingsStore};
use crate::persist::{self, PersistError};
use crate::refresh::plan_refresh;
use crate::session::{ParticipantChoice, ParticipantConfig, Session, SessionError, SessionStore};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Ceiling of the GM's fear pool.
pub const FEAR_MAX: u32 = 12;

const FEAR_DIE: &str = "1d4";
const RECOVERY_DIE: &str = "1d4";
const FORAGE_DIE: &str = "1d6";

#[derive(Error, Debug)]
pub enum SettleError {
    #[error("no downtime session is open")]
    NotOpen,

    #[error("no eligible participants")]
    NoEligibleParticipants,

    #[error("fear roll failed: {0}")]
    FearRoll(HostError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Host(#[from] HostError),
}

// ============================================================================
// Settlement result
// ============================================================================

/// The GM fear gain for one settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FearGain {
    /// The raw die face.
    pub roll: u32,
    /// Total added this settlement (die plus long-rest participant count).
    pub added: u32,
    /// New pool value after the ceiling.
    pub total: u32,
    /// Display text such as `(1d4 + 3 PCs) 2 + 3`.
    pub breakdown: String,
}

fn fear_gain(roll: u32, current: u32, participants: usize, is_long: bool) -> FearGain {
    let mut added = roll;
    let mut breakdown = format!("({FEAR_DIE}) {roll}");
    if is_long {
        added += participants as u32;
        breakdown = format!("({FEAR_DIE} + {participants} PCs) {roll} + {participants}");
    }
    FearGain {
        roll,
        added,
        total: current.saturating_add(added).min(FEAR_MAX),
        breakdown,
    }
}

/// Everything one character did during the settlement, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorLog {
    pub character: CharacterId,
    pub name: String,
    pub events: Vec<String>,
}

/// The settlement outcome: fear gain plus per-character event logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub rest_type: RestType,
    pub fear: FearGain,
    pub actors: Vec<ActorLog>,
}

impl SettlementReport {
    /// Plain-text surface for the host to post wherever it reports rests.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SettlementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.rest_type.label())?;
        writeln!(f, "The GM earns Fear: +{}", self.fear.added)?;
        writeln!(f, "{}", self.fear.breakdown)?;
        writeln!(f, "Current Total: {}", self.fear.total)?;
        for actor in &self.actors {
            if actor.events.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "{}", actor.name)?;
            for event in &actor.events {
                writeln!(f, "- {event}")?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The downtime rules engine, wired to the host through its ports.
pub struct DowntimeEngine {
    dice: Arc<dyn DiceRoller>,
    characters: Arc<dyn CharacterStore>,
    compendium: Arc<dyn Compendium>,
    notifier: Arc<dyn Notifier>,
    store: SessionStore,
}

impl DowntimeEngine {
    pub fn new(
        dice: Arc<dyn DiceRoller>,
        characters: Arc<dyn CharacterStore>,
        compendium: Arc<dyn Compendium>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            dice,
            characters,
            compendium,
            notifier,
            store: SessionStore::new(settings),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The feature table currently in force (defaults merged with GM
    /// overrides).
    pub async fn feature_table(&self) -> Result<Vec<FeatureEntry>, SettleError> {
        let overrides = persist::load_feature_overrides(self.store.settings()).await?;
        Ok(features::merged_table(&overrides))
    }

    /// The moves one character can select right now.
    pub async fn catalog_for(&self, id: CharacterId) -> Result<Vec<MoveDefinition>, SettleError> {
        let session = self.store.session().await?.ok_or(SettleError::NotOpen)?;
        let character = self
            .characters
            .fetch(id)
            .await?
            .ok_or(HostError::CharacterNotFound(id))?;
        let table = self.feature_table().await?;
        let feature_set = features::resolve(&character, &table);
        let config = persist::load_catalog_config(self.store.settings()).await?;
        Ok(catalog::available_moves(
            &character,
            session.rest_type,
            &feature_set,
            &config,
            self.compendium.as_ref(),
        )
        .await)
    }

    /// Toggle a move for a character, validating against their current
    /// catalog.
    pub async fn toggle_move(&self, id: CharacterId, key: &MoveKey) -> Result<(), SettleError> {
        let available = self.catalog_for(id).await?;
        self.store.toggle_move(id, key, &available).await?;
        Ok(())
    }

    /// Resolve the open session. Returns the report; the session is cleared
    /// on success.
    pub async fn settle(&self) -> Result<SettlementReport, SettleError> {
        let session = self.store.session().await?.ok_or(SettleError::NotOpen)?;
        let is_long = session.rest_type.is_long();

        // Assemble the cast: included participants whose characters resolve.
        let mut cast: Vec<CharacterId> = Vec::new();
        let mut sheets: HashMap<CharacterId, Character> = HashMap::new();
        for (id, _) in session.eligible() {
            match self.characters.fetch(*id).await {
                Ok(Some(character)) => {
                    cast.push(*id);
                    sheets.insert(*id, character);
                }
                Ok(None) => {
                    tracing::warn!(character = %id, "participant no longer resolves, skipped")
                }
                Err(err) => {
                    tracing::warn!(character = %id, %err, "character fetch failed, skipped")
                }
            }
        }
        if cast.is_empty() {
            self.notifier.warn("No actors selected for downtime.");
            return Err(SettleError::NoEligibleParticipants);
        }

        // Fear first. A failed roll aborts before anything is written.
        let face = self
            .dice
            .roll(FEAR_DIE, true)
            .await
            .map_err(SettleError::FearRoll)?
            .total
            .max(0) as u32;
        let current_fear = persist::load_fear(self.store.settings()).await?;
        let fear = fear_gain(face, current_fear, cast.len(), is_long);
        persist::save_fear(self.store.settings(), fear.total).await?;

        let table = self.feature_table().await?;
        let features: HashMap<CharacterId, FeatureSet> = cast
            .iter()
            .map(|id| (*id, features::resolve(&sheets[id], &table)))
            .collect();

        // Prepare pairs over the resolved cast, not the raw roster.
        let preparers = cast
            .iter()
            .filter(|id| {
                session.choice(**id).is_some_and(|choice| {
                    choice
                        .actions
                        .iter()
                        .any(|key| MoveAction::parse(key) == Some(MoveAction::Prepare))
                })
            })
            .count();
        let pair_bonus: u32 = if preparers >= 2 { 2 } else { 1 };

        let catalog_config = persist::load_catalog_config(self.store.settings()).await?;

        let mut pass = Pass {
            engine: self,
            session: &session,
            pair_bonus,
            catalog_config,
            features,
            sheets,
            events: cast.iter().map(|id| (*id, Vec::new())).collect(),
        };

        for actor in &cast {
            let choice = session.choice(*actor).cloned().unwrap_or_default();
            for key in &choice.actions {
                let effective_long = is_long
                    || (pass.has_feature(*actor, FeatureFlag::Efficient)
                        && choice.efficient_slot.as_ref() == Some(key));
                pass.resolve_move(*actor, key, &choice, effective_long).await;
            }
        }

        for actor in &cast {
            pass.mender_passive(*actor).await;
        }

        for actor in &cast {
            let slot_filled = session
                .choice(*actor)
                .and_then(|choice| choice.efficient_slot.as_ref())
                .is_some();
            let effective_long =
                is_long || (pass.has_feature(*actor, FeatureFlag::Efficient) && slot_filled);
            pass.refresh_sweep(*actor, effective_long).await;
        }

        let Pass {
            sheets, mut events, ..
        } = pass;
        let actors = cast
            .iter()
            .map(|id| ActorLog {
                character: *id,
                name: sheets[id].name.clone(),
                events: events.remove(id).unwrap_or_default(),
            })
            .collect();
        let report = SettlementReport {
            rest_type: session.rest_type,
            fear,
            actors,
        };

        self.store.clear().await?;
        Ok(report)
    }
}

// ============================================================================
// One settlement pass
// ============================================================================

/// Working state for a single settlement. Sheets are in-memory copies
/// mutated alongside the store writes so later moves in the same pass see
/// earlier deltas even when a store write fails.
struct Pass<'a> {
    engine: &'a DowntimeEngine,
    session: &'a Session,
    pair_bonus: u32,
    catalog_config: CatalogConfig,
    features: HashMap<CharacterId, FeatureSet>,
    sheets: HashMap<CharacterId, Character>,
    events: BTreeMap<CharacterId, Vec<String>>,
}

impl Pass<'_> {
    fn has_feature(&self, id: CharacterId, flag: FeatureFlag) -> bool {
        self.features.get(&id).is_some_and(|f| f.has(flag))
    }

    fn feature_count(&self, id: CharacterId, flag: FeatureFlag) -> u32 {
        self.features.get(&id).map_or(0, |f| f.count(flag))
    }

    fn modifier_of(&self, id: CharacterId, get: impl Fn(&ParticipantConfig) -> u32) -> u32 {
        self.session.participants.get(&id).map(get).unwrap_or(0)
    }

    fn log(&mut self, actor: CharacterId, line: String) {
        self.events.entry(actor).or_default().push(line);
    }

    async fn roll(&self, notation: &str) -> Option<u32> {
        match self.engine.dice.roll(notation, true).await {
            Ok(result) => Some(result.total.max(0) as u32),
            Err(err) => {
                tracing::warn!(%notation, %err, "dice roll failed, move skipped");
                None
            }
        }
    }

    async fn apply(&self, id: CharacterId, update: CharacterUpdate) {
        if let Err(err) = self.engine.characters.apply(id, update).await {
            tracing::warn!(character = %id, %err, "character update failed, continuing");
        }
    }

    /// Resolve a move's target: the stored pick, the actor when none is
    /// stored, or the actor again when the pick no longer resolves.
    async fn resolve_target(
        &mut self,
        actor: CharacterId,
        key: &MoveKey,
        choice: &ParticipantChoice,
    ) -> CharacterId {
        let Some(target) = choice.targets.get(key).copied() else {
            return actor;
        };
        if target == actor || self.sheets.contains_key(&target) {
            return target;
        }
        match self.engine.characters.fetch(target).await {
            Ok(Some(character)) => {
                self.sheets.insert(target, character);
                target
            }
            Ok(None) => {
                tracing::warn!(character = %target, "target vanished, falling back to self");
                actor
            }
            Err(err) => {
                tracing::warn!(character = %target, %err, "target fetch failed, falling back to self");
                actor
            }
        }
    }

    fn of_suffix(&self, actor: CharacterId, target: CharacterId) -> String {
        if target == actor {
            String::new()
        } else {
            format!(" of {}", self.sheets[&target].name)
        }
    }

    async fn resolve_move(
        &mut self,
        actor: CharacterId,
        key: &MoveKey,
        choice: &ParticipantChoice,
        effective_long: bool,
    ) {
        let Some(action) = MoveAction::parse(key) else {
            tracing::debug!(key = %key, "unknown move key skipped");
            return;
        };
        match action {
            MoveAction::TendWounds => self.tend_wounds(actor, key, choice, effective_long).await,
            MoveAction::ClearStress => self.clear_stress(actor, effective_long).await,
            MoveAction::RepairArmor => self.repair_armor(actor, key, choice, effective_long).await,
            MoveAction::Prepare => self.prepare(actor).await,
            // Project progress is tracked at the table, not by the engine.
            MoveAction::WorkOnProject => {}
            MoveAction::Forage => self.forage(actor, choice).await,
            MoveAction::Craft(recipe) => self.craft(actor, &recipe).await,
            MoveAction::Custom(label) => self.log(actor, label),
            MoveAction::ItemLinked(reference) => self.item_move(actor, &reference).await,
        }
    }

    async fn tend_wounds(
        &mut self,
        actor: CharacterId,
        key: &MoveKey,
        choice: &ParticipantChoice,
        effective_long: bool,
    ) {
        let target = self.resolve_target(actor, key, choice).await;
        let suffix = self.of_suffix(actor, target);

        if effective_long {
            if let Some(sheet) = self.sheets.get_mut(&target) {
                sheet.hit_points.value = 0;
            }
            self.apply(target, CharacterUpdate::SetHitPoints(0)).await;
            self.log(actor, format!("Tend to Wounds{suffix} (Recover All HP)"));
            return;
        }

        let Some(roll) = self.roll(RECOVERY_DIE).await else {
            return;
        };
        let tier = self.sheets[&actor].tier();
        let modifier = self.modifier_of(target, |c| c.hp_modifier);
        let feat = self.feature_count(actor, FeatureFlag::FieldMedic);
        let recovery = roll + tier + modifier + feat;

        let new_hp = {
            let Some(sheet) = self.sheets.get_mut(&target) else {
                return;
            };
            sheet.hit_points.value = sheet.hit_points.value.saturating_sub(recovery);
            sheet.hit_points.value
        };
        self.apply(target, CharacterUpdate::SetHitPoints(new_hp)).await;

        let mod_text = amount_suffix(modifier, "mod");
        let feat_text = amount_suffix(feat, "feat");
        self.log(
            actor,
            format!("Tend to Wounds{suffix} (Recover {recovery} HP [Roll: {roll}{mod_text}{feat_text}])"),
        );

        // Patching someone else up costs the field medic stress in kind.
        if target != actor && feat > 0 {
            let (marked, new_stress) = {
                let Some(sheet) = self.sheets.get_mut(&actor) else {
                    return;
                };
                let headroom = sheet.stress.max.saturating_sub(sheet.stress.value);
                let marked = feat.min(headroom);
                sheet.stress.value += marked;
                (marked, sheet.stress.value)
            };
            if marked > 0 {
                self.apply(actor, CharacterUpdate::SetStress(new_stress)).await;
                self.log(actor, format!("Field Medic strain (Mark {marked} Stress)"));
            }
        }
    }

    async fn clear_stress(&mut self, actor: CharacterId, effective_long: bool) {
        if effective_long {
            if let Some(sheet) = self.sheets.get_mut(&actor) {
                sheet.stress.value = 0;
            }
            self.apply(actor, CharacterUpdate::SetStress(0)).await;
            self.log(actor, "Clear Stress (Recover All Stress)".to_string());
            return;
        }

        let Some(roll) = self.roll(RECOVERY_DIE).await else {
            return;
        };
        let tier = self.sheets[&actor].tier();
        let modifier = self.modifier_of(actor, |c| c.stress_modifier);
        let recovery = roll + tier + modifier;

        let new_stress = {
            let Some(sheet) = self.sheets.get_mut(&actor) else {
                return;
            };
            sheet.stress.value = sheet.stress.value.saturating_sub(recovery);
            sheet.stress.value
        };
        self.apply(actor, CharacterUpdate::SetStress(new_stress)).await;

        let mod_text = amount_suffix(modifier, "mod");
        self.log(
            actor,
            format!("Clear Stress (Recover {recovery} Stress [Roll: {roll}{mod_text}])"),
        );
    }

    async fn repair_armor(
        &mut self,
        actor: CharacterId,
        key: &MoveKey,
        choice: &ParticipantChoice,
        effective_long: bool,
    ) {
        let target = self.resolve_target(actor, key, choice).await;
        let suffix = self.of_suffix(actor, target);

        if effective_long {
            let armor: Vec<_> = self.sheets[&target]
                .armor_items()
                .map(|item| item.id)
                .collect();
            if let Some(sheet) = self.sheets.get_mut(&target) {
                for item in sheet.items.iter_mut().filter(|i| i.is_armor()) {
                    item.marks = Some(0);
                }
            }
            for item in armor {
                self.apply(target, CharacterUpdate::SetArmorMarks { item, marks: 0 })
                    .await;
            }
            self.log(
                actor,
                format!("Repair Armor{suffix} (Recover All Armor Slots)"),
            );
            return;
        }

        let Some(roll) = self.roll(RECOVERY_DIE).await else {
            return;
        };
        let tier = self.sheets[&actor].tier();
        let modifier = self.modifier_of(target, |c| c.armor_modifier);
        let reduction = roll + tier + modifier;

        // Spread the reduction across equipped armor in inventory order.
        let mut updates = Vec::new();
        if let Some(sheet) = self.sheets.get_mut(&target) {
            let mut remaining = reduction;
            for item in sheet.items.iter_mut().filter(|i| i.is_armor()) {
                if remaining == 0 {
                    break;
                }
                let current = item.marks.unwrap_or(0);
                if current == 0 {
                    continue;
                }
                let removed = current.min(remaining);
                item.marks = Some(current - removed);
                remaining -= removed;
                updates.push(CharacterUpdate::SetArmorMarks {
                    item: item.id,
                    marks: current - removed,
                });
            }
        }
        for update in updates {
            self.apply(target, update).await;
        }

        let mod_text = amount_suffix(modifier, "mod");
        self.log(
            actor,
            format!("Repair Armor{suffix} (Recover {reduction} Armor Slots [Roll: {roll}{mod_text}])"),
        );
    }

    async fn prepare(&mut self, actor: CharacterId) {
        let modifier = self.modifier_of(actor, |c| c.hope_modifier);
        let total_gain = self.pair_bonus + modifier;
        let (actual, new_hope) = {
            let Some(sheet) = self.sheets.get_mut(&actor) else {
                return;
            };
            // Effects can hold hope above its max; the cap never drains the pool.
            let current = sheet.hope.value;
            let new_hope = current
                .saturating_add(total_gain)
                .min(sheet.hope.max)
                .max(current);
            let actual = new_hope.saturating_sub(current);
            sheet.hope.value = new_hope;
            (actual, new_hope)
        };
        self.apply(actor, CharacterUpdate::SetHope(new_hope)).await;

        let paired = if self.pair_bonus == 2 { ", paired" } else { "" };
        let mod_text = amount_suffix(modifier, "mod");
        let capped = if actual < total_gain { " [capped]" } else { "" };
        self.log(
            actor,
            format!("Prepare (+{actual} Hope{paired}{mod_text}{capped})"),
        );
    }

    async fn forage(&mut self, actor: CharacterId, choice: &ParticipantChoice) {
        let Some(roll) = self.roll(FORAGE_DIE).await else {
            return;
        };
        // The top face defers to the player's pre-selected row.
        let (option, chose) = if roll <= 5 {
            (catalog::forager_option(roll as u8), false)
        } else {
            (
                catalog::forager_option(choice.forager_pick.unwrap_or(1)),
                true,
            )
        };
        let chosen_text = if chose { " (Chose)" } else { "" };
        self.log(
            actor,
            format!(
                "Forage [Roll: {roll}{chosen_text}] - {} ({})",
                option.label, option.effect
            ),
        );
        // Finds exist only in the forage table, so the grant skips the
        // compendium and creates the item from the row itself.
        self.grant(actor, &ItemSpec::adhoc(option.label, option.kind))
            .await;
    }

    async fn craft(&mut self, actor: CharacterId, recipe: &ItemRef) {
        let recipe_name = match self.engine.compendium.lookup(recipe).await {
            Ok(Some(spec)) => spec.name,
            Ok(None) => "Unknown Recipe".to_string(),
            Err(err) => {
                tracing::warn!(reference = %recipe, %err, "recipe lookup failed");
                "Unknown Recipe".to_string()
            }
        };
        self.log(actor, format!("Used {recipe_name}"));

        let product = self
            .catalog_config
            .craft_entries
            .iter()
            .find(|entry| entry.recipe_ref == *recipe)
            .map(|entry| entry.product_ref.clone());
        match product {
            Some(product) => self.grant_by_ref(actor, &product).await,
            None => {
                tracing::warn!(reference = %recipe, "no configured product for recipe, grant skipped")
            }
        }
    }

    async fn item_move(&mut self, actor: CharacterId, reference: &ItemRef) {
        let name = match self.engine.compendium.lookup(reference).await {
            Ok(Some(spec)) => spec.name,
            Ok(None) => "Unknown Item".to_string(),
            Err(err) => {
                tracing::warn!(reference = %reference, %err, "item move lookup failed");
                "Unknown Item".to_string()
            }
        };
        self.log(actor, name);
    }

    /// Instantiate an item into the actor's inventory and announce it.
    async fn grant(&self, actor: CharacterId, spec: &ItemSpec) {
        if let Err(err) = self.engine.characters.grant_item(actor, spec).await {
            tracing::warn!(character = %actor, item = %spec.name, %err, "item grant failed");
            return;
        }
        let name = &self.sheets[&actor].name;
        self.engine.notifier.info(&format!(
            "{name} crafted {} and it was added to their inventory.",
            spec.name
        ));
    }

    /// Resolve a reference through the compendium, then grant it.
    async fn grant_by_ref(&self, actor: CharacterId, reference: &ItemRef) {
        let spec = match self.engine.compendium.lookup(reference).await {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                tracing::warn!(reference = %reference, "product no longer resolves, grant skipped");
                return;
            }
            Err(err) => {
                tracing::warn!(reference = %reference, %err, "product lookup failed, grant skipped");
                return;
            }
        };
        self.grant(actor, &spec).await;
    }

    /// Menders shed one stress per copy without spending a move.
    async fn mender_passive(&mut self, actor: CharacterId) {
        let count = self.feature_count(actor, FeatureFlag::Mender);
        if count == 0 {
            return;
        }
        let (cleared, new_stress) = {
            let Some(sheet) = self.sheets.get_mut(&actor) else {
                return;
            };
            let cleared = count.min(sheet.stress.value);
            sheet.stress.value -= cleared;
            (cleared, sheet.stress.value)
        };
        if cleared > 0 {
            self.apply(actor, CharacterUpdate::SetStress(new_stress)).await;
            self.log(actor, format!("Mender (Clear {cleared} Stress)"));
        }
    }

    /// Reset recovery-marked item counters and report what refreshed.
    async fn refresh_sweep(&mut self, actor: CharacterId, effective_long: bool) {
        let Some(sheet) = self.sheets.get(&actor) else {
            return;
        };
        let plans = plan_refresh(sheet, effective_long);
        let mut refreshed = Vec::new();
        for plan in plans {
            let mut landed = true;
            for update in plan.updates() {
                if let Err(err) = self.engine.characters.apply(actor, update).await {
                    tracing::warn!(character = %actor, item = %plan.item_name, %err, "refresh update failed");
                    landed = false;
                    break;
                }
            }
            if landed {
                refreshed.push(plan.item_name);
            }
        }
        if !refreshed.is_empty() {
            self.log(actor, format!("Refreshed: {}", refreshed.join(", ")));
        }
    }
}

fn amount_suffix(amount: u32, label: &str) -> String {
    if amount > 0 {
        format!(" +{amount} {label}")
    } else {
        String::new()
    }
}
