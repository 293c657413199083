//! The replicated downtime session: who is resting, what the GM configured
//! for each of them, and which moves each player picked.
//!
//! All state lives in the host settings store so every connected client
//! sees the same session. Writes are last-write-wins per record; each
//! participant's choices live in their own user-scoped record, so two
//! players editing their own picks never clobber each other. Only
//! concurrent writes to the *same* character's choices race, and the
//! later write simply wins.

use crate::catalog::{MoveAction, MoveDefinition, MoveKey};
use crate::character::{CharacterId, RestType, UserId};
use crate::features::{FeatureFlag, FeatureSet};
use crate::host::{ChangeNotice, HostError, SettingsStore};
use crate::persist::{self, PersistError, PersistedActorConfig, SessionRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;

/// How long an open-broadcast ping stays valid.
pub const OPEN_STALENESS_MS: u64 = 30_000;

/// Moves a participant may make per downtime, before feature bonuses.
pub const DEFAULT_MOVE_BUDGET: u32 = 2;

const MOVE_BUDGET_MIN: u32 = 1;
const MOVE_BUDGET_MAX: u32 = 6;
const MODIFIER_MAX: u32 = 10;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no downtime session is open")]
    NotOpen,

    #[error("character {0} is not part of this session")]
    UnknownParticipant(CharacterId),

    #[error("move {0} is not available to this character")]
    UnknownMove(MoveKey),

    #[error("forage pick {0} is out of range")]
    InvalidForagerChoice(u8),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Record(#[from] PersistError),
}

// ============================================================================
// Session data
// ============================================================================

/// GM-side configuration for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantConfig {
    pub user: UserId,
    pub included: bool,
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

impl ParticipantConfig {
    fn persisted(&self) -> PersistedActorConfig {
        PersistedActorConfig {
            move_budget: self.move_budget,
            hp_modifier: self.hp_modifier,
            stress_modifier: self.stress_modifier,
            hope_modifier: self.hope_modifier,
            armor_modifier: self.armor_modifier,
        }
    }
}

/// A partial GM edit to a participant's config. `None` fields are left
/// alone; provided values are clamped to their legal ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub included: Option<bool>,
    pub move_budget: Option<u32>,
    pub hp_modifier: Option<u32>,
    pub stress_modifier: Option<u32>,
    pub hope_modifier: Option<u32>,
    pub armor_modifier: Option<u32>,
}

impl ConfigPatch {
    fn apply_to(&self, config: &mut ParticipantConfig) {
        if let Some(included) = self.included {
            config.included = included;
        }
        if let Some(budget) = self.move_budget {
            config.move_budget = budget.clamp(MOVE_BUDGET_MIN, MOVE_BUDGET_MAX);
        }
        if let Some(value) = self.hp_modifier {
            config.hp_modifier = value.min(MODIFIER_MAX);
        }
        if let Some(value) = self.stress_modifier {
            config.stress_modifier = value.min(MODIFIER_MAX);
        }
        if let Some(value) = self.hope_modifier {
            config.hope_modifier = value.min(MODIFIER_MAX);
        }
        if let Some(value) = self.armor_modifier {
            config.armor_modifier = value.min(MODIFIER_MAX);
        }
    }
}

/// One player's selections for the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantChoice {
    #[serde(default)]
    pub actions: Vec<MoveKey>,
    #[serde(default)]
    pub targets: HashMap<MoveKey, CharacterId>,
    #[serde(default)]
    pub efficient_slot: Option<MoveKey>,
    #[serde(default)]
    pub forager_pick: Option<u8>,
    #[serde(default)]
    pub eloquent_beneficiary: Option<CharacterId>,
}

/// A consistent snapshot of the replicated session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub timestamp_ms: u64,
    pub rest_type: RestType,
    pub participants: BTreeMap<CharacterId, ParticipantConfig>,
    pub choices: HashMap<CharacterId, ParticipantChoice>,
}

impl Session {
    /// Participants the GM marked as taking part in this downtime.
    pub fn eligible(&self) -> impl Iterator<Item = (&CharacterId, &ParticipantConfig)> {
        self.participants.iter().filter(|(_, c)| c.included)
    }

    pub fn choice(&self, id: CharacterId) -> Option<&ParticipantChoice> {
        self.choices.get(&id)
    }

    /// The advisory move budget for one participant: the GM-set budget,
    /// plus their own industrious copies, plus every included eloquent
    /// holder who named them as beneficiary (full copy count each).
    pub fn effective_budget(
        &self,
        id: CharacterId,
        features: &HashMap<CharacterId, FeatureSet>,
    ) -> u32 {
        let Some(config) = self.participants.get(&id) else {
            return 0;
        };
        let own = features
            .get(&id)
            .map_or(0, |f| f.count(FeatureFlag::Industrious));
        let mut budget = config.move_budget + own;
        for (donor_id, _) in self.eligible() {
            if *donor_id == id {
                continue;
            }
            let names_me = self
                .choice(*donor_id)
                .and_then(|c| c.eloquent_beneficiary)
                .map(|beneficiary| beneficiary == id)
                .unwrap_or(false);
            if names_me {
                if let Some(donor_features) = features.get(donor_id) {
                    budget += donor_features.count(FeatureFlag::Eloquent);
                }
            }
        }
        budget
    }

    /// Whether a participant has selected more budgeted moves than their
    /// effective budget allows. Advisory only; settlement never blocks on it.
    pub fn over_budget(
        &self,
        id: CharacterId,
        features: &HashMap<CharacterId, FeatureSet>,
    ) -> bool {
        let selected = self
            .choice(id)
            .map(|choice| {
                choice
                    .actions
                    .iter()
                    .filter(|key| {
                        MoveAction::parse(key)
                            .map(|action| !action.is_bonus())
                            .unwrap_or(false)
                    })
                    .count() as u32
            })
            .unwrap_or(0);
        selected > self.effective_budget(id, features)
    }
}

/// One row of the host's character roster, as seen at session open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub character: CharacterId,
    pub user: UserId,
    pub connected: bool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Store
// ============================================================================

/// Replicated session state, backed by the host settings store.
#[derive(Clone)]
pub struct SessionStore {
    settings: Arc<dyn SettingsStore>,
}

impl SessionStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    /// Subscribe to settings-store change notices, for clients that
    /// re-render on replication.
    pub fn changes(&self) -> watch::Receiver<ChangeNotice> {
        self.settings.changes()
    }

    /// Open a fresh session over the given roster. Persisted per-character
    /// configs are merged over defaults, every player's stale choice record
    /// is deleted, and the open broadcast is written.
    pub async fn open(&self, roster: &[RosterEntry]) -> Result<Session, SessionError> {
        let saved = persist::load_actor_configs(self.settings()).await?;
        let mut participants = BTreeMap::new();
        for entry in roster {
            let config = match saved.get(&entry.character) {
                Some(saved) => ParticipantConfig {
                    user: entry.user,
                    included: entry.connected,
                    move_budget: saved.move_budget.clamp(MOVE_BUDGET_MIN, MOVE_BUDGET_MAX),
                    hp_modifier: saved.hp_modifier.min(MODIFIER_MAX),
                    stress_modifier: saved.stress_modifier.min(MODIFIER_MAX),
                    hope_modifier: saved.hope_modifier.min(MODIFIER_MAX),
                    armor_modifier: saved.armor_modifier.min(MODIFIER_MAX),
                },
                None => ParticipantConfig {
                    user: entry.user,
                    included: entry.connected,
                    move_budget: DEFAULT_MOVE_BUDGET,
                    hp_modifier: 0,
                    stress_modifier: 0,
                    hope_modifier: 0,
                    armor_modifier: 0,
                },
            };
            participants.insert(entry.character, config);
        }

        for entry in roster {
            persist::delete_choice(self.settings(), entry.user).await?;
        }

        let timestamp_ms = now_ms();
        let record = SessionRecord {
            version: persist::FORMAT_VERSION,
            timestamp_ms,
            rest_type: RestType::Short,
            participants: participants.clone(),
        };
        persist::save_session(self.settings(), &record).await?;
        persist::announce_open(self.settings(), timestamp_ms).await?;

        Ok(Session {
            timestamp_ms,
            rest_type: RestType::Short,
            participants,
            choices: HashMap::new(),
        })
    }

    /// Rewrite the open broadcast so clients that joined late react.
    pub async fn announce(&self) -> Result<(), SessionError> {
        persist::announce_open(self.settings(), now_ms()).await?;
        Ok(())
    }

    /// Whether a fresh open broadcast exists.
    pub async fn is_open(&self) -> Result<bool, SessionError> {
        let open = persist::load_open(self.settings()).await?;
        Ok(open
            .map(|b| b.is_fresh(now_ms(), OPEN_STALENESS_MS))
            .unwrap_or(false))
    }

    /// Read the session record and every participant's choice record as one
    /// snapshot. `None` when no session record exists at all.
    pub async fn session(&self) -> Result<Option<Session>, SessionError> {
        let Some(record) = persist::load_session(self.settings()).await? else {
            return Ok(None);
        };
        let mut choices = HashMap::new();
        for (id, config) in &record.participants {
            if let Some(choice) = persist::load_choice(self.settings(), config.user).await? {
                choices.insert(*id, choice.choice);
            }
        }
        Ok(Some(Session {
            timestamp_ms: record.timestamp_ms,
            rest_type: record.rest_type,
            participants: record.participants,
            choices,
        }))
    }

    async fn require_session(&self) -> Result<SessionRecord, SessionError> {
        persist::load_session(self.settings())
            .await?
            .ok_or(SessionError::NotOpen)
    }

    async fn save_record(&self, record: &SessionRecord) -> Result<(), SessionError> {
        persist::save_session(self.settings(), record).await?;
        Ok(())
    }

    fn participant(
        record: &SessionRecord,
        id: CharacterId,
    ) -> Result<ParticipantConfig, SessionError> {
        record
            .participants
            .get(&id)
            .copied()
            .ok_or(SessionError::UnknownParticipant(id))
    }

    async fn load_choice_of(
        &self,
        record: &SessionRecord,
        id: CharacterId,
    ) -> Result<(UserId, ParticipantChoice), SessionError> {
        let config = Self::participant(record, id)?;
        let choice = persist::load_choice(self.settings(), config.user)
            .await?
            .map(|r| r.choice)
            .unwrap_or_default();
        Ok((config.user, choice))
    }

    /// Apply a GM config edit and persist it for future sessions.
    pub async fn update_config(
        &self,
        id: CharacterId,
        patch: ConfigPatch,
    ) -> Result<(), SessionError> {
        let mut record = self.require_session().await?;
        let config = record
            .participants
            .get_mut(&id)
            .ok_or(SessionError::UnknownParticipant(id))?;
        patch.apply_to(config);
        let persisted = config.persisted();
        self.save_record(&record).await?;

        let mut saved = persist::load_actor_configs(self.settings()).await?;
        saved.insert(id, persisted);
        persist::save_actor_configs(self.settings(), &saved).await?;
        Ok(())
    }

    pub async fn set_included(&self, id: CharacterId, included: bool) -> Result<(), SessionError> {
        let mut record = self.require_session().await?;
        let config = record
            .participants
            .get_mut(&id)
            .ok_or(SessionError::UnknownParticipant(id))?;
        config.included = included;
        self.save_record(&record).await
    }

    /// Switch between short and long rest. Every choice record is cleared,
    /// since the catalogs the players picked from no longer apply.
    pub async fn set_rest_type(&self, rest_type: RestType) -> Result<(), SessionError> {
        let mut record = self.require_session().await?;
        record.rest_type = rest_type;
        self.save_record(&record).await?;
        for config in record.participants.values() {
            persist::delete_choice(self.settings(), config.user).await?;
        }
        Ok(())
    }

    /// Toggle a move in a participant's selection. The key must appear in
    /// the passed catalog. Removing a move drops its target and frees the
    /// efficient slot if it held it; adding `workOnProject` during a short
    /// rest auto-assigns the efficient slot, since that move has no
    /// short-rest execution.
    pub async fn toggle_move(
        &self,
        id: CharacterId,
        key: &MoveKey,
        catalog: &[MoveDefinition],
    ) -> Result<(), SessionError> {
        if !catalog.iter().any(|m| m.key == *key) {
            return Err(SessionError::UnknownMove(key.clone()));
        }
        let record = self.require_session().await?;
        let (user, mut choice) = self.load_choice_of(&record, id).await?;

        if let Some(position) = choice.actions.iter().position(|k| k == key) {
            choice.actions.remove(position);
            choice.targets.remove(key);
            if choice.efficient_slot.as_ref() == Some(key) {
                choice.efficient_slot = None;
            }
        } else {
            choice.actions.push(key.clone());
            let is_project = MoveAction::parse(key) == Some(MoveAction::WorkOnProject);
            if is_project && record.rest_type == RestType::Short {
                choice.efficient_slot = Some(key.clone());
            }
        }

        persist::save_choice(self.settings(), user, &choice).await?;
        Ok(())
    }

    /// Point a targetable move at another character, or back at self with
    /// `None`.
    pub async fn set_target(
        &self,
        id: CharacterId,
        key: &MoveKey,
        target: Option<CharacterId>,
    ) -> Result<(), SessionError> {
        let record = self.require_session().await?;
        let (user, mut choice) = self.load_choice_of(&record, id).await?;
        match target {
            Some(target) => {
                choice.targets.insert(key.clone(), target);
            }
            None => {
                choice.targets.remove(key);
            }
        }
        persist::save_choice(self.settings(), user, &choice).await?;
        Ok(())
    }

    /// Assign which selected move settles at long-rest strength. Setting
    /// the slot it already holds clears it.
    pub async fn set_efficient_slot(
        &self,
        id: CharacterId,
        key: Option<MoveKey>,
    ) -> Result<(), SessionError> {
        let record = self.require_session().await?;
        let (user, mut choice) = self.load_choice_of(&record, id).await?;
        choice.efficient_slot = match key {
            None => None,
            Some(key) if choice.efficient_slot.as_ref() == Some(&key) => None,
            Some(key) => {
                if !choice.actions.contains(&key) {
                    return Err(SessionError::UnknownMove(key));
                }
                Some(key)
            }
        };
        persist::save_choice(self.settings(), user, &choice).await?;
        Ok(())
    }

    /// Pre-select which forage row a top-face roll resolves to.
    pub async fn set_forager_pick(
        &self,
        id: CharacterId,
        pick: Option<u8>,
    ) -> Result<(), SessionError> {
        if let Some(value) = pick {
            if !(1..=5).contains(&value) {
                return Err(SessionError::InvalidForagerChoice(value));
            }
        }
        let record = self.require_session().await?;
        let (user, mut choice) = self.load_choice_of(&record, id).await?;
        choice.forager_pick = pick;
        persist::save_choice(self.settings(), user, &choice).await?;
        Ok(())
    }

    pub async fn set_eloquent_beneficiary(
        &self,
        id: CharacterId,
        beneficiary: Option<CharacterId>,
    ) -> Result<(), SessionError> {
        let record = self.require_session().await?;
        let (user, mut choice) = self.load_choice_of(&record, id).await?;
        choice.eloquent_beneficiary = beneficiary;
        persist::save_choice(self.settings(), user, &choice).await?;
        Ok(())
    }

    /// Reset the session to an empty participant set and delete every
    /// choice record. The emptied record stays readable, so a repeated
    /// settlement finds no eligible participants instead of stale state.
    pub async fn clear(&self) -> Result<(), SessionError> {
        let outgoing = persist::load_session(self.settings()).await?;
        if let Some(record) = &outgoing {
            for config in record.participants.values() {
                persist::delete_choice(self.settings(), config.user).await?;
            }
        }
        let record = SessionRecord {
            version: persist::FORMAT_VERSION,
            timestamp_ms: now_ms(),
            rest_type: RestType::Short,
            participants: BTreeMap::new(),
        };
        self.save_record(&record).await
    }
}
