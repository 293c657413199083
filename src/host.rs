//! Host integration ports.
//!
//! The engine runs inside a virtual tabletop host but never touches it
//! directly; everything it needs from the outside world goes through the
//! five traits here. Hosts implement these against their own document
//! and settings APIs; `testing` provides in-memory implementations.

use crate::character::{Character, CharacterId, CharacterUpdate, ItemRef, ItemSpec, UserId};
use crate::dice::{DiceError, RollResult};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced by host ports.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("character {0} not found")]
    CharacterNotFound(CharacterId),

    #[error("dice error: {0}")]
    Dice(#[from] DiceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// Rolls dice on behalf of the engine.
#[async_trait]
pub trait DiceRoller: Send + Sync {
    /// Roll a notation. When `visible` is set the host may animate the
    /// roll for connected viewers; the result is the same either way.
    async fn roll(&self, notation: &str, visible: bool) -> Result<RollResult, HostError>;
}

/// Read and mutate character documents.
#[async_trait]
pub trait CharacterStore: Send + Sync {
    /// Fetch a snapshot, `None` when the id no longer resolves.
    async fn fetch(&self, id: CharacterId) -> Result<Option<Character>, HostError>;

    /// Apply one granular update to the backing document.
    async fn apply(&self, id: CharacterId, update: CharacterUpdate) -> Result<(), HostError>;

    /// Instantiate an item definition into the character's inventory.
    async fn grant_item(&self, id: CharacterId, item: &ItemSpec) -> Result<(), HostError>;
}

/// Resolve item references against the host's content library.
#[async_trait]
pub trait Compendium: Send + Sync {
    /// Look up a reference, `None` when it no longer resolves.
    async fn lookup(&self, reference: &ItemRef) -> Result<Option<ItemSpec>, HostError>;
}

/// Transient user-facing notifications. Non-blocking by contract.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Which bucket a settings record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// Shared by every connected client.
    #[default]
    World,
    /// Private to one user, but readable by the GM.
    User(UserId),
}

/// Emitted on every settings write so clients can re-read.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotice {
    /// Monotonic write counter. A receiver that wakes late sees only the
    /// latest notice and re-reads whatever it cares about.
    pub version: u64,
    pub scope: Scope,
    pub key: String,
}

/// Replicated key-value settings, scoped per world and per user.
///
/// This is the synchronization primitive for the whole session store:
/// last write wins per key, and every write bumps the change channel.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn read(&self, scope: Scope, key: &str) -> Result<Option<Value>, HostError>;

    async fn write(&self, scope: Scope, key: &str, value: Value) -> Result<(), HostError>;

    async fn delete(&self, scope: Scope, key: &str) -> Result<(), HostError>;

    /// Subscribe to write notifications.
    fn changes(&self) -> watch::Receiver<ChangeNotice>;
}
