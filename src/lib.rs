//! Daggerheart downtime rules engine.
//!
//! This crate provides:
//! - A replicated downtime session store (GM setup plus per-player choices)
//! - Per-character feature resolution and move catalogs
//! - Deterministic single-pass settlement with dice, item grants, and
//!   GM fear gain
//! - A refresh sweep for rest-recovery item counters
//!
//! The host (a virtual tabletop or anything else that owns characters,
//! dice, and settings) plugs in through the port traits in [`host`].
//!
//! # Quick Start
//!
//! ```ignore
//! use downtime_core::{DowntimeEngine, MoveKey, RosterEntry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DowntimeEngine::new(dice, characters, compendium, notifier, settings);
//!
//!     engine.store().open(&roster).await?;
//!     engine.toggle_move(riva, &MoveKey::new("clearStress")).await?;
//!
//!     let report = engine.settle().await?;
//!     println!("{}", report.render());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod character;
pub mod dice;
pub mod features;
pub mod host;
pub mod persist;
pub mod refresh;
pub mod rules;
pub mod session;
pub mod testing;

// Primary public API
pub use catalog::{Availability, MoveCategory, MoveDefinition, MoveKey};
pub use character::{Character, CharacterId, ItemRef, ItemSpec, RestType, UserId};
pub use features::{FeatureFlag, FeatureSet};
pub use host::{CharacterStore, Compendium, DiceRoller, HostError, Notifier, SettingsStore};
pub use rules::{DowntimeEngine, SettleError, SettlementReport};
pub use session::{ConfigPatch, RosterEntry, Session, SessionError, SessionStore};
pub use testing::{DowntimeHarness, FixedDice};
