//! The refresh sweep: plan which per-item counters reset when a rest
//! settles.
//!
//! Planning is pure; the settlement engine turns each plan into character
//! store updates. Short-rest markers recover on every rest, long-rest
//! markers only when the move or session is effectively a long rest.

use crate::character::{Character, CharacterUpdate, ItemId};

/// Planned counter resets for one owned item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPlan {
    pub item: ItemId,
    pub item_name: String,
    /// Action ids whose spent uses go back to zero.
    pub action_resets: Vec<String>,
    /// New value for the item resource, when it recovers here.
    pub resource_reset: Option<u32>,
}

impl RefreshPlan {
    /// The store updates that realize this plan.
    pub fn updates(&self) -> Vec<CharacterUpdate> {
        let mut updates: Vec<CharacterUpdate> = self
            .action_resets
            .iter()
            .map(|action| CharacterUpdate::ResetActionUses {
                item: self.item,
                action: action.clone(),
            })
            .collect();
        if let Some(value) = self.resource_reset {
            updates.push(CharacterUpdate::SetItemResource {
                item: self.item,
                value,
            });
        }
        updates
    }
}

/// Plan the refresh for one character. Items with nothing to reset are
/// omitted; counters already at their reset value are skipped so the sweep
/// never reports a no-op.
pub fn plan_refresh(character: &Character, effective_long: bool) -> Vec<RefreshPlan> {
    let mut plans = Vec::new();
    for item in &character.items {
        let action_resets: Vec<String> = item
            .actions
            .iter()
            .filter(|action| {
                action.uses.as_ref().is_some_and(|uses| {
                    uses.value != 0
                        && uses
                            .recovery
                            .is_some_and(|recovery| recovery.recovers(effective_long))
                })
            })
            .map(|action| action.id.clone())
            .collect();

        let resource_reset = item.resource.as_ref().and_then(|resource| {
            let recovers = resource
                .recovery
                .is_some_and(|recovery| recovery.recovers(effective_long));
            let reset = resource.reset_value();
            (recovers && resource.value != reset).then_some(reset)
        });

        if !action_resets.is_empty() || resource_reset.is_some() {
            plans.push(RefreshPlan {
                item: item.id,
                item_name: item.name.clone(),
                action_resets,
                resource_reset,
            });
        }
    }
    plans
}
