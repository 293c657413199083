//! QA tests for downtime settlement: dice outcomes, event lines, item
//! grants, fear gain, and failure tolerance.
//!
//! Everything runs against the in-memory harness, fully deterministic.
//! Run with: `cargo test --test qa_settlement`

use downtime_core::catalog::MoveKey;
use downtime_core::character::{
    ItemAction, ItemResource, OwnedItem, Progression, Recovery, RestType, UseTracker,
};
use downtime_core::persist;
use downtime_core::rules::SettleError;
use downtime_core::session::ParticipantChoice;
use downtime_core::testing::{assert_event_contains, assert_no_event, DowntimeHarness};

fn feature_item(label: &str) -> OwnedItem {
    OwnedItem::named(label)
}

fn armor(name: &str, marks: u32) -> OwnedItem {
    let mut item = OwnedItem::named(name);
    item.equipped = true;
    item.marks = Some(marks);
    item
}

// =============================================================================
// Recovery moves
// =============================================================================

#[tokio::test]
async fn test_short_rest_clear_stress_rolls_recovery() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);
    harness.edit_character(a, |c| c.stress.value = 4);
    harness.edit_character(b, |c| c.stress.value = 2);

    harness.open().await;
    harness.toggle(a, "clearStress").await;
    harness.toggle(b, "clearStress").await;

    // Fear die, then one recovery die per actor.
    harness.queue_rolls([1, 2, 2]);
    let report = harness.settle().await;

    // Tier 1: recovery = 2 + 1 = 3, floored at zero.
    assert_event_contains(&report, "Riva", "Clear Stress (Recover 3 Stress [Roll: 2])");
    assert_event_contains(&report, "Tarn", "Clear Stress (Recover 3 Stress [Roll: 2])");
    assert_eq!(harness.character(a).stress.value, 1);
    assert_eq!(harness.character(b).stress.value, 0);
}

#[tokio::test]
async fn test_long_rest_clear_stress_recovers_all() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 5);
    harness.edit_character(a, |c| c.stress.value = 5);

    harness.open().await;
    harness
        .engine
        .store()
        .set_rest_type(RestType::Long)
        .await
        .unwrap();
    harness.toggle(a, "clearStress").await;

    // Only the fear die rolls on a long rest.
    harness.queue_rolls([2]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Clear Stress (Recover All Stress)");
    assert_eq!(harness.character(a).stress.value, 0);
}

#[tokio::test]
async fn test_tend_wounds_other_uses_target_modifier() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);
    harness.edit_character(b, |c| c.hit_points.value = 6);

    harness.open().await;
    harness
        .engine
        .store()
        .update_config(
            b,
            downtime_core::ConfigPatch {
                hp_modifier: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    harness.toggle(a, "tendWounds").await;
    harness
        .engine
        .store()
        .set_target(a, &MoveKey::new("tendWounds"), Some(b))
        .await
        .unwrap();

    harness.queue_rolls([1, 2]);
    let report = harness.settle().await;

    // Recovery = 2 roll + 1 tier + 2 target modifier.
    assert_event_contains(
        &report,
        "Riva",
        "Tend to Wounds of Tarn (Recover 5 HP [Roll: 2 +2 mod])",
    );
    assert_eq!(harness.character(b).hit_points.value, 1);
    assert_eq!(harness.character(a).hit_points.value, 0);
}

#[tokio::test]
async fn test_vanished_target_falls_back_to_self() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);
    harness.edit_character(a, |c| c.hit_points.value = 3);

    harness.open().await;
    harness.toggle(a, "tendWounds").await;
    harness
        .engine
        .store()
        .set_target(a, &MoveKey::new("tendWounds"), Some(b))
        .await
        .unwrap();

    // The target's sheet disappears before settlement.
    harness.characters.remove(b);

    harness.queue_rolls([1, 4]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Tend to Wounds (Recover 5 HP [Roll: 4])");
    assert_no_event(&report, "Riva", " of ");
    assert_eq!(harness.character(a).hit_points.value, 0);
}

#[tokio::test]
async fn test_repair_armor_spreads_reduction_in_order() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        c.items.push(armor("Plate", 3));
        c.items.push(armor("Shield", 2));
    });

    harness.open().await;
    harness.toggle(a, "repairArmor").await;

    harness.queue_rolls([1, 1]);
    let report = harness.settle().await;

    // Reduction = 1 roll + 1 tier: the first armor item absorbs it all.
    assert_event_contains(
        &report,
        "Riva",
        "Repair Armor (Recover 2 Armor Slots [Roll: 1])",
    );
    let sheet = harness.character(a);
    assert_eq!(sheet.items[0].marks, Some(1));
    assert_eq!(sheet.items[1].marks, Some(2));
}

#[tokio::test]
async fn test_repair_armor_long_clears_every_mark() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        c.items.push(armor("Plate", 3));
        c.items.push(armor("Shield", 2));
    });

    harness.open().await;
    harness
        .engine
        .store()
        .set_rest_type(RestType::Long)
        .await
        .unwrap();
    harness.toggle(a, "repairArmor").await;

    harness.queue_rolls([3]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Repair Armor (Recover All Armor Slots)");
    let sheet = harness.character(a);
    assert_eq!(sheet.items[0].marks, Some(0));
    assert_eq!(sheet.items[1].marks, Some(0));
}

// =============================================================================
// Prepare
// =============================================================================

#[tokio::test]
async fn test_lone_preparer_gains_one_hope() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);

    harness.open().await;
    harness.toggle(a, "prepare").await;

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Prepare (+1 Hope)");
    assert_no_event(&report, "Riva", "paired");
    assert_eq!(harness.character(a).hope.value, 3);
}

#[tokio::test]
async fn test_paired_preparers_gain_two_hope_each() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);
    let c = harness.add_character("Wren", 1);

    harness.open().await;
    harness.toggle(a, "prepare").await;
    harness.toggle(b, "prepare").await;

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Prepare (+2 Hope, paired)");
    assert_event_contains(&report, "Tarn", "Prepare (+2 Hope, paired)");
    assert_eq!(harness.character(a).hope.value, 4);
    assert_eq!(harness.character(b).hope.value, 4);
    // The bystander neither prepares nor gains.
    assert_eq!(harness.character(c).hope.value, 2);
    assert!(report
        .actors
        .iter()
        .find(|log| log.name == "Wren")
        .unwrap()
        .events
        .is_empty());
}

#[tokio::test]
async fn test_prepare_gain_is_capped_at_hope_max() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);
    harness.edit_character(a, |c| {
        c.hope.value = 9;
        c.hope.max = 10;
    });

    harness.open().await;
    harness.toggle(a, "prepare").await;
    harness.toggle(b, "prepare").await;

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Prepare (+1 Hope, paired [capped])");
    assert_eq!(harness.character(a).hope.value, 10);
}

#[tokio::test]
async fn test_prepare_never_drains_hope_held_above_max() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    // An active effect left the pool above its ceiling.
    harness.edit_character(a, |c| {
        c.hope.value = 7;
        c.hope.max = 5;
    });

    harness.open().await;
    harness.toggle(a, "prepare").await;

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Prepare (+0 Hope [capped])");
    assert_eq!(harness.character(a).hope.value, 7);
}

#[tokio::test]
async fn test_pairing_counts_only_resolved_preparers() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);

    harness.open().await;
    harness.toggle(a, "prepare").await;
    harness.toggle(b, "prepare").await;

    // Tarn's sheet vanishes before settlement, so Riva prepares alone.
    harness.characters.remove(b);

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Prepare (+1 Hope)");
    assert_no_event(&report, "Riva", "paired");
}

// =============================================================================
// Fear
// =============================================================================

#[tokio::test]
async fn test_long_rest_fear_adds_participant_count() {
    let mut harness = DowntimeHarness::new();
    harness.add_character("Riva", 1);
    harness.add_character("Tarn", 1);
    harness.add_character("Wren", 1);
    persist::save_fear(harness.engine.store().settings(), 5)
        .await
        .unwrap();

    harness.open().await;
    harness
        .engine
        .store()
        .set_rest_type(RestType::Long)
        .await
        .unwrap();

    harness.queue_rolls([3]);
    let report = harness.settle().await;

    assert_eq!(report.fear.roll, 3);
    assert_eq!(report.fear.added, 6);
    assert_eq!(report.fear.total, 11);
    assert_eq!(report.fear.breakdown, "(1d4 + 3 PCs) 3 + 3");
    assert_eq!(
        persist::load_fear(harness.engine.store().settings())
            .await
            .unwrap(),
        11
    );
}

#[tokio::test]
async fn test_fear_never_exceeds_ceiling() {
    let mut harness = DowntimeHarness::new();
    harness.add_character("Riva", 1);
    persist::save_fear(harness.engine.store().settings(), 11)
        .await
        .unwrap();

    harness.open().await;
    harness.queue_rolls([4]);
    let report = harness.settle().await;

    assert_eq!(report.fear.added, 4);
    assert_eq!(report.fear.total, 12);
    assert_eq!(report.fear.breakdown, "(1d4) 4");
}

#[tokio::test]
async fn test_fear_total_saturates_on_oversized_stored_pool() {
    let mut harness = DowntimeHarness::new();
    harness.add_character("Riva", 1);
    // A hand-edited record can hold values the engine never writes.
    persist::save_fear(harness.engine.store().settings(), u32::MAX)
        .await
        .unwrap();

    harness.open().await;
    harness.queue_rolls([4]);
    let report = harness.settle().await;

    assert_eq!(report.fear.added, 4);
    assert_eq!(report.fear.total, 12);
    assert_eq!(
        persist::load_fear(harness.engine.store().settings())
            .await
            .unwrap(),
        12
    );
}

#[tokio::test]
async fn test_failed_fear_roll_aborts_before_mutation() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| c.stress.value = 4);

    harness.open().await;
    harness.toggle(a, "clearStress").await;

    // Empty dice queue: the fear roll fails immediately.
    let err = harness.engine.settle().await.unwrap_err();
    assert!(matches!(err, SettleError::FearRoll(_)));

    assert_eq!(harness.character(a).stress.value, 4);
    assert_eq!(
        persist::load_fear(harness.engine.store().settings())
            .await
            .unwrap(),
        0
    );
    // The session survives for a retry.
    let session = harness.engine.store().session().await.unwrap().unwrap();
    assert_eq!(session.participants.len(), 1);
}

// =============================================================================
// Efficient slot
// =============================================================================

#[tokio::test]
async fn test_efficient_slot_upgrades_exactly_one_move() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        c.items.push(feature_item("Efficient"));
        c.stress.value = 5;
        c.hit_points.value = 4;
    });

    harness.open().await;
    harness.toggle(a, "clearStress").await;
    harness.toggle(a, "tendWounds").await;
    harness
        .engine
        .store()
        .set_efficient_slot(a, Some(MoveKey::new("clearStress")))
        .await
        .unwrap();

    // Fear die plus the tend-wounds die; the slotted move does not roll.
    harness.queue_rolls([1, 3]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Clear Stress (Recover All Stress)");
    assert_event_contains(&report, "Riva", "Tend to Wounds (Recover 4 HP [Roll: 3])");
    assert_eq!(harness.character(a).stress.value, 0);
    assert_eq!(harness.character(a).hit_points.value, 0);
}

#[tokio::test]
async fn test_filled_efficient_slot_upgrades_the_refresh_sweep() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        c.items.push(feature_item("Efficient"));
        let mut rod = OwnedItem::named("Sunburst Rod");
        rod.actions.push(ItemAction {
            id: "flare".to_string(),
            uses: Some(UseTracker {
                value: 2,
                max: 3,
                recovery: Some(Recovery::LongRest),
            }),
        });
        c.items.push(rod);
    });

    harness.open().await;
    harness.toggle(a, "clearStress").await;
    harness
        .engine
        .store()
        .set_efficient_slot(a, Some(MoveKey::new("clearStress")))
        .await
        .unwrap();

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Refreshed: Sunburst Rod");
    let rod = harness.character(a).items[1].clone();
    assert_eq!(rod.actions[0].uses.as_ref().unwrap().value, 0);
}

#[tokio::test]
async fn test_short_markers_refresh_on_every_rest() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        let mut dagger = OwnedItem::named("Dagger of Echoes");
        dagger.actions.push(ItemAction {
            id: "strike".to_string(),
            uses: Some(UseTracker {
                value: 2,
                max: 3,
                recovery: Some(Recovery::ShortRest),
            }),
        });
        let mut stone = OwnedItem::named("Charge Stone");
        stone.resource = Some(ItemResource {
            value: 4,
            max: 6,
            progression: Progression::Increasing,
            recovery: Some(Recovery::ShortRest),
        });
        c.items.push(dagger);
        c.items.push(stone);
    });

    harness.open().await;
    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Refreshed: Dagger of Echoes, Charge Stone");
    let sheet = harness.character(a);
    assert_eq!(sheet.items[0].actions[0].uses.as_ref().unwrap().value, 0);
    assert_eq!(sheet.items[1].resource.as_ref().unwrap().value, 0);
}

#[tokio::test]
async fn test_long_marker_does_not_refresh_on_plain_short_rest() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        let mut rod = OwnedItem::named("Sunburst Rod");
        rod.actions.push(ItemAction {
            id: "flare".to_string(),
            uses: Some(UseTracker {
                value: 2,
                max: 3,
                recovery: Some(Recovery::LongRest),
            }),
        });
        c.items.push(rod);
    });

    harness.open().await;
    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_no_event(&report, "Riva", "Refreshed");
    let rod = harness.character(a).items[0].clone();
    assert_eq!(rod.actions[0].uses.as_ref().unwrap().value, 2);
}

// =============================================================================
// Feature passives
// =============================================================================

#[tokio::test]
async fn test_mender_copies_clear_stress_automatically() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        c.items.push(feature_item("Mender"));
        c.items.push(feature_item("Mender"));
        c.stress.value = 5;
    });

    harness.open().await;
    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Mender (Clear 2 Stress)");
    assert_eq!(harness.character(a).stress.value, 3);
}

#[tokio::test]
async fn test_field_medic_boosts_recovery_and_marks_stress() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);
    harness.edit_character(a, |c| c.items.push(feature_item("Field Medic")));
    harness.edit_character(b, |c| c.hit_points.value = 6);

    harness.open().await;
    harness.toggle(a, "tendWounds").await;
    harness
        .engine
        .store()
        .set_target(a, &MoveKey::new("tendWounds"), Some(b))
        .await
        .unwrap();

    harness.queue_rolls([1, 2]);
    let report = harness.settle().await;

    // Recovery = 2 roll + 1 tier + 1 feat; aiding another costs the medic.
    assert_event_contains(
        &report,
        "Riva",
        "Tend to Wounds of Tarn (Recover 4 HP [Roll: 2 +1 feat])",
    );
    assert_event_contains(&report, "Riva", "Field Medic strain (Mark 1 Stress)");
    assert_eq!(harness.character(b).hit_points.value, 2);
    assert_eq!(harness.character(a).stress.value, 1);
}

#[tokio::test]
async fn test_field_medic_self_tend_has_no_strain() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| {
        c.items.push(feature_item("Field Medic"));
        c.hit_points.value = 6;
    });

    harness.open().await;
    harness.toggle(a, "tendWounds").await;

    harness.queue_rolls([1, 2]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Tend to Wounds (Recover 4 HP [Roll: 2 +1 feat])");
    assert_no_event(&report, "Riva", "strain");
    assert_eq!(harness.character(a).stress.value, 0);
}

// =============================================================================
// Crafting and foraging
// =============================================================================

#[tokio::test]
async fn test_craft_grants_product_and_notifies() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);

    let recipe_ref = downtime_core::ItemRef::new("Compendium.test.loot.Item.recipe1");
    let product_ref = downtime_core::ItemRef::new("Compendium.test.consumables.Item.prod1");
    harness.compendium.insert(downtime_core::ItemSpec::new(
        recipe_ref.clone(),
        "Torch Plans",
        downtime_core::character::ItemKind::Loot,
    ));
    harness.compendium.insert(downtime_core::ItemSpec::new(
        product_ref.clone(),
        "Torch",
        downtime_core::character::ItemKind::Consumable,
    ));
    persist::save_craft_entries(
        harness.engine.store().settings(),
        harness.compendium.as_ref(),
        &[downtime_core::catalog::CraftEntry {
            recipe_ref: recipe_ref.clone(),
            product_ref,
        }],
    )
    .await
    .unwrap();

    harness.edit_character(a, |c| c.items.push(OwnedItem::named("Torch Plans")));

    harness.open().await;
    harness.toggle(a, &format!("craft_{recipe_ref}")).await;

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    assert_event_contains(&report, "Riva", "Used Torch Plans");
    assert!(harness.character(a).owns_item_named("Torch"));
    assert!(harness
        .notifier
        .info_containing("Riva crafted Torch and it was added to their inventory."));
}

#[tokio::test]
async fn test_forage_low_face_selects_table_row() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| c.items.push(feature_item("Forager")));

    harness.open().await;
    harness.toggle(a, "core_forager").await;

    harness.queue_rolls([1, 2]);
    let report = harness.settle().await;

    assert_event_contains(
        &report,
        "Riva",
        "Forage [Roll: 2] - A beautiful relic (Gain 2 Hope)",
    );
    assert!(harness.character(a).owns_item_named("A beautiful relic"));
}

#[tokio::test]
async fn test_forage_top_face_defers_to_player_pick() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| c.items.push(feature_item("Forager")));

    harness.open().await;
    harness.toggle(a, "core_forager").await;
    harness
        .engine
        .store()
        .set_forager_pick(a, Some(3))
        .await
        .unwrap();

    harness.queue_rolls([1, 6]);
    let report = harness.settle().await;

    assert_event_contains(
        &report,
        "Riva",
        "Forage [Roll: 6 (Chose)] - An arcane rune (+2 to a Spellcast Roll)",
    );
    assert!(harness.character(a).owns_item_named("An arcane rune"));
}

#[tokio::test]
async fn test_forage_grant_does_not_depend_on_the_compendium() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    harness.edit_character(a, |c| c.items.push(feature_item("Forager")));

    harness.open().await;
    harness.toggle(a, "core_forager").await;

    // The compendium is empty; the find is created from the table row.
    harness.queue_rolls([1, 4]);
    let report = harness.settle().await;

    assert_event_contains(
        &report,
        "Riva",
        "Forage [Roll: 4] - A healing vial (Clear 2 Hit Points)",
    );
    assert!(harness.character(a).owns_item_named("A healing vial"));
    assert!(harness
        .notifier
        .info_containing("Riva crafted A healing vial and it was added to their inventory."));
}

// =============================================================================
// Failure tolerance and lifecycle
// =============================================================================

#[tokio::test]
async fn test_stale_move_key_is_skipped() {
    let mut harness = DowntimeHarness::new();
    harness.add_character("Riva", 1);

    harness.open().await;
    // Inject a choice record holding a key no catalog produces anymore.
    let user = harness.roster[0].user;
    persist::save_choice(
        harness.engine.store().settings(),
        user,
        &ParticipantChoice {
            actions: vec![MoveKey::new("banana"), MoveKey::new("prepare")],
            ..Default::default()
        },
    )
    .await
    .unwrap();

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    let events = &report
        .actors
        .iter()
        .find(|log| log.name == "Riva")
        .unwrap()
        .events;
    assert_eq!(events.len(), 1);
    assert!(events[0].contains("Prepare"));
}

#[tokio::test]
async fn test_store_write_failure_does_not_stop_the_pass() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);
    let b = harness.add_character("Tarn", 1);
    harness.edit_character(a, |c| c.stress.value = 4);
    harness.edit_character(b, |c| c.stress.value = 4);

    harness.open().await;
    harness.toggle(a, "clearStress").await;
    harness.toggle(b, "clearStress").await;
    harness.characters.fail_writes_for(b);

    harness.queue_rolls([1, 2, 2]);
    let report = harness.settle().await;

    // Both moves resolve and log; only the writable sheet changes.
    assert_event_contains(&report, "Riva", "Clear Stress (Recover 3 Stress [Roll: 2])");
    assert_event_contains(&report, "Tarn", "Clear Stress (Recover 3 Stress [Roll: 2])");
    assert_eq!(harness.character(a).stress.value, 1);
    assert_eq!(harness.character(b).stress.value, 4);
}

#[tokio::test]
async fn test_settlement_clears_the_session_idempotently() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);

    harness.open().await;
    harness.queue_rolls([2]);
    let report = harness.settle().await;
    assert_eq!(report.fear.total, 2);

    // The cleared session is still readable, just empty.
    let session = harness.engine.store().session().await.unwrap().unwrap();
    assert!(session.participants.is_empty());
    assert!(session.choices.is_empty());

    // Settling again aborts at the eligibility gate with a warning.
    let before = harness.character(a);
    let err = harness.engine.settle().await.unwrap_err();
    assert!(matches!(err, SettleError::NoEligibleParticipants));
    assert!(harness
        .notifier
        .warning_containing("No actors selected for downtime."));
    assert_eq!(harness.character(a), before);
    assert_eq!(
        persist::load_fear(harness.engine.store().settings())
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_work_on_project_settles_without_an_event() {
    let mut harness = DowntimeHarness::new();
    let a = harness.add_character("Riva", 1);

    harness.open().await;
    harness
        .engine
        .store()
        .set_rest_type(RestType::Long)
        .await
        .unwrap();
    harness.toggle(a, "workOnProject").await;

    harness.queue_rolls([1]);
    let report = harness.settle().await;

    let events = &report
        .actors
        .iter()
        .find(|log| log.name == "Riva")
        .unwrap()
        .events;
    assert!(events.is_empty());
    assert!(!report.render().contains("Riva"));
}
