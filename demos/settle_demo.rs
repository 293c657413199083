//! Walk one short-rest downtime from open to settled report.
//!
//! Run with: cargo run --example settle_demo

use downtime_core::testing::DowntimeHarness;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Downtime Settlement Walkthrough ===\n");

    // 1. Wire the engine over in-memory ports
    println!("1. Wiring engine over in-memory ports...");
    let mut harness = DowntimeHarness::new();
    let riva = harness.add_character("Riva", 3);
    let tarn = harness.add_character("Tarn", 5);
    harness.edit_character(riva, |c| c.stress.value = 4);
    harness.edit_character(tarn, |c| c.hit_points.value = 3);
    println!("   Riva (level 3): 4 Stress marked");
    println!("   Tarn (level 5): 3 HP marked");

    // 2. GM opens the session
    println!("\n2. Opening the session...");
    let session = harness.open().await;
    println!("   Participants: {}", session.participants.len());
    println!("   Rest type: {:?}", session.rest_type);

    // 3. Players pick their moves
    println!("\n3. Selecting moves...");
    harness.toggle(riva, "clearStress").await;
    harness.toggle(riva, "prepare").await;
    harness.toggle(tarn, "tendWounds").await;
    harness.toggle(tarn, "prepare").await;
    println!("   Riva: Clear Stress + Prepare");
    println!("   Tarn: Tend to Wounds + Prepare");

    // 4. GM settles: one fear die, then a recovery die per rolled move
    println!("\n4. Settling...\n");
    harness.queue_rolls([2, 3, 3]);
    let report = harness.settle().await;
    for line in report.render().lines() {
        println!("   {line}");
    }

    // 5. The stores reflect the applied deltas
    println!("\n5. After settlement:");
    println!("   Riva stress: {}", harness.character(riva).stress.value);
    println!("   Tarn HP marked: {}", harness.character(tarn).hit_points.value);
    println!("   Both paired on Prepare: +2 Hope each");

    println!("\n=== Done ===");
    Ok(())
}
