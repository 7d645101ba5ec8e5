//! Example demonstrating device profiles and negotiation
//!
//! Run with: cargo run --package fwpcm-core --example profile_demo

use fwpcm_core::domain::{
    initial_window, DeviceProfile, Direction, HwConstraints, Interval, ProfileManager,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("fwpcm_core=debug,info")
        .init();

    println!("=== fwpcm Profile Demo ===\n");

    // 1. Save the factory profile into a scratch directory
    let profile_dir = std::env::temp_dir().join("fwpcm-demo-profiles");
    let manager = ProfileManager::new(profile_dir.clone());
    let profile = DeviceProfile::factory_default();
    manager.save_profile("factory", &profile).await?;
    println!("1. Saved profile to {}", manager.profile_path("factory").display());

    // 2. Load it back
    let loaded = manager.load_profile("factory").await?;
    println!("2. Loaded profile '{}'", loaded.name);

    // 3. Show the capability window per direction
    println!("\n3. Capability windows:");
    for direction in Direction::ALL {
        let table = loaded.formats.for_direction(direction);
        let window = initial_window(table);
        println!(
            "   {:<8} rates {} channels {}",
            direction.to_string(),
            window.rates,
            window.channels
        );
    }

    // 4. Negotiate capture at 14 channels
    println!("\n4. Negotiating capture with 14 channels...");
    let table = loaded.formats.for_direction(Direction::Capture).clone();
    let window = initial_window(&table);
    let constraints = HwConstraints::new(Direction::Capture, table, window);
    match constraints.refine(Interval::full(), Interval::single(14)) {
        Ok(negotiated) => println!(
            "   rates {} channels {} after {} rounds",
            negotiated.rates, negotiated.channels, negotiated.rounds
        ),
        Err(e) => println!("   rejected: {}", e),
    }

    // 5. Clean up
    manager.delete_profile("factory").await?;
    println!("\n5. Deleted demo profile");

    Ok(())
}
