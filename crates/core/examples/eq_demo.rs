//! Example wiring parameters, the update coordinator and two chains together
//!
//! Run with: cargo run --package simple-eq-core --example eq_demo

use simple_eq_core::domain::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("simple_eq_core=debug,info")
        .init();

    println!("=== SimpleEQ Demo ===\n");

    let config = EqConfig::default();
    let sample_rate = config.sample_rate();

    // 1. Audio and display chains share nothing but published coefficients
    println!("1. Building audio and display chains...");
    let params = SharedParameters::new(config.parameters);
    let mut audio = ProcessingChain::new();
    let display = ProcessingChain::new();
    let mut coordinator = UpdateCoordinator::new(params.clone(), sample_rate)?
        .with_target(audio.handle())
        .with_target(display.handle());
    coordinator.poll();
    println!("   ✓ Initial update published ({} so far)", coordinator.update_count());

    // 2. A burst of edits costs a single update
    println!("\n2. Editing parameters...");
    params.apply(ParameterChange::PeakFreq(2500.0));
    params.apply(ParameterChange::PeakGainDb(6.0));
    params.apply(ParameterChange::LowCutFreq(100.0));
    params.apply(ParameterChange::LowCutSlope(Slope::Db48));
    coordinator.poll();
    println!("   ✓ {} updates after three edits", coordinator.update_count());
    println!(
        "   ✓ Low cut running {} stages",
        audio.low_cut().active_stage_count()
    );

    // 3. Process a block
    println!("\n3. Processing one block...");
    let mut block: Vec<f32> = (0..config.audio.block_size)
        .map(|i| (2.0 * std::f32::consts::PI * 2500.0 * i as f32 / sample_rate as f32).sin())
        .collect();
    audio.process(&mut block);
    let peak = block.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    println!("   ✓ Peak level {:.2} dBFS", gain_to_db(f64::from(peak)));

    // 4. Response curve from the display chain
    println!("\n4. Response curve (8 points):");
    let curve = ResponseEvaluator::new(sample_rate).evaluate(display.snapshot(), 8);
    for (freq, db) in curve.frequencies().zip(curve.clone()) {
        println!("   {:>8.1} Hz  {:>7.2} dB", freq, db);
    }

    // 5. Presets
    println!("\n5. Saving preset...");
    let dir = std::env::temp_dir().join("simple-eq-demo-presets");
    let store = PresetStore::new(dir.clone());
    store.save("demo", &params.snapshot()).await?;
    println!("   ✓ Presets in {}: {:?}", dir.display(), store.list().await?);
    store.delete("demo").await?;

    println!("\n=== Demo Complete ===");
    Ok(())
}
