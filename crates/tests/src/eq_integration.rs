//! Integration tests for the equalizer core
//!
//! These tests drive the complete path from parameter edits through the
//! update coordinator into processing and display chains, including a
//! concurrent audio/control stress scenario.

use proptest::prelude::*;
use simple_eq_core::domain::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const SAMPLE_RATE: f64 = 48_000.0;
const BLOCK_SIZE: usize = 256;

fn generate_sine_wave(frequency: f32, sample_rate: f64, samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| 2.0 * std::f64::consts::PI * f64::from(frequency) * i as f64 / sample_rate)
        .map(|phase| phase.sin() as f32)
        .collect()
}

fn rms(buffer: &[f32]) -> f64 {
    (buffer.iter().map(|&s| f64::from(s) * f64::from(s)).sum::<f64>() / buffer.len() as f64).sqrt()
}

/// Measured steady-state gain of a sine through the chain, in dB
fn measured_gain_db(chain: &mut ProcessingChain, frequency: f32) -> f64 {
    let samples = SAMPLE_RATE as usize;
    let input = generate_sine_wave(frequency, SAMPLE_RATE, samples);
    let mut output = input.clone();
    chain.process(&mut output);

    let settled = samples / 2;
    gain_to_db(rms(&output[settled..]) / rms(&input[settled..]))
}

/// Small deterministic generator so stress runs are reproducible
struct XorShift(u64);

impl XorShift {
    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }

    fn change(&mut self) -> ParameterChange {
        match self.next_u64() % 10 {
            0 => ParameterChange::PeakFreq(self.range(ranges::FREQ_MIN, ranges::FREQ_MAX)),
            1 => ParameterChange::PeakGainDb(self.range(ranges::GAIN_DB_MIN, ranges::GAIN_DB_MAX)),
            2 => ParameterChange::PeakQuality(self.range(ranges::Q_MIN, ranges::Q_MAX)),
            3 => ParameterChange::LowCutFreq(self.range(ranges::FREQ_MIN, ranges::FREQ_MAX)),
            4 => ParameterChange::LowCutSlope(Slope::from_index(self.next_u64() as usize % 4)),
            5 => ParameterChange::HighCutFreq(self.range(ranges::FREQ_MIN, ranges::FREQ_MAX)),
            6 => ParameterChange::HighCutSlope(Slope::from_index(self.next_u64() as usize % 4)),
            7 => ParameterChange::LowCutBypassed(self.next_u64() % 2 == 0),
            8 => ParameterChange::PeakBypassed(self.next_u64() % 2 == 0),
            _ => ParameterChange::HighCutBypassed(self.next_u64() % 2 == 0),
        }
    }
}

// ============================================================================
// CHAIN ORDERING TESTS
// ============================================================================

#[test]
fn test_chain_runs_low_cut_then_peak_then_high_cut() {
    let snapshot = ParameterSnapshot {
        peak_freq: 800.0,
        peak_gain_db: 12.0,
        peak_quality: 3.0,
        low_cut_freq: 300.0,
        low_cut_slope: Slope::Db24,
        high_cut_freq: 4000.0,
        high_cut_slope: Slope::Db36,
        ..Default::default()
    };
    let derived = derive_coefficients(&snapshot, SAMPLE_RATE);
    let mut chain = ProcessingChain::with_coefficients(&derived);

    let mut stages: Vec<FilterStage> = derived
        .low_cut
        .sections()
        .iter()
        .chain(derived.peak.sections())
        .chain(derived.high_cut.sections())
        .map(|coeffs| FilterStage::new(*coeffs))
        .collect();

    let input = generate_sine_wave(800.0, SAMPLE_RATE, 1024);
    let mut expected = input.clone();
    for stage in &mut stages {
        stage.process(&mut expected);
    }

    let mut output = input;
    chain.process(&mut output);

    assert_eq!(output, expected);
}

#[test]
fn test_sample_and_block_processing_agree() {
    let derived = derive_coefficients(
        &ParameterSnapshot {
            peak_gain_db: -9.0,
            low_cut_freq: 150.0,
            high_cut_freq: 9000.0,
            high_cut_slope: Slope::Db48,
            ..Default::default()
        },
        SAMPLE_RATE,
    );
    let mut by_block = ProcessingChain::with_coefficients(&derived);
    let mut by_sample = ProcessingChain::with_coefficients(&derived);

    let input = generate_sine_wave(440.0, SAMPLE_RATE, 2048);
    let mut block = input.clone();
    by_block.process(&mut block);

    let samples: Vec<f32> = input.iter().map(|&x| by_sample.process_sample(x)).collect();
    assert_eq!(block, samples);
}

// ============================================================================
// SLOPE TESTS
// ============================================================================

#[test]
fn test_slope_selects_stage_count() {
    let params = SharedParameters::new(ParameterSnapshot::default());
    let chain = ProcessingChain::new();
    let mut coordinator = UpdateCoordinator::new(params.clone(), SAMPLE_RATE)
        .unwrap()
        .with_target(chain.handle());
    coordinator.poll();

    params.apply(ParameterChange::LowCutSlope(Slope::Db24));
    params.apply(ParameterChange::HighCutSlope(Slope::Db48));
    coordinator.poll();

    assert_eq!(chain.low_cut().active_stage_count(), 2);
    assert!(!chain.low_cut().is_bypassed(1));
    assert!(chain.low_cut().is_bypassed(2));
    assert!(chain.low_cut().is_bypassed(3));
    assert_eq!(chain.high_cut().active_stage_count(), 4);

    params.apply(ParameterChange::HighCutSlope(Slope::Db12));
    coordinator.poll();
    assert_eq!(chain.high_cut().active_stage_count(), 1);
}

#[test]
fn test_role_bypass_disables_every_stage() {
    let params = SharedParameters::new(ParameterSnapshot {
        low_cut_slope: Slope::Db48,
        ..Default::default()
    });
    let chain = ProcessingChain::new();
    let mut coordinator = UpdateCoordinator::new(params.clone(), SAMPLE_RATE)
        .unwrap()
        .with_target(chain.handle());

    params.apply(ParameterChange::LowCutBypassed(true));
    coordinator.poll();
    assert_eq!(chain.low_cut().active_stage_count(), 0);

    params.apply(ParameterChange::LowCutBypassed(false));
    coordinator.poll();
    assert_eq!(chain.low_cut().active_stage_count(), 4);
}

#[test]
fn test_each_slope_steepens_roll_off() {
    let mut previous = 0.0;
    for slope in Slope::ALL {
        let mut chain = ProcessingChain::with_coefficients(&derive_coefficients(
            &ParameterSnapshot {
                low_cut_freq: 800.0,
                low_cut_slope: slope,
                ..Default::default()
            },
            SAMPLE_RATE,
        ));
        let gain = measured_gain_db(&mut chain, 400.0);

        // One octave below cutoff: about 12 dB per stage beyond the -3 dB knee
        let expected = -10.0 * (1.0 + 2f64.powi(2 * slope.order() as i32)).log10();
        assert!((gain - expected).abs() < 1.0, "{slope:?}: {gain} vs {expected}");
        assert!(gain < previous);
        previous = gain;
    }
}

// ============================================================================
// RESPONSE TESTS
// ============================================================================

#[test]
fn test_evaluator_matches_processed_audio() {
    let snapshot = ParameterSnapshot {
        peak_freq: 2000.0,
        peak_gain_db: 8.0,
        peak_quality: 2.0,
        low_cut_freq: 100.0,
        low_cut_slope: Slope::Db24,
        high_cut_freq: 10_000.0,
        ..Default::default()
    };
    let derived = derive_coefficients(&snapshot, SAMPLE_RATE);
    let evaluator = ResponseEvaluator::new(SAMPLE_RATE);
    let view = ChainSnapshot::from(&derived);

    for freq in [60.0f32, 500.0, 2000.0, 7000.0, 15_000.0] {
        let mut chain = ProcessingChain::with_coefficients(&derived);
        let measured = measured_gain_db(&mut chain, freq);
        let predicted = evaluator.magnitude_at(&view, f64::from(freq));
        assert!((measured - predicted).abs() < 0.25, "{freq} Hz: {measured} vs {predicted}");
    }
}

#[test]
fn test_display_chain_mirrors_audio_chain() {
    let params = SharedParameters::new(ParameterSnapshot::default());
    let audio = ProcessingChain::new();
    let display = ProcessingChain::new();
    let mut coordinator = UpdateCoordinator::new(params.clone(), SAMPLE_RATE)
        .unwrap()
        .with_target(audio.handle())
        .with_target(display.handle());

    params.replace(ParameterSnapshot {
        peak_freq: 5000.0,
        peak_gain_db: -12.0,
        high_cut_freq: 15_000.0,
        high_cut_slope: Slope::Db36,
        ..Default::default()
    });
    coordinator.poll();

    assert_eq!(audio.snapshot(), display.snapshot());

    let evaluator = ResponseEvaluator::new(SAMPLE_RATE);
    let curve: Vec<f64> = evaluator.evaluate(display.snapshot(), 600).collect();
    let expected: Vec<f64> = evaluator
        .evaluate(coordinator.last_derived().copied().unwrap(), 600)
        .collect();
    assert_eq!(curve, expected);

    let min = curve.iter().copied().fold(f64::MAX, f64::min);
    assert!(min < -11.0);
}

#[test]
fn test_response_stays_above_floor() {
    let evaluator = ResponseEvaluator::new(SAMPLE_RATE);
    let derived = derive_coefficients(
        &ParameterSnapshot {
            low_cut_freq: 20_000.0,
            low_cut_slope: Slope::Db48,
            high_cut_freq: 20.0,
            high_cut_slope: Slope::Db48,
            ..Default::default()
        },
        SAMPLE_RATE,
    );

    let curve = evaluator.evaluate(&derived, 300);
    assert_eq!(curve.len(), 300);
    assert!(curve.into_iter().all(|db| db.is_finite() && db >= -100.0));
}

// ============================================================================
// STEREO TESTS
// ============================================================================

#[test]
fn test_coordinator_drives_stereo_processor() {
    let params = SharedParameters::new(ParameterSnapshot::default());
    let mut stereo = StereoProcessor::new();
    let mut coordinator = UpdateCoordinator::new(params.clone(), SAMPLE_RATE).unwrap();
    for handle in stereo.handles() {
        coordinator.add_target(handle);
    }

    params.apply(ParameterChange::HighCutFreq(1000.0));
    params.apply(ParameterChange::HighCutSlope(Slope::Db48));
    coordinator.poll();

    let tone = generate_sine_wave(8000.0, SAMPLE_RATE, 4096);
    let mut left = tone.clone();
    let mut right = tone;
    stereo.process_stereo(&mut left, &mut right);

    assert!(rms(&left[2048..]) < 1e-3);
    assert_eq!(left, right);
}

// ============================================================================
// CONCURRENCY TESTS
// ============================================================================

#[test]
fn test_concurrent_edits_and_processing() {
    let params = SharedParameters::new(ParameterSnapshot::default());
    let audio = ProcessingChain::new();
    let display = ProcessingChain::new();
    let mut coordinator = UpdateCoordinator::new(params.clone(), SAMPLE_RATE)
        .unwrap()
        .with_target(audio.handle())
        .with_target(display.handle());
    coordinator.force_update();

    let stop = Arc::new(AtomicBool::new(false));

    let audio_thread = {
        let stop = Arc::clone(&stop);
        let mut chain = audio;
        thread::spawn(move || {
            let tone = generate_sine_wave(997.0, SAMPLE_RATE, BLOCK_SIZE);
            let mut block = vec![0.0f32; BLOCK_SIZE];
            let mut blocks = 0usize;
            let mut non_finite = 0usize;

            while !stop.load(Ordering::Acquire) {
                block.copy_from_slice(&tone);
                chain.process(&mut block);
                non_finite += block.iter().filter(|s| !s.is_finite()).count();
                blocks += 1;
            }
            (chain, blocks, non_finite)
        })
    };

    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    for i in 0..20_000 {
        params.apply(rng.change());
        if i % 7 == 0 {
            coordinator.poll();
        }
    }

    stop.store(true, Ordering::Release);
    let (mut audio, blocks, non_finite) = audio_thread.join().unwrap();

    assert!(blocks > 0);
    assert_eq!(non_finite, 0);

    // Eventual consistency: after the last edit and a final poll, both chains
    // run exactly the coefficients derived from the final parameters
    coordinator.poll();
    let expected = ChainSnapshot::from(&derive_coefficients(&params.snapshot(), SAMPLE_RATE));
    assert_eq!(audio.snapshot(), expected);
    assert_eq!(display.snapshot(), expected);

    let mut block = vec![0.0f32; BLOCK_SIZE];
    audio.process(&mut block);
    let local = audio.active_coefficients();
    let pairs = local
        .low_cut
        .iter()
        .zip(&expected.low_cut)
        .chain(local.peak.iter().zip(&expected.peak))
        .chain(local.high_cut.iter().zip(&expected.high_cut));
    for (running, published) in pairs {
        if let Some(published) = published {
            assert_eq!(running.as_ref(), Some(published));
        }
    }
}

#[test]
fn test_concurrent_editors_coalesce() {
    let params = SharedParameters::new(ParameterSnapshot::default());
    let mut coordinator = UpdateCoordinator::new(params.clone(), SAMPLE_RATE).unwrap();
    coordinator.poll();

    let editors: Vec<_> = (0..4)
        .map(|t| {
            let params = Arc::clone(&params);
            thread::spawn(move || {
                for i in 0..1000 {
                    params.apply(ParameterChange::PeakGainDb((t * 1000 + i) as f32 % 24.0));
                }
            })
        })
        .collect();
    for editor in editors {
        editor.join().unwrap();
    }

    // 4000 edits, at most one pending recomputation
    assert!(coordinator.poll());
    assert!(!coordinator.poll());
    assert_eq!(coordinator.update_count(), 2);
    assert_eq!(coordinator.last_snapshot(), Some(params.snapshot()));
}

// ============================================================================
// CONFIGURATION TESTS
// ============================================================================

#[tokio::test]
async fn test_config_and_preset_drive_chain() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("simple-eq.toml");

    let mut config = EqConfig::default();
    config.audio.sample_rate = 44_100;
    config.presets.dir = temp_dir.path().join("presets");
    config.parameters.peak_gain_db = 5.0;
    config.save_to_file(&config_path).await.unwrap();

    let loaded = EqConfig::load_from_file(&config_path).await.unwrap();
    let store = PresetStore::new(loaded.presets.dir.clone());
    store.save("boost", &loaded.parameters).await.unwrap();

    let parameters = store.load("boost").await.unwrap();
    let derived = derive_coefficients(&parameters, loaded.sample_rate());
    let chain = ProcessingChain::with_coefficients(&derived);
    let evaluator = ResponseEvaluator::new(loaded.sample_rate());

    let at_peak = evaluator.magnitude_at(&chain.snapshot(), f64::from(parameters.peak_freq));
    assert!((at_peak - 5.0).abs() < 0.05);
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

fn any_snapshot() -> impl Strategy<Value = ParameterSnapshot> {
    (
        -100.0f32..30_000.0,
        -40.0f32..40.0,
        0.0f32..12.0,
        0.0f32..25_000.0,
        0usize..4,
        0.0f32..25_000.0,
        0usize..4,
        any::<[bool; 3]>(),
    )
        .prop_map(|(peak_freq, gain_db, quality, low_freq, low, high_freq, high, bypass)| {
            ParameterSnapshot {
                peak_freq,
                peak_gain_db: gain_db,
                peak_quality: quality,
                low_cut_freq: low_freq,
                low_cut_slope: Slope::from_index(low),
                high_cut_freq: high_freq,
                high_cut_slope: Slope::from_index(high),
                low_cut_bypassed: bypass[0],
                peak_bypassed: bypass[1],
                high_cut_bypassed: bypass[2],
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_processing_output_is_finite(
        snapshot in any_snapshot(),
        sample_rate in prop::sample::select(vec![
            22_050.0, 44_100.0, 48_000.0, 96_000.0, 192_000.0,
        ]),
        input in prop::collection::vec(-1.0f32..1.0, 1..1024),
    ) {
        let derived = derive_coefficients(&snapshot, sample_rate);
        let mut chain = ProcessingChain::with_coefficients(&derived);
        let mut buffer = input;
        chain.process(&mut buffer);
        prop_assert!(buffer.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn prop_published_matches_derived(snapshot in any_snapshot()) {
        let params = SharedParameters::new(ParameterSnapshot::default());
        let chain = ProcessingChain::new();
        let mut coordinator = UpdateCoordinator::new(params.clone(), SAMPLE_RATE)
            .unwrap()
            .with_target(chain.handle());

        params.replace(snapshot);
        coordinator.poll();

        let expected = ChainSnapshot::from(&derive_coefficients(&snapshot, SAMPLE_RATE));
        prop_assert_eq!(chain.snapshot(), expected);
    }
}
