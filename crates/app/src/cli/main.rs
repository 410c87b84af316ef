//! SimpleEQ CLI Application
//!
//! Offline driver for the equalizer core: prints response curves, renders
//! test tones through the processing chain and manages parameter presets.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use simple_eq_core::domain::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simple-eq")]
#[command(about = "A three-band parametric equalizer", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Start from a saved preset instead of the configured parameters
    #[arg(short, long, global = true)]
    preset: Option<String>,

    #[command(flatten)]
    overrides: ParameterOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the magnitude response of the current settings
    Response {
        /// Number of points (defaults to the configured display width)
        #[arg(short, long)]
        width: Option<usize>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run a sine tone through the chain and report levels
    Render {
        /// Tone frequency in Hz
        #[arg(short, long, default_value_t = 1000.0)]
        frequency: f32,

        /// Duration in seconds
        #[arg(short, long, default_value_t = 1.0)]
        seconds: f32,

        /// Peak amplitude of the tone
        #[arg(short, long, default_value_t = 0.5)]
        amplitude: f32,

        /// Render both channels through the stereo processor
        #[arg(long)]
        stereo: bool,
    },

    /// Manage parameter presets
    #[command(subcommand)]
    Preset(PresetCommand),

    /// Write the default configuration to a file
    InitConfig {
        /// Destination file
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum PresetCommand {
    /// List saved presets
    List,
    /// Save the current settings under a name
    Save { name: String },
    /// Print a preset as TOML
    Show { name: String },
    /// Delete a preset
    Delete { name: String },
}

/// Command-line parameter overrides, applied on top of config or preset
#[derive(Args, Default)]
struct ParameterOverrides {
    /// Peak centre frequency (Hz)
    #[arg(long, global = true)]
    peak_freq: Option<f32>,

    /// Peak gain (dB)
    #[arg(long, global = true, allow_hyphen_values = true)]
    peak_gain: Option<f32>,

    /// Peak quality
    #[arg(long, global = true)]
    peak_q: Option<f32>,

    /// Low cut frequency (Hz)
    #[arg(long, global = true)]
    low_cut: Option<f32>,

    /// Low cut slope in dB/octave (12, 24, 36, 48)
    #[arg(long, global = true, value_parser = parse_slope)]
    low_cut_slope: Option<Slope>,

    /// High cut frequency (Hz)
    #[arg(long, global = true)]
    high_cut: Option<f32>,

    /// High cut slope in dB/octave (12, 24, 36, 48)
    #[arg(long, global = true, value_parser = parse_slope)]
    high_cut_slope: Option<Slope>,

    /// Bypass the low cut
    #[arg(long, global = true)]
    bypass_low_cut: bool,

    /// Bypass the peak
    #[arg(long, global = true)]
    bypass_peak: bool,

    /// Bypass the high cut
    #[arg(long, global = true)]
    bypass_high_cut: bool,
}

impl ParameterOverrides {
    fn apply(&self, mut snapshot: ParameterSnapshot) -> ParameterSnapshot {
        if let Some(v) = self.peak_freq {
            snapshot.peak_freq = v;
        }
        if let Some(v) = self.peak_gain {
            snapshot.peak_gain_db = v;
        }
        if let Some(v) = self.peak_q {
            snapshot.peak_quality = v;
        }
        if let Some(v) = self.low_cut {
            snapshot.low_cut_freq = v;
        }
        if let Some(s) = self.low_cut_slope {
            snapshot.low_cut_slope = s;
        }
        if let Some(v) = self.high_cut {
            snapshot.high_cut_freq = v;
        }
        if let Some(s) = self.high_cut_slope {
            snapshot.high_cut_slope = s;
        }
        snapshot.low_cut_bypassed |= self.bypass_low_cut;
        snapshot.peak_bypassed |= self.bypass_peak;
        snapshot.high_cut_bypassed |= self.bypass_high_cut;
        snapshot
    }
}

fn parse_slope(value: &str) -> Result<Slope, String> {
    let db: u32 = value
        .trim_end_matches("dB")
        .parse()
        .map_err(|_| format!("invalid slope: {value}"))?;
    Slope::ALL
        .into_iter()
        .find(|slope| slope.db_per_octave() == db)
        .ok_or_else(|| format!("slope must be 12, 24, 36 or 48, got {db}"))
}

#[derive(Serialize)]
struct ResponsePoint {
    frequency_hz: f64,
    gain_db: f64,
}

#[derive(Serialize)]
struct ResponseReport {
    sample_rate: u32,
    parameters: ParameterSnapshot,
    points: Vec<ResponsePoint>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LevelMeter {
    peak: f32,
    sum_squares: f64,
    samples: usize,
}

impl LevelMeter {
    fn measure(&mut self, buffer: &[f32]) {
        for &sample in buffer {
            self.peak = self.peak.max(sample.abs());
            self.sum_squares += f64::from(sample) * f64::from(sample);
        }
        self.samples += buffer.len();
    }

    fn peak_db(&self) -> f64 {
        gain_to_db(f64::from(self.peak))
    }

    fn rms_db(&self) -> f64 {
        if self.samples == 0 {
            return gain_to_db(0.0);
        }
        gain_to_db((self.sum_squares / self.samples as f64).sqrt())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => EqConfig::load_from_file(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EqConfig::default(),
    };
    let store = PresetStore::new(config.presets.dir.clone());

    let base = match &cli.preset {
        Some(name) => store
            .load(name)
            .await
            .with_context(|| format!("failed to load preset {name:?}"))?,
        None => config.parameters,
    };
    let parameters = cli.overrides.apply(base).sanitized();
    tracing::debug!(?parameters, "Resolved parameters");

    match cli.command {
        Command::Response { width, json } => {
            print_response(&config, &parameters, width.unwrap_or(config.display.width), json)?;
        }
        Command::Render {
            frequency,
            seconds,
            amplitude,
            stereo,
        } => render(&config, parameters, frequency, seconds, amplitude, stereo)?,
        Command::Preset(command) => match command {
            PresetCommand::List => {
                for name in store.list().await? {
                    println!("{name}");
                }
            }
            PresetCommand::Save { name } => {
                store.save(&name, &parameters).await?;
                println!("Saved preset {name:?}");
            }
            PresetCommand::Show { name } => {
                let snapshot = store.load(&name).await?;
                print!("{}", toml_string(&snapshot)?);
            }
            PresetCommand::Delete { name } => {
                store.delete(&name).await?;
                println!("Deleted preset {name:?}");
            }
        },
        Command::InitConfig { path } => {
            EqConfig::default().save_to_file(&path).await?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn toml_string(snapshot: &ParameterSnapshot) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(snapshot)?)
}

fn print_response(
    config: &EqConfig,
    parameters: &ParameterSnapshot,
    width: usize,
    json: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(width > 0, "width must be positive");

    let sample_rate = config.sample_rate();
    let derived = derive_coefficients(parameters, sample_rate);
    let curve = ResponseEvaluator::new(sample_rate).evaluate(&derived, width);

    if json {
        let report = ResponseReport {
            sample_rate: config.audio.sample_rate,
            parameters: *parameters,
            points: curve
                .enumerate()
                .map(|(i, gain_db)| ResponsePoint {
                    frequency_hz: frequency_at(i, width),
                    gain_db,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{:>10}  {:>8}", "Hz", "dB");
        for (freq, gain_db) in curve.frequencies().zip(curve.clone()) {
            println!("{freq:>10.1}  {gain_db:>8.2}");
        }
    }

    Ok(())
}

/// Counts rendered frames against the display refresh period
#[derive(Debug, Clone, Copy)]
struct RefreshClock {
    interval: usize,
    elapsed: usize,
}

impl RefreshClock {
    fn new(sample_rate: f64, refresh_hz: u32) -> Self {
        Self {
            interval: poll_interval_frames(sample_rate, refresh_hz),
            elapsed: 0,
        }
    }

    /// Advance by `frames`; true once a refresh period has elapsed
    fn advance(&mut self, frames: usize) -> bool {
        self.elapsed += frames;
        if self.elapsed < self.interval {
            return false;
        }
        self.elapsed %= self.interval;
        true
    }
}

/// Frames between two polls at `refresh_hz`, at least one
fn poll_interval_frames(sample_rate: f64, refresh_hz: u32) -> usize {
    (sample_rate / f64::from(refresh_hz.max(1))).round().max(1.0) as usize
}

fn render(
    config: &EqConfig,
    parameters: ParameterSnapshot,
    frequency: f32,
    seconds: f32,
    amplitude: f32,
    stereo: bool,
) -> anyhow::Result<()> {
    let sample_rate = config.sample_rate();
    let source = SharedParameters::new(parameters);
    let block_size = config.audio.block_size;
    let total = (f64::from(seconds.max(0.0)) * sample_rate) as usize;

    let mut mono = ProcessingChain::new();
    let mut stereo_proc = StereoProcessor::new();
    let display = ProcessingChain::new();
    let evaluator = ResponseEvaluator::new(sample_rate);
    let mut coordinator = UpdateCoordinator::new(source, sample_rate)?;
    if stereo {
        for handle in stereo_proc.handles() {
            coordinator.add_target(handle);
        }
    } else {
        coordinator.add_target(mono.handle());
    }
    coordinator.add_target(display.handle());
    coordinator.force_update();

    let mut redraws = 0u64;
    let mut display_peak_db = f64::NEG_INFINITY;
    let mut redraw = |display: &ProcessingChain| {
        let curve = evaluator.evaluate(display, config.display.width);
        display_peak_db = curve.fold(display_peak_db, f64::max);
        redraws += 1;
    };
    redraw(&display);

    let channels = if stereo { 2 } else { 1 };
    let phase_step = 2.0 * std::f64::consts::PI * f64::from(frequency) / sample_rate;
    let mut input_meter = LevelMeter::default();
    let mut output_meter = LevelMeter::default();
    let mut block = vec![0.0f32; block_size * channels];
    let mut clock = RefreshClock::new(sample_rate, config.display.refresh_hz);
    let mut polls = 0u64;
    let mut rendered = 0;

    while rendered < total {
        let frames = block_size.min(total - rendered);
        let buffer = &mut block[..frames * channels];
        for (i, frame) in buffer.chunks_exact_mut(channels).enumerate() {
            let sample = (amplitude as f64 * ((rendered + i) as f64 * phase_step).sin()) as f32;
            frame.fill(sample);
        }

        input_meter.measure(buffer);
        if stereo {
            stereo_proc.process_interleaved(buffer);
        } else {
            mono.process(buffer);
        }
        output_meter.measure(buffer);
        rendered += frames;

        if clock.advance(frames) {
            polls += 1;
            if coordinator.poll() {
                redraw(&display);
            }
        }
    }

    tracing::info!(
        frames = rendered,
        polls,
        updates = coordinator.update_count(),
        redraws,
        "Render complete"
    );

    let input_peak = input_meter.peak_db();
    let input_rms = input_meter.rms_db();
    let output_peak = output_meter.peak_db();
    let output_rms = output_meter.rms_db();
    println!("tone        {frequency:.1} Hz, {rendered} frames, {channels} channel(s)");
    println!("input       peak {input_peak:>7.2} dBFS  rms {input_rms:>7.2} dBFS");
    println!("output      peak {output_peak:>7.2} dBFS  rms {output_rms:>7.2} dBFS");
    println!("gain        {:>7.2} dB", output_rms - input_rms);
    println!(
        "display     {redraws} redraw(s), {polls} poll(s) at {} Hz",
        config.display.refresh_hz
    );
    println!("curve       peak {display_peak_db:>7.2} dB");

    Ok(())
}
