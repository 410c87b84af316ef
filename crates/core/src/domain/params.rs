//! Human-facing equalizer parameters
//!
//! [`ParameterSnapshot`] is the value object handed from the host side to the
//! coefficient factory. It is copied, never shared, and carries no logic
//! beyond clamping itself into the supported ranges.

use serde::{Deserialize, Serialize};

/// Parameter ranges exposed to the host
///
/// Snapshots are clamped to these ranges before any coefficient is derived.
pub mod ranges {
    /// Frequency range for all three filter roles (Hz)
    pub const FREQ_MIN: f32 = 20.0;
    pub const FREQ_MAX: f32 = 20_000.0;

    /// Peak gain range (dB)
    pub const GAIN_DB_MIN: f32 = -24.0;
    pub const GAIN_DB_MAX: f32 = 24.0;

    /// Peak quality range
    pub const Q_MIN: f32 = 0.1;
    pub const Q_MAX: f32 = 10.0;
}

/// Roll-off of a cut filter
///
/// Every step adds one cascaded second-order section (12 dB/octave each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Slope {
    #[default]
    Db12,
    Db24,
    Db36,
    Db48,
}

impl Slope {
    pub const ALL: [Slope; 4] = [Slope::Db12, Slope::Db24, Slope::Db36, Slope::Db48];

    /// Number of second-order sections needed for this slope
    pub fn stages(self) -> usize {
        match self {
            Slope::Db12 => 1,
            Slope::Db24 => 2,
            Slope::Db36 => 3,
            Slope::Db48 => 4,
        }
    }

    /// Order of the equivalent Butterworth filter
    pub fn order(self) -> usize {
        self.stages() * 2
    }

    pub fn db_per_octave(self) -> u32 {
        self.stages() as u32 * 12
    }

    /// Map a host choice index (0..=3) to a slope, clamping out-of-range values
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    pub fn index(self) -> usize {
        self.stages() - 1
    }
}

/// Immutable snapshot of every equalizer setting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSnapshot {
    pub peak_freq: f32,
    pub peak_gain_db: f32,
    pub peak_quality: f32,
    pub low_cut_freq: f32,
    pub low_cut_slope: Slope,
    pub high_cut_freq: f32,
    pub high_cut_slope: Slope,
    pub low_cut_bypassed: bool,
    pub peak_bypassed: bool,
    pub high_cut_bypassed: bool,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            peak_freq: Self::DEFAULT_PEAK_FREQ,
            peak_gain_db: 0.0,
            peak_quality: 1.0,
            low_cut_freq: ranges::FREQ_MIN,
            low_cut_slope: Slope::Db12,
            high_cut_freq: ranges::FREQ_MAX,
            high_cut_slope: Slope::Db12,
            low_cut_bypassed: false,
            peak_bypassed: false,
            high_cut_bypassed: false,
        }
    }
}

impl ParameterSnapshot {
    pub const DEFAULT_PEAK_FREQ: f32 = 750.0;

    /// Return a copy with every field inside its host range
    ///
    /// Non-finite values fall back to the defaults so NaN can never reach the
    /// coefficient designs.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            peak_freq: clamp_or(
                self.peak_freq,
                ranges::FREQ_MIN,
                ranges::FREQ_MAX,
                defaults.peak_freq,
            ),
            peak_gain_db: clamp_or(
                self.peak_gain_db,
                ranges::GAIN_DB_MIN,
                ranges::GAIN_DB_MAX,
                defaults.peak_gain_db,
            ),
            peak_quality: clamp_or(
                self.peak_quality,
                ranges::Q_MIN,
                ranges::Q_MAX,
                defaults.peak_quality,
            ),
            low_cut_freq: clamp_or(
                self.low_cut_freq,
                ranges::FREQ_MIN,
                ranges::FREQ_MAX,
                defaults.low_cut_freq,
            ),
            high_cut_freq: clamp_or(
                self.high_cut_freq,
                ranges::FREQ_MIN,
                ranges::FREQ_MAX,
                defaults.high_cut_freq,
            ),
            ..self
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}
