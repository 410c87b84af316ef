//! Coefficient design for the three filter roles
//!
//! Pure functions that turn a [`ParameterSnapshot`] and a sample rate into
//! biquad coefficient sets:
//! - Peak: RBJ peaking filter
//! - Low cut / high cut: even-order Butterworth, decomposed into 1-4
//!   second-order sections with per-section Q
//!
//! Nothing here allocates or fails. Inputs are clamped first.

use crate::domain::params::{ParameterSnapshot, Slope};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::trace;

/// Maximum cascade depth of a cut filter
pub const MAX_CUT_STAGES: usize = 4;

/// Sample rate used when the host reports something unusable
pub const FALLBACK_SAMPLE_RATE: f64 = 44_100.0;

/// Design frequencies stay below this fraction of Nyquist
const NYQUIST_GUARD: f64 = 0.995;

/// Lowest design frequency (Hz)
const MIN_DESIGN_FREQ: f64 = 1.0;

/// Lowest design Q, keeps `alpha` finite
const MIN_DESIGN_Q: f64 = 1e-3;

/// Biquad filter coefficients
///
/// Normalized so that `a0 == 1.0`. Evaluated in `f64` so that low-frequency
/// cut sections keep their poles strictly inside the unit circle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BiquadCoeffs {
    /// Unity gain (no filtering)
    pub const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate coefficients for a peaking EQ filter
    ///
    /// Boosts or cuts frequencies around a center frequency. The gain at the
    /// center frequency is exactly `gain_db`.
    #[must_use]
    pub fn peaking(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let (cos_w0, alpha) = prewarp(sample_rate, freq, q);

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        )
    }

    /// Calculate coefficients for a second-order high-pass section
    #[must_use]
    pub fn highpass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let (cos_w0, alpha) = prewarp(sample_rate, freq, q);

        Self::normalized(
            (1.0 + cos_w0) / 2.0,
            -(1.0 + cos_w0),
            (1.0 + cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// Calculate coefficients for a second-order low-pass section
    #[must_use]
    pub fn lowpass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let (cos_w0, alpha) = prewarp(sample_rate, freq, q);

        Self::normalized(
            (1.0 - cos_w0) / 2.0,
            1.0 - cos_w0,
            (1.0 - cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// Complex response H(e^jω) at `freq`
    pub fn response_at(&self, freq: f64, sample_rate: f64) -> Complex64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;

        let numerator = self.b0 + z1 * self.b1 + z2 * self.b2;
        let denominator = 1.0 + z1 * self.a1 + z2 * self.a2;
        numerator / denominator
    }

    /// Linear magnitude |H(e^jω)| at `freq`
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        self.response_at(freq, sample_rate).norm()
    }

    /// Roots of `z^2 + a1*z + a2`
    pub fn poles(&self) -> [Complex64; 2] {
        let discriminant = Complex64::new(self.a1 * self.a1 - 4.0 * self.a2, 0.0).sqrt();
        [
            (-self.a1 + discriminant) / 2.0,
            (-self.a1 - discriminant) / 2.0,
        ]
    }

    pub fn max_pole_radius(&self) -> f64 {
        let [p1, p2] = self.poles();
        p1.norm().max(p2.norm())
    }

    /// All poles strictly inside the unit circle
    pub fn is_stable(&self) -> bool {
        self.is_finite() && self.max_pole_radius() < 1.0
    }

    pub fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
            .iter()
            .all(|c| c.is_finite())
    }

    pub(crate) fn to_words(self) -> [u64; 5] {
        [
            self.b0.to_bits(),
            self.b1.to_bits(),
            self.b2.to_bits(),
            self.a1.to_bits(),
            self.a2.to_bits(),
        ]
    }

    pub(crate) fn from_words(words: [u64; 5]) -> Self {
        Self {
            b0: f64::from_bits(words[0]),
            b1: f64::from_bits(words[1]),
            b2: f64::from_bits(words[2]),
            a1: f64::from_bits(words[3]),
            a2: f64::from_bits(words[4]),
        }
    }
}

/// `(cos(w0), alpha)` for the RBJ designs, with frequency and Q clamped
fn prewarp(sample_rate: f64, freq: f64, q: f64) -> (f64, f64) {
    let sample_rate = sanitize_sample_rate(sample_rate);
    let freq = clamp_frequency(freq, sample_rate);
    let q = if q.is_finite() { q.max(MIN_DESIGN_Q) } else { MIN_DESIGN_Q };

    let w0 = 2.0 * PI * freq / sample_rate;
    (w0.cos(), w0.sin() / (2.0 * q))
}

/// Replace a non-positive or non-finite sample rate with the fallback
pub fn sanitize_sample_rate(sample_rate: f64) -> f64 {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        sample_rate
    } else {
        FALLBACK_SAMPLE_RATE
    }
}

/// Keep a design frequency strictly inside (0, Nyquist)
pub fn clamp_frequency(freq: f64, sample_rate: f64) -> f64 {
    let max = sample_rate * 0.5 * NYQUIST_GUARD;
    let min = MIN_DESIGN_FREQ.min(max * 0.5);
    if freq.is_finite() {
        freq.clamp(min, max)
    } else {
        min
    }
}

/// Q of section `section` in an order-`order` Butterworth decomposition
///
/// `Q_k = 1 / (2 cos((2k + 1) π / (2 order)))`, ascending with `k`.
pub fn butterworth_q(order: usize, section: usize) -> f64 {
    let angle = PI * (2 * section + 1) as f64 / (2 * order) as f64;
    1.0 / (2.0 * angle.cos())
}

/// Coefficients for one filter role, sized to the role's chain
///
/// Only the first `len` sections are designed. A bypassed role keeps its
/// sections but reports zero active stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageCoefficients<const N: usize> {
    sections: [BiquadCoeffs; N],
    len: usize,
    bypassed: bool,
}

pub type PeakCoefficients = StageCoefficients<1>;
pub type CutCoefficients = StageCoefficients<MAX_CUT_STAGES>;

impl<const N: usize> StageCoefficients<N> {
    fn from_sections(sections: &[BiquadCoeffs], bypassed: bool) -> Self {
        let len = sections.len().min(N);
        let mut designed = [BiquadCoeffs::IDENTITY; N];
        designed[..len].copy_from_slice(&sections[..len]);
        Self {
            sections: designed,
            len,
            bypassed,
        }
    }

    /// The designed sections, in cascade order
    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections[..self.len]
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    /// Number of stages the chain should run
    pub fn active_stages(&self) -> usize {
        if self.bypassed {
            0
        } else {
            self.len
        }
    }
}

/// Everything the chains need after one parameter change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedCoefficients {
    pub low_cut: CutCoefficients,
    pub peak: PeakCoefficients,
    pub high_cut: CutCoefficients,
}

/// Derive coefficient sets for all three roles
pub fn derive_coefficients(snapshot: &ParameterSnapshot, sample_rate: f64) -> DerivedCoefficients {
    let snapshot = snapshot.sanitized();
    let sample_rate = sanitize_sample_rate(sample_rate);

    let derived = DerivedCoefficients {
        low_cut: make_low_cut_filter(&snapshot, sample_rate),
        peak: make_peak_filter(&snapshot, sample_rate),
        high_cut: make_high_cut_filter(&snapshot, sample_rate),
    };

    trace!(
        sample_rate,
        low_cut_stages = derived.low_cut.active_stages(),
        high_cut_stages = derived.high_cut.active_stages(),
        peak_freq = snapshot.peak_freq,
        peak_gain_db = snapshot.peak_gain_db,
        "Derived coefficients"
    );

    derived
}

pub fn make_peak_filter(snapshot: &ParameterSnapshot, sample_rate: f64) -> PeakCoefficients {
    let coeffs = BiquadCoeffs::peaking(
        sample_rate,
        f64::from(snapshot.peak_freq),
        f64::from(snapshot.peak_gain_db),
        f64::from(snapshot.peak_quality),
    );
    StageCoefficients::from_sections(&[coeffs], snapshot.peak_bypassed)
}

pub fn make_low_cut_filter(snapshot: &ParameterSnapshot, sample_rate: f64) -> CutCoefficients {
    let sections = butterworth_sections(snapshot.low_cut_slope, |q| {
        BiquadCoeffs::highpass(sample_rate, f64::from(snapshot.low_cut_freq), q)
    });
    StageCoefficients::from_sections(
        &sections[..snapshot.low_cut_slope.stages()],
        snapshot.low_cut_bypassed,
    )
}

pub fn make_high_cut_filter(snapshot: &ParameterSnapshot, sample_rate: f64) -> CutCoefficients {
    let sections = butterworth_sections(snapshot.high_cut_slope, |q| {
        BiquadCoeffs::lowpass(sample_rate, f64::from(snapshot.high_cut_freq), q)
    });
    StageCoefficients::from_sections(
        &sections[..snapshot.high_cut_slope.stages()],
        snapshot.high_cut_bypassed,
    )
}

fn butterworth_sections(
    slope: Slope,
    design: impl Fn(f64) -> BiquadCoeffs,
) -> [BiquadCoeffs; MAX_CUT_STAGES] {
    let mut sections = [BiquadCoeffs::IDENTITY; MAX_CUT_STAGES];
    for (k, section) in sections.iter_mut().take(slope.stages()).enumerate() {
        *section = design(butterworth_q(slope.order(), k));
    }
    sections
}
