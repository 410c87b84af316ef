//! Magnitude response of a coefficient snapshot
//!
//! Evaluation is pure and runs off the audio thread. It reads a
//! [`ChainSnapshot`] (plain copied data), never a live chain.

use crate::domain::chain::ChainSnapshot;
use crate::domain::coefficients::sanitize_sample_rate;

/// Lowest displayed frequency (Hz)
pub const RESPONSE_FREQ_MIN: f64 = 20.0;
/// Highest displayed frequency (Hz)
pub const RESPONSE_FREQ_MAX: f64 = 20_000.0;
/// Floor applied to every dB value
pub const MIN_DB: f64 = -100.0;

/// Frequency of point `index` on a log-uniform axis of `width` points
///
/// `20 · 1000^(index / width)`: point 0 is 20 Hz, the axis approaches
/// 20 kHz from below.
pub fn frequency_at(index: usize, width: usize) -> f64 {
    if width == 0 {
        return RESPONSE_FREQ_MIN;
    }
    let ratio = RESPONSE_FREQ_MAX / RESPONSE_FREQ_MIN;
    RESPONSE_FREQ_MIN * ratio.powf(index as f64 / width as f64)
}

/// Convert a linear magnitude to dB, floored at [`MIN_DB`]
pub fn gain_to_db(magnitude: f64) -> f64 {
    if magnitude > 0.0 {
        (20.0 * magnitude.log10()).max(MIN_DB)
    } else {
        MIN_DB
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseEvaluator {
    sample_rate: f64,
}

impl ResponseEvaluator {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate: sanitize_sample_rate(sample_rate),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Aggregate dB response at `width` log-spaced points
    pub fn evaluate(&self, snapshot: impl Into<ChainSnapshot>, width: usize) -> ResponseCurve {
        ResponseCurve {
            snapshot: snapshot.into(),
            sample_rate: self.sample_rate,
            index: 0,
            width,
        }
    }

    /// Aggregate dB response at a single frequency
    pub fn magnitude_at(&self, snapshot: &ChainSnapshot, freq: f64) -> f64 {
        magnitude_db(snapshot, freq, self.sample_rate)
    }
}

fn magnitude_db(snapshot: &ChainSnapshot, freq: f64, sample_rate: f64) -> f64 {
    let magnitude = snapshot
        .active_stages()
        .map(|coeffs| coeffs.magnitude_at(freq, sample_rate))
        .product::<f64>();
    gain_to_db(magnitude)
}

/// Lazy, restartable sequence of dB values
///
/// Values are computed on demand. Clone before iterating to replay a curve.
#[derive(Debug, Clone)]
pub struct ResponseCurve {
    snapshot: ChainSnapshot,
    sample_rate: f64,
    index: usize,
    width: usize,
}

impl ResponseCurve {
    /// Frequencies matching each value of the curve
    pub fn frequencies(&self) -> impl Iterator<Item = f64> {
        let width = self.width;
        (self.index..width).map(move |i| frequency_at(i, width))
    }
}

impl Iterator for ResponseCurve {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.index >= self.width {
            return None;
        }
        let freq = frequency_at(self.index, self.width);
        self.index += 1;
        Some(magnitude_db(&self.snapshot, freq, self.sample_rate))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.width.saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ResponseCurve {}

impl std::iter::FusedIterator for ResponseCurve {}
