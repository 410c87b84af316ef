//! Single biquad stage with a lock-free control surface
//!
//! A [`FilterStage`] is owned by exactly one processing thread. Its
//! coefficients and bypass flag live in a shared [`StageControl`] that any
//! thread may write through. The audio side never blocks on it:
//! - coefficients sit in a versioned [`CoefficientSlot`] (seqlock layout);
//!   a read that overlaps a write is discarded and retried on the next sample
//! - bypass is a plain atomic flag
//!
//! Delay-line state is private to the owning thread.

use crate::domain::coefficients::BiquadCoeffs;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Core trait for everything on the audio path
///
/// All processors work in-place on mono f32 buffers. Processing is total:
/// it never fails and never allocates.
pub trait Effect: Send {
    /// Process a buffer of samples in-place
    fn process(&mut self, buffer: &mut [f32]);

    /// Clear delay lines and other per-sample state
    fn reset(&mut self);

    /// Effect name for debugging/display
    fn name(&self) -> &str;
}

/// Versioned storage for one coefficient set
///
/// Even version: stable. Odd version: a writer is storing words. Readers
/// compare the version before and after copying the words.
#[derive(Debug)]
pub struct CoefficientSlot {
    version: CachePadded<AtomicU32>,
    words: [AtomicU64; 5],
}

impl CoefficientSlot {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            version: CachePadded::new(AtomicU32::new(0)),
            words: coeffs.to_words().map(AtomicU64::new),
        }
    }

    /// Publish a complete coefficient set
    ///
    /// Concurrent writers are serialized on the version word. Meant for the
    /// control context; readers are never made to wait.
    pub fn store(&self, coeffs: BiquadCoeffs) {
        let mut current = self.version.load(Ordering::Relaxed);
        loop {
            if current & 1 == 1 {
                std::hint::spin_loop();
                current = self.version.load(Ordering::Relaxed);
                continue;
            }
            match self.version.compare_exchange_weak(
                current,
                current.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        fence(Ordering::Release);

        for (word, value) in self.words.iter().zip(coeffs.to_words()) {
            word.store(value, Ordering::Relaxed);
        }

        self.version.store(current.wrapping_add(2), Ordering::Release);
    }

    /// Current version word
    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Single read attempt; `None` if it overlapped a write
    #[inline]
    pub fn try_load(&self) -> Option<(u32, BiquadCoeffs)> {
        let before = self.version.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }

        let words = [
            self.words[0].load(Ordering::Relaxed),
            self.words[1].load(Ordering::Relaxed),
            self.words[2].load(Ordering::Relaxed),
            self.words[3].load(Ordering::Relaxed),
            self.words[4].load(Ordering::Relaxed),
        ];

        fence(Ordering::Acquire);
        let after = self.version.load(Ordering::Relaxed);

        (before == after).then(|| (before, BiquadCoeffs::from_words(words)))
    }

    /// Read until a consistent copy is obtained. Control context only.
    pub fn load(&self) -> BiquadCoeffs {
        loop {
            if let Some((_, coeffs)) = self.try_load() {
                return coeffs;
            }
            std::hint::spin_loop();
        }
    }
}

impl Default for CoefficientSlot {
    fn default() -> Self {
        Self::new(BiquadCoeffs::IDENTITY)
    }
}

/// Shared control surface of one stage
#[derive(Debug, Default)]
pub struct StageControl {
    coeffs: CoefficientSlot,
    bypassed: CachePadded<AtomicBool>,
}

impl StageControl {
    pub fn set_coefficients(&self, coeffs: BiquadCoeffs) {
        self.coeffs.store(coeffs);
    }

    /// Last published coefficients
    pub fn coefficients(&self) -> BiquadCoeffs {
        self.coeffs.load()
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Release);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }
}

/// Stateful biquad filter using Direct Form I
///
/// Coefficients may be swapped between any two samples; the delay line holds
/// raw input and output history only.
#[derive(Debug)]
pub struct FilterStage {
    control: Arc<StageControl>,
    // Coefficients currently in use by the owning thread
    coeffs: BiquadCoeffs,
    seen_version: u32,
    bypassed: bool,
    // Previous input samples (x[n-1], x[n-2])
    x1: f64,
    x2: f64,
    // Previous output samples (y[n-1], y[n-2])
    y1: f64,
    y2: f64,
}

impl FilterStage {
    /// Create a new stage with given coefficients
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        let control = Arc::new(StageControl::default());
        control.set_coefficients(coeffs);
        let seen_version = control.coeffs.version();

        Self {
            control,
            coeffs,
            seen_version,
            bypassed: false,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Shared control surface, for publishing from another thread
    pub fn control(&self) -> Arc<StageControl> {
        Arc::clone(&self.control)
    }

    pub(crate) fn control_ref(&self) -> &StageControl {
        &self.control
    }

    /// Publish new coefficients; picked up on the next processed sample
    pub fn set_coefficients(&self, coeffs: BiquadCoeffs) {
        self.control.set_coefficients(coeffs);
    }

    /// Publish a bypass change; picked up on the next processed sample
    pub fn set_bypassed(&self, bypassed: bool) {
        self.control.set_bypassed(bypassed);
    }

    /// Published bypass state
    pub fn is_bypassed(&self) -> bool {
        self.control.is_bypassed()
    }

    /// Coefficients the processing side is currently running
    pub fn active_coefficients(&self) -> BiquadCoeffs {
        self.coeffs
    }

    /// Pick up published coefficients and bypass state
    ///
    /// A bypass transition in either direction clears the delay line, so a
    /// stage coming back starts from silence.
    #[inline]
    fn sync(&mut self) {
        let bypassed = self.control.is_bypassed();
        if bypassed != self.bypassed {
            self.bypassed = bypassed;
            self.reset();
        }

        if self.control.coeffs.version() != self.seen_version {
            if let Some((version, coeffs)) = self.control.coeffs.try_load() {
                self.coeffs = coeffs;
                self.seen_version = version;
            }
        }
    }

    #[inline]
    fn tick(&mut self, x: f32) -> f32 {
        let x = f64::from(x);
        let c = &self.coeffs;
        // y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y as f32
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        self.sync();
        if self.bypassed {
            x
        } else {
            self.tick(x)
        }
    }

    /// Process a block; published changes are picked up once, at its start
    pub(crate) fn process_block(&mut self, buffer: &mut [f32]) {
        self.sync();
        if self.bypassed {
            return;
        }
        for sample in buffer.iter_mut() {
            *sample = self.tick(*sample);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

impl Default for FilterStage {
    fn default() -> Self {
        Self::new(BiquadCoeffs::IDENTITY)
    }
}

impl Effect for FilterStage {
    fn process(&mut self, buffer: &mut [f32]) {
        self.process_block(buffer);
    }

    fn reset(&mut self) {
        FilterStage::reset(self);
    }

    fn name(&self) -> &str {
        "FilterStage"
    }
}
