//! Filter cascades
//!
//! - [`FilterChain`]: fixed-length cascade of stages for one filter role
//! - [`ProcessingChain`]: the mono LowCut → Peak → HighCut path
//! - [`StereoProcessor`]: two independent mono paths
//!
//! Chains are owned by the thread that processes them. Other threads publish
//! through a [`ChainHandle`], which only ever sees the stages' control
//! surfaces.

use crate::domain::coefficients::{
    BiquadCoeffs, DerivedCoefficients, StageCoefficients, MAX_CUT_STAGES,
};
use crate::domain::filter::{Effect, FilterStage, StageControl};
use std::sync::Arc;

// ============================================================================
// Publishing helpers (shared by owned chains and handles)
// ============================================================================

fn publish<'a, const N: usize>(
    controls: impl Iterator<Item = &'a StageControl>,
    coeffs: &StageCoefficients<N>,
) {
    let sections = coeffs.sections();
    let active = coeffs.active_stages();
    for (i, control) in controls.enumerate() {
        // Coefficients first, so a stage is never enabled with stale values
        if let Some(section) = sections.get(i) {
            control.set_coefficients(*section);
        }
        control.set_bypassed(i >= active);
    }
}

fn set_active<'a>(controls: impl Iterator<Item = &'a StageControl>, count: usize) {
    for (i, control) in controls.enumerate() {
        control.set_bypassed(i >= count);
    }
}

fn read_positions<'a, const N: usize>(
    controls: impl Iterator<Item = &'a StageControl>,
) -> [Option<BiquadCoeffs>; N] {
    let mut positions = [None; N];
    for (slot, control) in positions.iter_mut().zip(controls) {
        if !control.is_bypassed() {
            *slot = Some(control.coefficients());
        }
    }
    positions
}

// ============================================================================
// FilterChain
// ============================================================================

/// Cascade of exactly `N` stages
///
/// Positions beyond the active slope order are bypassed, never removed.
#[derive(Debug)]
pub struct FilterChain<const N: usize> {
    stages: [FilterStage; N],
}

pub type CutChain = FilterChain<MAX_CUT_STAGES>;
pub type PeakChain = FilterChain<1>;

impl<const N: usize> FilterChain<N> {
    /// Create a chain of identity stages, all active
    pub fn new() -> Self {
        Self {
            stages: std::array::from_fn(|_| FilterStage::default()),
        }
    }

    /// Number of positions in the chain
    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Stage at position `index`
    pub fn stage(&self, index: usize) -> Option<&FilterStage> {
        self.stages.get(index)
    }

    /// Whether position `index` is bypassed. Out-of-range positions count as bypassed.
    pub fn is_bypassed(&self, index: usize) -> bool {
        self.stages.get(index).map_or(true, FilterStage::is_bypassed)
    }

    /// Enable stages `0..count` and bypass the rest
    ///
    /// `count` is clamped to `N`; zero bypasses the whole chain.
    pub fn set_active_stage_count(&self, count: usize) {
        set_active(self.stages.iter().map(FilterStage::control_ref), count.min(N));
    }

    /// Number of published, non-bypassed stages
    pub fn active_stage_count(&self) -> usize {
        self.stages.iter().filter(|stage| !stage.is_bypassed()).count()
    }

    /// Publish a role's coefficient sets and active count
    pub fn apply(&self, coeffs: &StageCoefficients<N>) {
        publish(self.stages.iter().map(FilterStage::control_ref), coeffs);
    }

    /// Control surfaces of every position, for publishing from another thread
    pub fn controls(&self) -> ChainControls<N> {
        ChainControls {
            stages: std::array::from_fn(|i| self.stages[i].control()),
        }
    }

    /// Published coefficients per position (`None` when bypassed)
    pub fn positions(&self) -> [Option<BiquadCoeffs>; N] {
        read_positions(self.stages.iter().map(FilterStage::control_ref))
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        self.stages.iter_mut().fold(x, |y, stage| stage.process_sample(y))
    }
}

impl<const N: usize> Default for FilterChain<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Effect for FilterChain<N> {
    fn process(&mut self, buffer: &mut [f32]) {
        for stage in &mut self.stages {
            stage.process_block(buffer);
        }
    }

    fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    fn name(&self) -> &str {
        "FilterChain"
    }
}

/// Shared control surfaces of one [`FilterChain`]
#[derive(Debug, Clone)]
pub struct ChainControls<const N: usize> {
    stages: [Arc<StageControl>; N],
}

impl<const N: usize> ChainControls<N> {
    pub fn apply(&self, coeffs: &StageCoefficients<N>) {
        publish(self.stages.iter().map(Arc::as_ref), coeffs);
    }

    pub fn set_active_stage_count(&self, count: usize) {
        set_active(self.stages.iter().map(Arc::as_ref), count.min(N));
    }

    pub fn positions(&self) -> [Option<BiquadCoeffs>; N] {
        read_positions(self.stages.iter().map(Arc::as_ref))
    }
}

// ============================================================================
// ProcessingChain
// ============================================================================

/// Plain copy of the coefficients per position, `None` for bypassed stages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSnapshot {
    pub low_cut: [Option<BiquadCoeffs>; MAX_CUT_STAGES],
    pub peak: [Option<BiquadCoeffs>; 1],
    pub high_cut: [Option<BiquadCoeffs>; MAX_CUT_STAGES],
}

impl ChainSnapshot {
    /// Every non-bypassed stage: peak first, then low cut, then high cut
    pub fn active_stages(&self) -> impl Iterator<Item = &BiquadCoeffs> + '_ {
        self.peak
            .iter()
            .chain(self.low_cut.iter())
            .chain(self.high_cut.iter())
            .flatten()
    }
}

impl Default for ChainSnapshot {
    fn default() -> Self {
        Self {
            low_cut: [None; MAX_CUT_STAGES],
            peak: [None; 1],
            high_cut: [None; MAX_CUT_STAGES],
        }
    }
}

fn designed_positions<const N: usize>(coeffs: &StageCoefficients<N>) -> [Option<BiquadCoeffs>; N] {
    let sections = coeffs.sections();
    let active = coeffs.active_stages();
    std::array::from_fn(|i| if i < active { sections.get(i).copied() } else { None })
}

impl From<&DerivedCoefficients> for ChainSnapshot {
    fn from(derived: &DerivedCoefficients) -> Self {
        Self {
            low_cut: designed_positions(&derived.low_cut),
            peak: designed_positions(&derived.peak),
            high_cut: designed_positions(&derived.high_cut),
        }
    }
}

impl From<DerivedCoefficients> for ChainSnapshot {
    fn from(derived: DerivedCoefficients) -> Self {
        Self::from(&derived)
    }
}

impl From<&ChainSnapshot> for ChainSnapshot {
    fn from(snapshot: &ChainSnapshot) -> Self {
        *snapshot
    }
}

impl From<&ProcessingChain> for ChainSnapshot {
    fn from(chain: &ProcessingChain) -> Self {
        chain.snapshot()
    }
}

/// Mono equalizer path: LowCut, then Peak, then HighCut
#[derive(Debug, Default)]
pub struct ProcessingChain {
    low_cut: CutChain,
    peak: PeakChain,
    high_cut: CutChain,
}

impl ProcessingChain {
    /// Create a chain where every stage is an identity filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain with coefficients already published
    pub fn with_coefficients(derived: &DerivedCoefficients) -> Self {
        let chain = Self::new();
        chain.apply(derived);
        chain
    }

    pub fn low_cut(&self) -> &CutChain {
        &self.low_cut
    }

    pub fn peak(&self) -> &PeakChain {
        &self.peak
    }

    pub fn high_cut(&self) -> &CutChain {
        &self.high_cut
    }

    /// Publish all three roles
    pub fn apply(&self, derived: &DerivedCoefficients) {
        self.low_cut.apply(&derived.low_cut);
        self.peak.apply(&derived.peak);
        self.high_cut.apply(&derived.high_cut);
    }

    /// Handle for publishing from another thread
    pub fn handle(&self) -> ChainHandle {
        ChainHandle {
            low_cut: self.low_cut.controls(),
            peak: self.peak.controls(),
            high_cut: self.high_cut.controls(),
        }
    }

    /// Published coefficients per position
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            low_cut: self.low_cut.positions(),
            peak: self.peak.positions(),
            high_cut: self.high_cut.positions(),
        }
    }

    /// Coefficients the processing side is currently running, per position
    ///
    /// Unlike [`snapshot`](Self::snapshot) this ignores bypass and reports
    /// the local copies, so it only catches up after a sample is processed.
    pub fn active_coefficients(&self) -> ChainSnapshot {
        fn local<const N: usize>(chain: &FilterChain<N>) -> [Option<BiquadCoeffs>; N] {
            std::array::from_fn(|i| chain.stage(i).map(FilterStage::active_coefficients))
        }

        ChainSnapshot {
            low_cut: local(&self.low_cut),
            peak: local(&self.peak),
            high_cut: local(&self.high_cut),
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.low_cut.process_sample(x);
        let y = self.peak.process_sample(y);
        self.high_cut.process_sample(y)
    }
}

impl Effect for ProcessingChain {
    fn process(&mut self, buffer: &mut [f32]) {
        self.low_cut.process(buffer);
        self.peak.process(buffer);
        self.high_cut.process(buffer);
    }

    fn reset(&mut self) {
        self.low_cut.reset();
        self.peak.reset();
        self.high_cut.reset();
    }

    fn name(&self) -> &str {
        "ProcessingChain"
    }
}

/// Thread-safe publisher for one [`ProcessingChain`]
///
/// Holds only control surfaces, never delay-line state.
#[derive(Debug, Clone)]
pub struct ChainHandle {
    low_cut: ChainControls<MAX_CUT_STAGES>,
    peak: ChainControls<1>,
    high_cut: ChainControls<MAX_CUT_STAGES>,
}

impl ChainHandle {
    pub fn apply(&self, derived: &DerivedCoefficients) {
        self.low_cut.apply(&derived.low_cut);
        self.peak.apply(&derived.peak);
        self.high_cut.apply(&derived.high_cut);
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            low_cut: self.low_cut.positions(),
            peak: self.peak.positions(),
            high_cut: self.high_cut.positions(),
        }
    }
}

// ============================================================================
// Stereo
// ============================================================================

/// Two independent mono chains fed from the same coefficients
#[derive(Debug, Default)]
pub struct StereoProcessor {
    left: ProcessingChain,
    right: ProcessingChain,
}

impl StereoProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn left(&self) -> &ProcessingChain {
        &self.left
    }

    pub fn right(&self) -> &ProcessingChain {
        &self.right
    }

    pub fn apply(&self, derived: &DerivedCoefficients) {
        self.left.apply(derived);
        self.right.apply(derived);
    }

    /// Handles for the left and right chains
    pub fn handles(&self) -> [ChainHandle; 2] {
        [self.left.handle(), self.right.handle()]
    }

    /// Process split channel buffers in place
    pub fn process_stereo(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.left.process(left);
        self.right.process(right);
    }

    /// Process an interleaved L/R buffer in place
    ///
    /// A trailing odd sample goes through the left chain.
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        let mut frames = buffer.chunks_exact_mut(2);
        for frame in &mut frames {
            frame[0] = self.left.process_sample(frame[0]);
            frame[1] = self.right.process_sample(frame[1]);
        }
        if let [last] = frames.into_remainder() {
            *last = self.left.process_sample(*last);
        }
    }
}

impl Effect for StereoProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        self.process_interleaved(buffer);
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    fn name(&self) -> &str {
        "StereoProcessor"
    }
}
