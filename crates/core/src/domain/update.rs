//! Change detection and coefficient publication
//!
//! The edit side marks a [`DirtyFlag`]; the control side polls an
//! [`UpdateCoordinator`] at its own cadence. A burst of edits between two
//! polls costs exactly one recomputation.
//!
//! ```text
//! edit ──► SharedParameters ──notify──► DirtyFlag
//!                                          │ take()
//!                         UpdateCoordinator::poll
//!                                          │ derive_coefficients
//!                       ┌──────────────────┴──────────────┐
//!                 audio ChainHandle            visualization ChainHandle
//! ```

use crate::domain::chain::ChainHandle;
use crate::domain::coefficients::{derive_coefficients, sanitize_sample_rate, DerivedCoefficients};
use crate::domain::params::{ParameterSnapshot, Slope};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Dirty flag
// ============================================================================

/// Lock-free "something changed" signal
#[derive(Debug, Default)]
pub struct DirtyFlag {
    dirty: CachePadded<AtomicBool>,
}

impl DirtyFlag {
    pub fn new(dirty: bool) -> Self {
        Self {
            dirty: CachePadded::new(AtomicBool::new(dirty)),
        }
    }

    /// Request a recomputation. Callable from any thread.
    #[inline]
    pub fn mark(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Test-and-clear; true if a change was pending
    #[inline]
    pub fn take(&self) -> bool {
        self.dirty
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

// ============================================================================
// Listener registry
// ============================================================================

/// Subscriber slots per registry
pub const MAX_LISTENERS: usize = 64;

/// Every slot of a [`ListenerRegistry`] is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("listener registry is full ({capacity} subscribers)")]
pub struct RegistryFull {
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct ListenerSlot {
    active: AtomicBool,
    flag: Arc<DirtyFlag>,
}

/// Fixed set of dirty flags marked on every parameter change
///
/// Slots and their flags are allocated up front. [`notify`](Self::notify)
/// only reads the `active` bits, so an edit never waits on a subscriber
/// joining or leaving. Membership changes are serialized by a mutex.
#[derive(Debug)]
pub struct ListenerRegistry {
    slots: Box<[ListenerSlot]>,
    membership: Mutex<()>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self {
            slots: (0..MAX_LISTENERS).map(|_| ListenerSlot::default()).collect(),
            membership: Mutex::new(()),
        }
    }
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn membership(&self) -> MutexGuard<'_, ()> {
        self.membership.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim a slot; it stays claimed until the returned guard drops
    ///
    /// The slot's flag starts clear.
    pub fn register(registry: &Arc<Self>) -> Result<Subscription, RegistryFull> {
        let _membership = registry.membership();
        let (index, slot) = registry
            .slots
            .iter()
            .enumerate()
            .find(|(_, slot)| !slot.active.load(Ordering::Acquire))
            .ok_or(RegistryFull {
                capacity: registry.capacity(),
            })?;

        // A stale mark from the previous holder is dropped here
        slot.flag.take();
        slot.active.store(true, Ordering::Release);

        Ok(Subscription {
            registry: Arc::downgrade(registry),
            slot: index,
            flag: Arc::clone(&slot.flag),
        })
    }

    /// Mark every registered flag. Never blocks.
    pub fn notify(&self) {
        for slot in self.slots.iter() {
            if slot.active.load(Ordering::Acquire) {
                slot.flag.mark();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.active.load(Ordering::Acquire))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn unregister(&self, slot: usize) {
        let _membership = self.membership();
        if let Some(slot) = self.slots.get(slot) {
            slot.active.store(false, Ordering::Release);
        }
    }
}

/// Scoped registration in a [`ListenerRegistry`]
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    slot: usize,
    flag: Arc<DirtyFlag>,
}

impl Subscription {
    /// Flag marked by the registry while this subscription lives
    pub fn flag(&self) -> &Arc<DirtyFlag> {
        &self.flag
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.slot);
        }
    }
}

// ============================================================================
// Parameter sources
// ============================================================================

/// Provider of parameter values and change notifications
pub trait ParameterSource: Send + Sync {
    /// Current values, by value
    fn snapshot(&self) -> ParameterSnapshot;

    /// Registry marked on every change
    fn listeners(&self) -> &Arc<ListenerRegistry>;

    /// Listen for changes until the returned guard is dropped
    #[must_use = "dropping the subscription unregisters the listener"]
    fn subscribe(&self) -> Result<Subscription, RegistryFull> {
        ListenerRegistry::register(self.listeners())
    }
}

/// A single parameter edit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterChange {
    PeakFreq(f32),
    PeakGainDb(f32),
    PeakQuality(f32),
    LowCutFreq(f32),
    LowCutSlope(Slope),
    HighCutFreq(f32),
    HighCutSlope(Slope),
    LowCutBypassed(bool),
    PeakBypassed(bool),
    HighCutBypassed(bool),
}

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

#[derive(Debug)]
struct AtomicSlope(AtomicU8);

impl AtomicSlope {
    fn new(slope: Slope) -> Self {
        Self(AtomicU8::new(slope.index() as u8))
    }

    fn load(&self) -> Slope {
        Slope::from_index(usize::from(self.0.load(Ordering::Acquire)))
    }

    fn store(&self, slope: Slope) {
        self.0.store(slope.index() as u8, Ordering::Release);
    }
}

/// Host-side parameter store, writable from any thread
///
/// Each field is its own atomic. A snapshot taken during an edit burst may
/// mix old and new fields; the pending dirty flag guarantees a later
/// snapshot sees the final values.
#[derive(Debug)]
pub struct SharedParameters {
    peak_freq: AtomicF32,
    peak_gain_db: AtomicF32,
    peak_quality: AtomicF32,
    low_cut_freq: AtomicF32,
    low_cut_slope: AtomicSlope,
    high_cut_freq: AtomicF32,
    high_cut_slope: AtomicSlope,
    low_cut_bypassed: AtomicBool,
    peak_bypassed: AtomicBool,
    high_cut_bypassed: AtomicBool,
    listeners: Arc<ListenerRegistry>,
}

impl SharedParameters {
    pub fn new(initial: ParameterSnapshot) -> Arc<Self> {
        Arc::new(Self {
            peak_freq: AtomicF32::new(initial.peak_freq),
            peak_gain_db: AtomicF32::new(initial.peak_gain_db),
            peak_quality: AtomicF32::new(initial.peak_quality),
            low_cut_freq: AtomicF32::new(initial.low_cut_freq),
            low_cut_slope: AtomicSlope::new(initial.low_cut_slope),
            high_cut_freq: AtomicF32::new(initial.high_cut_freq),
            high_cut_slope: AtomicSlope::new(initial.high_cut_slope),
            low_cut_bypassed: AtomicBool::new(initial.low_cut_bypassed),
            peak_bypassed: AtomicBool::new(initial.peak_bypassed),
            high_cut_bypassed: AtomicBool::new(initial.high_cut_bypassed),
            listeners: ListenerRegistry::new(),
        })
    }

    /// Apply one edit and notify listeners
    pub fn apply(&self, change: ParameterChange) {
        self.store(change);
        self.listeners.notify();
    }

    /// Replace every value at once; listeners are notified a single time
    pub fn replace(&self, snapshot: ParameterSnapshot) {
        self.peak_freq.store(snapshot.peak_freq);
        self.peak_gain_db.store(snapshot.peak_gain_db);
        self.peak_quality.store(snapshot.peak_quality);
        self.low_cut_freq.store(snapshot.low_cut_freq);
        self.low_cut_slope.store(snapshot.low_cut_slope);
        self.high_cut_freq.store(snapshot.high_cut_freq);
        self.high_cut_slope.store(snapshot.high_cut_slope);
        self.low_cut_bypassed.store(snapshot.low_cut_bypassed, Ordering::Release);
        self.peak_bypassed.store(snapshot.peak_bypassed, Ordering::Release);
        self.high_cut_bypassed.store(snapshot.high_cut_bypassed, Ordering::Release);
        self.listeners.notify();
    }

    fn store(&self, change: ParameterChange) {
        match change {
            ParameterChange::PeakFreq(v) => self.peak_freq.store(v),
            ParameterChange::PeakGainDb(v) => self.peak_gain_db.store(v),
            ParameterChange::PeakQuality(v) => self.peak_quality.store(v),
            ParameterChange::LowCutFreq(v) => self.low_cut_freq.store(v),
            ParameterChange::LowCutSlope(s) => self.low_cut_slope.store(s),
            ParameterChange::HighCutFreq(v) => self.high_cut_freq.store(v),
            ParameterChange::HighCutSlope(s) => self.high_cut_slope.store(s),
            ParameterChange::LowCutBypassed(b) => self.low_cut_bypassed.store(b, Ordering::Release),
            ParameterChange::PeakBypassed(b) => self.peak_bypassed.store(b, Ordering::Release),
            ParameterChange::HighCutBypassed(b) => {
                self.high_cut_bypassed.store(b, Ordering::Release)
            }
        }
    }
}

impl ParameterSource for SharedParameters {
    fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            peak_freq: self.peak_freq.load(),
            peak_gain_db: self.peak_gain_db.load(),
            peak_quality: self.peak_quality.load(),
            low_cut_freq: self.low_cut_freq.load(),
            low_cut_slope: self.low_cut_slope.load(),
            high_cut_freq: self.high_cut_freq.load(),
            high_cut_slope: self.high_cut_slope.load(),
            low_cut_bypassed: self.low_cut_bypassed.load(Ordering::Acquire),
            peak_bypassed: self.peak_bypassed.load(Ordering::Acquire),
            high_cut_bypassed: self.high_cut_bypassed.load(Ordering::Acquire),
        }
    }

    fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Recomputes coefficients when parameters change and publishes them
///
/// Owned by the control context. Starts dirty so the first poll publishes.
#[derive(Debug)]
pub struct UpdateCoordinator<S: ParameterSource> {
    source: Arc<S>,
    dirty: Arc<DirtyFlag>,
    _subscription: Subscription,
    targets: Vec<ChainHandle>,
    sample_rate: f64,
    update_count: u64,
    last_snapshot: Option<ParameterSnapshot>,
    last_derived: Option<DerivedCoefficients>,
}

impl<S: ParameterSource> UpdateCoordinator<S> {
    pub fn new(source: Arc<S>, sample_rate: f64) -> Result<Self, RegistryFull> {
        let subscription = source.subscribe()?;
        let dirty = Arc::clone(subscription.flag());
        dirty.mark();

        Ok(Self {
            source,
            dirty,
            _subscription: subscription,
            targets: Vec::new(),
            sample_rate: sanitize_sample_rate(sample_rate),
            update_count: 0,
            last_snapshot: None,
            last_derived: None,
        })
    }

    /// Register a chain to receive every update
    pub fn add_target(&mut self, target: ChainHandle) {
        self.targets.push(target);
    }

    #[must_use]
    pub fn with_target(mut self, target: ChainHandle) -> Self {
        self.add_target(target);
        self
    }

    /// The flag this coordinator polls, for callers that signal changes directly
    ///
    /// Marks after the coordinator drops may reach a later subscriber.
    pub fn notifier(&self) -> Arc<DirtyFlag> {
        Arc::clone(&self.dirty)
    }

    pub fn mark_dirty(&self) {
        self.dirty.mark();
    }

    /// Recompute and publish if anything changed since the last poll
    ///
    /// The flag is cleared before the snapshot is taken, so an edit that
    /// lands during recomputation schedules exactly one more update.
    pub fn poll(&mut self) -> bool {
        if !self.dirty.take() {
            return false;
        }
        self.publish();
        true
    }

    /// Publish unconditionally
    pub fn force_update(&mut self) {
        self.dirty.take();
        self.publish();
    }

    /// Change the design sample rate; the next poll redesigns every stage
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sanitize_sample_rate(sample_rate);
        self.dirty.mark();
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of completed recomputations
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn last_snapshot(&self) -> Option<ParameterSnapshot> {
        self.last_snapshot
    }

    pub fn last_derived(&self) -> Option<&DerivedCoefficients> {
        self.last_derived.as_ref()
    }

    fn publish(&mut self) {
        let snapshot = self.source.snapshot();
        let derived = derive_coefficients(&snapshot, self.sample_rate);

        for target in &self.targets {
            target.apply(&derived);
        }

        self.update_count += 1;
        self.last_snapshot = Some(snapshot);
        self.last_derived = Some(derived);

        debug!(
            update = self.update_count,
            targets = self.targets.len(),
            sample_rate = self.sample_rate,
            low_cut_stages = derived.low_cut.active_stages(),
            high_cut_stages = derived.high_cut.active_stages(),
            "Published coefficient update"
        );
    }
}
