//! Domain entities and business rules

pub mod chain;
pub mod coefficients;
pub mod config;
pub mod filter;
pub mod params;
pub mod response;
pub mod update;

// Re-export specific items to avoid ambiguous glob imports
pub use chain::{
    ChainHandle, ChainSnapshot, CutChain, FilterChain, PeakChain, ProcessingChain, StereoProcessor,
};
pub use coefficients::{
    derive_coefficients, BiquadCoeffs, CutCoefficients, DerivedCoefficients, PeakCoefficients,
    StageCoefficients, MAX_CUT_STAGES,
};
pub use config::{ConfigError, EqConfig, PresetStore};
pub use filter::{Effect, FilterStage, StageControl};
pub use params::{ranges, ParameterSnapshot, Slope};
pub use response::{frequency_at, gain_to_db, ResponseCurve, ResponseEvaluator};
pub use update::{
    DirtyFlag, ListenerRegistry, ParameterChange, ParameterSource, RegistryFull, SharedParameters,
    Subscription, UpdateCoordinator, MAX_LISTENERS,
};
