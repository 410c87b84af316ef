//! SimpleEQ DSP core
//!
//! A three-role parametric equalizer (low cut, peak, high cut) built from
//! cascaded biquads, with lock-free coefficient publication from a control
//! thread into the audio thread.

pub mod domain;
