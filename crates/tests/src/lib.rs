//! Cross-module integration tests for the SimpleEQ core
//!
//! Run with: cargo test -p simple-eq-tests
