//! Vetoscan Backend Library
//!
//! Event-stream classification and reconciliation engine for a 32-channel
//! muon veto detector. Exposes the engine module for use by tests and
//! downstream tooling; acquisition, decoding and persistence live in
//! collaborator crates.

pub mod veto;

// Re-export the run processor at crate root for convenience
pub use veto::orchestrator::{RunOutput, RunProcessor};
