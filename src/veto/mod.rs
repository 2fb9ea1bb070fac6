//! Muon Veto Event-Stream Engine
//!
//! Classifies a run's decoded veto events against the hardware-error
//! taxonomy, reconciles the two run clocks, calibrates per-channel software
//! thresholds, measures the LED reference rate, and tags muon candidates by
//! their plane-coincidence geometry.
//!
//! The [`orchestrator::RunProcessor`] drives everything in four sequential
//! passes over a replayable [`feed::EventFeed`]; all the other modules are
//! pure or self-contained components it composes:
//!
//! - [`event`]: decoded event records and the error taxonomy
//! - [`config`]: run metadata and per-era hardware rules
//! - [`thresholds`]: pedestal finding and channel threshold calibration
//! - [`errors`]: per-event error classification
//! - [`timing`]: scaler/SBC clock reconciliation and interpolation
//! - [`periodic`]: LED frequency estimation
//! - [`coincidence`]: plane mapping, cuts, and muon classification
//! - [`context`]: cross-pass mutable state for one run
//! - [`report`]: error tallies and the run error report

pub mod coincidence;
pub mod config;
pub mod context;
pub mod errors;
pub mod event;
pub mod feed;
pub mod orchestrator;
pub mod periodic;
pub mod report;
pub mod thresholds;
pub mod timing;

pub use coincidence::{CoincidenceType, Plane, PlaneHits};
pub use config::{RunConfig, RunEra};
pub use event::{ErrorKind, ErrorSet, EventRecord, StructuralFlags};
pub use feed::{EventFeed, VecFeed};
pub use orchestrator::{EventOutput, RunOutput, RunProcessor, RunSummary};
pub use periodic::PeriodicSignalStats;
pub use thresholds::ChannelThresholds;
