//! Run Configuration
//!
//! Metadata for one run, supplied by the run-metadata collaborator, plus the
//! fixed per-era hardware rules. Era rules are lookup tables keyed on the run
//! number, not computed quantities.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::veto::event::NUM_CHANNELS;

/// Runs after this number ship a trustworthy SBC clock.
const SBC_TRUSTED_AFTER_RUN: u32 = 8557;

/// Raw SBC readings at or above this value are overflow garbage.
const SBC_OVERFLOW_SENTINEL: f64 = 2_000_000_000.0;

/// Runs after this number have the upper veto panels removed.
const UPPER_PANELS_ABSENT_AFTER_RUN: u32 = 45_000_000;

/// Per-run processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run number.
    pub run: u32,
    /// Run start, Unix seconds.
    pub start: i64,
    /// Run stop, Unix seconds. A corrupt stop packet yields stop <= start;
    /// the orchestrator falls back to the last good scaler time.
    pub stop: i64,
    /// Stop after the error-tally pass (no muon scan, no per-event output).
    pub validation_only: bool,
}

impl RunConfig {
    pub fn new(run: u32, start: i64, stop: i64) -> Self {
        Self {
            run,
            start,
            stop,
            validation_only: false,
        }
    }

    pub fn validation_only(mut self) -> Self {
        self.validation_only = true;
        self
    }

    /// Nominal duration from the run record, seconds.
    pub fn nominal_duration(&self) -> f64 {
        (self.stop - self.start) as f64
    }

    pub fn start_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.start, 0).single()
    }

    pub fn era(&self) -> RunEra {
        RunEra::for_run(self.run)
    }
}

/// Fixed per-era hardware rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunEra {
    /// SBC clock readings may be used as a scaler fallback in this era.
    pub sbc_usable: bool,
    /// First channel of the absent panel block, if any panels were removed.
    pub absent_channels_from: Option<usize>,
}

impl RunEra {
    pub fn for_run(run: u32) -> Self {
        Self {
            sbc_usable: run > SBC_TRUSTED_AFTER_RUN,
            absent_channels_from: (run > UPPER_PANELS_ABSENT_AFTER_RUN).then_some(24),
        }
    }

    /// Whether a raw SBC reading is inside the validity window for this era.
    #[inline]
    pub fn sbc_trusted(&self, raw_sbc_s: f64) -> bool {
        self.sbc_usable && raw_sbc_s < SBC_OVERFLOW_SENTINEL
    }

    /// Whether the channel is physically absent in this era.
    #[inline]
    pub fn channel_absent(&self, channel: usize) -> bool {
        debug_assert!(channel < NUM_CHANNELS);
        match self.absent_channels_from {
            Some(from) => channel >= from,
            None => false,
        }
    }
}
