//! Error Tallies and the Run Error Report
//!
//! Run-level accumulation of per-event error counts, the serious-error
//! event logging used while scanning, and the end-of-run report the veto
//! group greps for.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::veto::event::{ErrorKind, ErrorSet, EventRecord, NUM_ERRORS};
use crate::veto::periodic::PeriodicSignalStats;

/// Slots excluded from the total error count: these are always present as
/// long as the hardware counters are not reset at the start of each run.
const ALWAYS_PRESENT: [usize; 2] = [10, 11];

/// Per-run error tallies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorTally {
    /// counts[slot] = number of events with that error.
    pub counts: [u64; NUM_ERRORS],
}

impl ErrorTally {
    pub fn new() -> Self {
        Self {
            counts: [0; NUM_ERRORS],
        }
    }

    /// Accumulate one event's error set.
    pub fn record(&mut self, errors: &ErrorSet) {
        for kind in errors.iter_set() {
            self.counts[kind.slot()] += 1;
        }
    }

    /// Raise a run-level error once.
    pub fn record_run_level(&mut self, kind: ErrorKind) {
        self.counts[kind.slot()] += 1;
    }

    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.counts[kind.slot()]
    }

    /// Total errors, excluding the counter-mismatch slots that fire on
    /// every event of a normal run.
    pub fn total_errors(&self) -> u64 {
        (1..NUM_ERRORS)
            .filter(|slot| !ALWAYS_PRESENT.contains(slot))
            .map(|slot| self.counts[slot])
            .sum()
    }

    /// Serious errors: the reset/jump/desync kinds plus a dead LED.
    pub fn serious_errors(&self) -> u64 {
        let event_level: u64 = ErrorKind::SERIOUS.iter().map(|&slot| self.counts[slot]).sum();
        event_level + self.count(ErrorKind::BadPeriodicSignal)
    }

    /// Whether this event's error set contains anything worth logging
    /// immediately.
    pub fn is_serious(errors: &ErrorSet) -> bool {
        ErrorKind::SERIOUS.iter().any(|&slot| errors.get_slot(slot))
    }
}

impl Default for ErrorTally {
    fn default() -> Self {
        Self::new()
    }
}

/// Log the diagnostic detail for an event carrying serious errors. Mirrors
/// what operators need to chase a desync or counter fault: packet indices,
/// counter values, and both clock readings for this event and its
/// predecessor.
pub fn log_serious_event(
    event: &EventRecord,
    prev: &EventRecord,
    errors: &ErrorSet,
    sbc_time_s: f64,
) {
    warn!(entry = event.entry, "serious errors found in entry");
    for kind in errors.iter_set() {
        match kind {
            ErrorKind::MissingPacket => warn!(
                scaler_index = event.scaler_index,
                scaler_time = event.scaler_time_s,
                sbc_time = event.sbc_time_s,
                "missing packet"
            ),
            ErrorKind::Qdc1IndexDrift => warn!(
                scaler_index = event.scaler_index,
                qdc1_index = event.qdc1_index,
                prev_scaler_index = prev.scaler_index,
                prev_qdc1_index = prev.qdc1_index,
                "QDC1 and scaler packet indexes differ by more than 2"
            ),
            ErrorKind::Qdc2IndexDrift => warn!(
                scaler_index = event.scaler_index,
                qdc2_index = event.qdc2_index,
                prev_scaler_index = prev.scaler_index,
                prev_qdc2_index = prev.qdc2_index,
                "QDC2 and scaler packet indexes differ by more than 2"
            ),
            ErrorKind::ClockDesync => warn!(
                delta_t = event.scaler_time_s - sbc_time_s,
                scaler_delta_t = event.scaler_time_s - prev.scaler_time_s,
                scaler_index = event.scaler_index,
                prev_scaler_index = prev.scaler_index,
                scaler_time = event.scaler_time_s,
                sbc_time = sbc_time_s,
                "scaler/SBC desync"
            ),
            ErrorKind::ScalerCountReset => warn!(
                scaler_index = event.scaler_index,
                sec = event.sec,
                prev_sec = prev.sec,
                "scaler event count reset"
            ),
            ErrorKind::ScalerCountJump => warn!(
                scaler_index = event.scaler_index,
                sec = event.sec,
                prev_sec = prev.sec,
                "scaler event count jump"
            ),
            ErrorKind::Qdc1CountReset => warn!(
                scaler_index = event.scaler_index,
                qec1 = event.qec1,
                prev_qec1 = prev.qec1,
                "QDC1 event count reset"
            ),
            ErrorKind::Qdc1CountJump => warn!(
                qdc1_index = event.qdc1_index,
                qec1 = event.qec1,
                prev_qec1 = prev.qec1,
                "QDC1 event count jump"
            ),
            ErrorKind::Qdc2CountReset => warn!(
                scaler_index = event.scaler_index,
                qec2 = event.qec2,
                prev_qec2 = prev.qec2,
                "QDC2 event count reset"
            ),
            ErrorKind::Qdc2CountJump => warn!(
                qdc2_index = event.qdc2_index,
                qec2 = event.qec2,
                prev_qec2 = prev.qec2,
                "QDC2 event count jump"
            ),
            _ => {}
        }
    }
}

/// Log the end-of-run error report.
pub fn log_run_report(
    run: u32,
    n_entries: u64,
    tally: &ErrorTally,
    duration_s: f64,
    livetime_s: f64,
    periodic: &PeriodicSignalStats,
) {
    let serious = tally.serious_errors();
    info!(run, serious, "veto error report");
    if serious == 0 {
        return;
    }

    info!(total = tally.total_errors(), "total errors");
    if duration_s != livetime_s {
        warn!(
            duration = duration_s,
            livetime = livetime_s,
            "run duration does not match live time"
        );
    }

    for slot in 1..NUM_ERRORS {
        let count = tally.counts[slot];
        if count == 0 {
            continue;
        }
        let kind = ErrorKind::from_slot(slot);
        if kind == ErrorKind::BadPeriodicSignal {
            warn!(
                frequency_hz = periodic.frequency_hz,
                period_s = periodic.period_s,
                "bad LED rate"
            );
            if let Some(expected) = periodic.expected_pulses(duration_s) {
                if expected.abs_diff(periodic.simple_count) > 5 {
                    warn!(
                        observed = periodic.simple_count,
                        expected, "LED pulse count does not match the measured rate"
                    );
                }
            }
        } else {
            let percent = 100.0 * count as f64 / n_entries.max(1) as f64;
            info!(?kind, slot, count, percent, "error tally");
        }
    }
    info!(
        serious_slots = ?ErrorKind::SERIOUS,
        "please report serious errors to the veto group"
    );
}
