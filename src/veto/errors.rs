//! Event Error Classification
//!
//! Pure classification of one event against the 29-slot error taxonomy.
//! The function compares the current event only to its immediate predecessor
//! snapshot and to the run's first-good event; it never mutates its inputs,
//! so calling it twice with identical inputs yields identical output.
//!
//! Callers use the same function in two modes: the survey/calibration passes
//! act on `skip` (gating mode), the tally pass ignores `skip` and accumulates
//! the returned set (counting mode).

use crate::veto::config::RunEra;
use crate::veto::event::{ErrorKind, ErrorSet, EventRecord};

/// Scaler-vs-SBC disagreement, in seconds, beyond which the clocks are
/// declared desynchronized. The SBC is accurate to well under this.
pub const CLOCK_DESYNC_TOLERANCE_S: f64 = 2.0;

/// Result of classifying one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// The event must be excluded from calibration and survey statistics.
    pub skip: bool,
    /// Full error set for this event.
    pub errors: ErrorSet,
}

/// Classify one event.
///
/// `first` is the run's first-good event snapshot, or `None` while it has not
/// been established; the synchronization checks need the clock offset it
/// anchors and are bypassed until then. `prev` is the previous event snapshot
/// and `prev_good_entry` the entry index of the last event that was processed
/// (good or not) before this one.
pub fn classify(
    current: &EventRecord,
    prev: &EventRecord,
    first: Option<&EventRecord>,
    prev_good_entry: i64,
    era: RunEra,
) -> Classification {
    let mut errors = ErrorSet::new();
    let mut skip = false;

    // Structural flags come pre-decoded; copy them into slots 1-17.
    for slot in 1..18 {
        if current.structural.get(slot) {
            errors.set_slot(slot, true);
            if ErrorKind::BLOCKING_STRUCTURAL.contains(&slot) {
                skip = true;
            }
        }
    }

    // Advisory: this event's time can only come from interpolation.
    if current.bad_scaler && !era.sbc_trusted(current.sbc_time_s) {
        errors.set(ErrorKind::ApproxTimeUsed);
    }

    // Synchronization checks need the clock offset from the first-good
    // event; before it exists only the structural flags are meaningful.
    let first = match first {
        Some(first) if first.entry != -1 => first,
        _ => return Classification { skip, errors },
    };

    let entry = current.entry;
    let past_first = entry > first.entry;

    let sbc_offset = first.sbc_time_s - first.scaler_time_s;
    let sbc_time = current.sbc_time_s - sbc_offset;
    let prev_sbc_time = prev.sbc_time_s - sbc_offset;

    // Slot 18: scaler and SBC clocks have drifted apart since the previous
    // event. Requires both clocks and the offset to be live.
    let scaler_delta = current.scaler_time_s - prev.scaler_time_s;
    let sbc_delta = sbc_time - prev_sbc_time;
    if current.scaler_time_s > 0.0
        && sbc_time > 0.0
        && sbc_offset != 0.0
        && !current.structural.missing_packet()
        && past_first
        && (scaler_delta - sbc_delta).abs() > CLOCK_DESYNC_TOLERANCE_S
    {
        errors.set(ErrorKind::ClockDesync);
    }

    // Slots 19/21/23: a counter read exactly zero mid-run.
    if current.sec == 0 && entry != 0 && past_first {
        errors.set(ErrorKind::ScalerCountReset);
    }
    if current.qec1 == 0 && entry != 0 && past_first && !current.structural.missing_packet() {
        errors.set(ErrorKind::Qdc1CountReset);
    }
    if current.qec2 == 0 && entry != 0 && past_first && !current.structural.missing_packet() {
        errors.set(ErrorKind::Qdc2CountReset);
    }

    // Slots 20/22/24: a counter moved further than the number of stream
    // entries since the last processed event allows.
    let entry_gap = entry - prev_good_entry;
    if (current.sec - prev.sec).abs() > entry_gap && past_first && current.sec != 0 {
        errors.set(ErrorKind::ScalerCountJump);
    }
    if (current.qec1 - prev.qec1).abs() > entry_gap && past_first && current.qec1 != 0 {
        errors.set(ErrorKind::Qdc1CountJump);
    }
    if (current.qec2 - prev.qec2).abs() > entry_gap && past_first && current.qec2 != 0 {
        errors.set(ErrorKind::Qdc2CountJump);
    }

    // Every synchronization slot blocks.
    for slot in ErrorKind::BLOCKING_SYNC {
        if errors.get_slot(slot) {
            skip = true;
        }
    }

    Classification { skip, errors }
}
