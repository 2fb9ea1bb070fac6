//! Clock Reconciliation
//!
//! Produces a best-estimate timestamp for each event from two imperfect
//! sources: the scaler clock (fine-grained, occasionally corrupt) and the SBC
//! clock (coarse, offset from the scaler, only trusted in some run eras).
//!
//! Selection priority per event: good scaler reading, then offset-corrected
//! SBC inside its validity window, then interpolation from the run's time
//! table. A scaler/SBC desync additionally puts the reconciler into an
//! explicit recovery state that pins the estimate to the SBC pace until the
//! clocks re-converge on their own.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::veto::config::RunEra;
use crate::veto::event::EventRecord;

/// The SBC is accurate to microseconds; once the live clock difference is
/// below this, the clocks are considered re-synchronized.
pub const SBC_ACCURACY_S: f64 = 0.001;

// =============================================================================
// TIME TABLE
// =============================================================================

/// Parallel per-entry table of estimated times and bad-scaler flags, built in
/// the survey pass and refined in place by the tally pass. Interpolation for
/// a bad entry averages the nearest good neighbors on both sides.
#[derive(Debug, Clone, Default)]
pub struct TimeTable {
    times: Vec<f64>,
    bad_scaler: Vec<bool>,
}

impl TimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time_s: f64, bad_scaler: bool) {
        self.times.push(time_s);
        self.bad_scaler.push(bad_scaler);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[inline]
    pub fn is_bad(&self, entry: usize) -> bool {
        self.bad_scaler[entry]
    }

    #[inline]
    pub fn time(&self, entry: usize) -> f64 {
        self.times[entry]
    }

    /// Replace an entry's estimate with a more accurate one.
    pub fn refine(&mut self, entry: usize, time_s: f64) {
        self.times[entry] = time_s;
    }

    /// Interpolated time for an entry with a bad scaler: the arithmetic mean
    /// of the nearest good timestamps before and after it. If no good entry
    /// exists after (bad scalers run to end of stream), the backward bound is
    /// used alone rather than averaging against nothing; symmetrically for a
    /// bad run at the start of the stream.
    pub fn interpolate(&self, entry: usize) -> f64 {
        if !self.bad_scaler[entry] {
            return self.times[entry];
        }
        let upper = (entry..self.times.len())
            .find(|&i| !self.bad_scaler[i])
            .map(|i| self.times[i]);
        let lower = (0..=entry)
            .rev()
            .find(|&i| !self.bad_scaler[i])
            .map(|i| self.times[i]);
        match (lower, upper) {
            (Some(lo), Some(up)) => (lo + up) / 2.0,
            (Some(lo), None) => lo,
            (None, Some(up)) => up,
            (None, None) => 0.0,
        }
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Desync recovery state. Entered when the error classifier reports a
/// scaler/SBC desync; left when the live difference between the two clocks
/// drops back below [`SBC_ACCURACY_S`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpState {
    /// Clocks agree; raw selection applies.
    Tracking,
    /// A scaler jump is in progress; estimates are corrected by the recorded
    /// clock difference.
    Recovering,
}

/// Best-estimate timestamp for one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconciledTime {
    /// The best estimate, seconds.
    pub time_s: f64,
    /// Offset-corrected SBC reading, 0.0 when the SBC was not usable.
    pub sbc_time_s: f64,
    /// The estimate did not come from a clean scaler reading.
    pub approximate: bool,
    /// The estimate came from time-table interpolation.
    pub interpolated: bool,
}

/// Stateful per-run clock reconciler.
#[derive(Debug, Clone)]
pub struct ClockReconciler {
    era: RunEra,
    /// SBC minus scaler at the first-good event.
    sbc_offset: f64,
    state: JumpState,
    /// Scaler-minus-SBC difference recorded when the desync was detected.
    recorded_diff: f64,
}

impl ClockReconciler {
    pub fn new(era: RunEra) -> Self {
        Self {
            era,
            sbc_offset: 0.0,
            state: JumpState::Tracking,
            recorded_diff: 0.0,
        }
    }

    /// Establish the clock offset from the run's first-good event. Called
    /// once per run.
    pub fn set_offset_from(&mut self, first: &EventRecord) {
        self.sbc_offset = first.sbc_time_s - first.scaler_time_s;
        debug!(offset = self.sbc_offset, "established SBC clock offset");
    }

    pub fn sbc_offset(&self) -> f64 {
        self.sbc_offset
    }

    pub fn state(&self) -> JumpState {
        self.state
    }

    /// Raw source selection without desync handling. Used by the tally pass
    /// to refine the time table.
    pub fn select(&self, event: &EventRecord, table: &TimeTable) -> ReconciledTime {
        let mut sbc_time = 0.0;
        let sbc_ok = self.era.sbc_trusted(event.sbc_time_s);

        if !event.bad_scaler {
            if sbc_ok {
                sbc_time = event.sbc_time_s - self.sbc_offset;
            }
            ReconciledTime {
                time_s: event.scaler_time_s,
                sbc_time_s: sbc_time,
                approximate: false,
                interpolated: false,
            }
        } else if sbc_ok {
            sbc_time = event.sbc_time_s - self.sbc_offset;
            ReconciledTime {
                time_s: sbc_time,
                sbc_time_s: sbc_time,
                approximate: true,
                interpolated: false,
            }
        } else {
            ReconciledTime {
                time_s: table.interpolate(event.entry as usize),
                sbc_time_s: 0.0,
                approximate: true,
                interpolated: true,
            }
        }
    }

    /// Full reconciliation with desync recovery, used by the emission pass.
    /// `desync` is the slot-18 result from the error classifier for this
    /// event.
    pub fn reconcile(&mut self, event: &EventRecord, desync: bool, table: &TimeTable) -> ReconciledTime {
        let mut out = self.select(event, table);

        // Recovery only makes sense while the SBC side is live; without it
        // there is no second clock to converge against.
        if out.sbc_time_s != 0.0 {
            let live_diff = event.scaler_time_s - out.sbc_time_s;

            if desync {
                // One bad scaler reading must not corrupt all later
                // timestamps: pin to the SBC pace from here on.
                self.recorded_diff = live_diff;
                self.state = JumpState::Recovering;
                debug!(
                    entry = event.entry,
                    diff = live_diff,
                    "scaler jump detected, entering recovery"
                );
            } else if self.state == JumpState::Recovering && live_diff.abs() < SBC_ACCURACY_S {
                self.state = JumpState::Tracking;
                debug!(entry = event.entry, "clocks re-converged, leaving recovery");
            }

            if self.state == JumpState::Recovering {
                out.time_s -= self.recorded_diff;
                out.approximate = true;
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted_era() -> RunEra {
        RunEra::for_run(10_000)
    }

    fn event(entry: i64, scaler: f64, sbc: f64, bad_scaler: bool) -> EventRecord {
        EventRecord {
            entry,
            scaler_time_s: scaler,
            sbc_time_s: sbc,
            bad_scaler,
            run: 10_000,
            ..EventRecord::default()
        }
    }

    #[test]
    fn good_scaler_wins() {
        let mut rec = ClockReconciler::new(trusted_era());
        rec.set_offset_from(&event(0, 1.0, 101.0, false));
        let table = TimeTable::new();
        let out = rec.reconcile(&event(1, 2.0, 102.0, false), false, &table);
        assert_eq!(out.time_s, 2.0);
        assert_eq!(out.sbc_time_s, 2.0);
        assert!(!out.approximate);
        assert!(!out.interpolated);
    }

    #[test]
    fn bad_scaler_falls_back_to_sbc() {
        let mut rec = ClockReconciler::new(trusted_era());
        rec.set_offset_from(&event(0, 1.0, 101.0, false));
        let table = TimeTable::new();
        let out = rec.reconcile(&event(1, 0.0, 103.5, true), false, &table);
        assert_eq!(out.time_s, 3.5);
        assert!(out.approximate);
        assert!(!out.interpolated);
    }

    #[test]
    fn untrusted_sbc_falls_back_to_interpolation() {
        let era = RunEra::for_run(8000); // SBC never trusted this early
        let mut rec = ClockReconciler::new(era);
        rec.set_offset_from(&event(0, 1.0, 101.0, false));

        let mut table = TimeTable::new();
        table.push(1.0, false);
        table.push(0.0, true);
        table.push(3.0, false);

        let out = rec.reconcile(&event(1, 0.0, 102.0, true), false, &table);
        assert_eq!(out.time_s, 2.0); // mean of 1.0 and 3.0
        assert!(out.interpolated);
    }

    #[test]
    fn interpolation_backward_fallback_at_stream_end() {
        let mut table = TimeTable::new();
        table.push(5.0, false);
        table.push(0.0, true);
        table.push(0.0, true);
        assert_eq!(table.interpolate(2), 5.0);

        let mut head_bad = TimeTable::new();
        head_bad.push(0.0, true);
        head_bad.push(7.0, false);
        assert_eq!(head_bad.interpolate(0), 7.0);
    }

    #[test]
    fn desync_enters_recovery_and_corrects_subsequent_times() {
        let mut rec = ClockReconciler::new(trusted_era());
        rec.set_offset_from(&event(0, 0.0, 100.0, false));
        let table = TimeTable::new();

        // Clocks agree for a while.
        for i in 1..5 {
            let t = i as f64;
            let out = rec.reconcile(&event(i, t, 100.0 + t, false), false, &table);
            assert_eq!(out.time_s, t);
            assert_eq!(rec.state(), JumpState::Tracking);
        }

        // Scaler jumps forward 9.8 s while the SBC keeps its pace.
        let out = rec.reconcile(&event(5, 14.8, 105.0, false), true, &table);
        assert!((out.time_s - 5.0).abs() < 1e-9);
        assert!(out.approximate);
        assert_eq!(rec.state(), JumpState::Recovering);

        // Subsequent events keep the correction applied.
        let out = rec.reconcile(&event(6, 15.8, 106.0, false), false, &table);
        assert!((out.time_s - 6.0).abs() < 1e-9);
        assert!(out.approximate);
        assert_eq!(rec.state(), JumpState::Recovering);

        // Scaler comes back in sync: recovery ends, raw selection resumes.
        let out = rec.reconcile(&event(7, 7.0, 107.0, false), false, &table);
        assert_eq!(out.time_s, 7.0);
        assert!(!out.approximate);
        assert_eq!(rec.state(), JumpState::Tracking);
    }

    #[test]
    fn agreeing_clocks_never_interpolate() {
        let mut rec = ClockReconciler::new(trusted_era());
        rec.set_offset_from(&event(0, 1.0, 101.0, false));
        let table = TimeTable::new();
        for i in 1..100 {
            let t = i as f64;
            let out = rec.reconcile(&event(i, t, 100.0 + t, false), false, &table);
            assert!(!out.interpolated);
            assert!(!out.approximate);
        }
    }
}
