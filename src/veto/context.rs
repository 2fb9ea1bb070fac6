//! Run Context
//!
//! All cross-pass mutable state for one run, collected into one explicit
//! value owned by the orchestrator. Nothing here is shared between runs, and
//! the event snapshots are always copies of transient records, never aliases.

use crate::veto::event::EventRecord;
use crate::veto::timing::TimeTable;

/// Cross-pass state for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// First-good event snapshot; anchors the clock offset and the
    /// synchronization checks. Immutable once captured.
    pub first: Option<EventRecord>,
    /// Previous event snapshot, replaced after every event.
    pub prev: EventRecord,
    /// Last event snapshot seen in the most recent pass.
    pub last: EventRecord,
    /// Entry index of the last event processed before the current one.
    pub prev_good_entry: i64,
    /// Estimated time of the last processed event.
    pub prev_good_time: f64,
    /// Scaler time of the first event with a readable timestamp.
    pub first_good_scaler: Option<f64>,
    /// Highest hit multiplicity observed in the survey pass.
    pub highest_multiplicity: u32,
    /// LED multiplicity cut: highest multiplicity minus the fixed margin.
    pub multip_threshold: u32,
    /// Per-entry estimated times and bad-scaler flags.
    pub time_table: TimeTable,
    /// Run duration, seconds; may be repaired from the last good timestamp
    /// when the stop packet is corrupt.
    pub duration: f64,
    /// Live data-taking time, seconds.
    pub livetime: f64,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-pass iteration state. Run-level results (first-good
    /// event, time table, thresholds context) survive across passes.
    pub fn begin_pass(&mut self) {
        self.prev = EventRecord::default();
        self.prev_good_entry = 0;
        self.prev_good_time = 0.0;
    }

    /// End-of-event bookkeeping, identical for every pass: copy the current
    /// record into the snapshots and advance the entry cursor.
    pub fn advance(&mut self, event: &EventRecord, estimated_time: f64) {
        self.prev = event.clone();
        self.last = event.clone();
        self.prev_good_entry = event.entry;
        self.prev_good_time = estimated_time;
    }

    pub fn first_good_entry(&self) -> i64 {
        self.first.as_ref().map_or(-1, |f| f.entry)
    }
}
