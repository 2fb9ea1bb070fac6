//! Veto Event Model
//!
//! Decoded per-event input records and the event-error taxonomy.
//!
//! An [`EventRecord`] is produced by the packet-decoding collaborator; this
//! engine never re-derives structural validity from raw bytes. Records are
//! transient: each one is consumed by a single classification step, and any
//! state that must survive to the next iteration is captured as an explicit
//! copy into the run context, never as an alias.

use serde::{Deserialize, Serialize};

/// Number of readout channels in the veto system.
pub const NUM_CHANNELS: usize = 32;

/// Number of logical detector planes.
pub const NUM_PLANES: usize = 12;

/// Number of error slots. Slot 0 is unused, kept for index parity with the
/// 1-based taxonomy.
pub const NUM_ERRORS: usize = 29;

// =============================================================================
// STRUCTURAL FLAGS
// =============================================================================

/// The 18 structural-integrity flags computed by the decoder.
///
/// Slot 0 is unused. The engine copies these verbatim into error slots 1-17
/// and only inspects two of them directly: `missing_packet` (slot 1) gates
/// the synchronization checks, `bad_timestamp` (slot 4) gates first-good
/// event selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralFlags(pub [bool; 18]);

impl StructuralFlags {
    pub fn none() -> Self {
        Self([false; 18])
    }

    #[inline]
    pub fn get(&self, slot: usize) -> bool {
        self.0[slot]
    }

    #[inline]
    pub fn set(&mut self, slot: usize, value: bool) {
        self.0[slot] = value;
    }

    /// Slot 1: fewer than 32 channel readings were present in the packet.
    #[inline]
    pub fn missing_packet(&self) -> bool {
        self.0[1]
    }

    /// Slot 4: the scaler timestamp read back as all-ones.
    #[inline]
    pub fn bad_timestamp(&self) -> bool {
        self.0[4]
    }
}

// =============================================================================
// EVENT RECORD
// =============================================================================

/// One decoded veto event, as handed over by the decoding collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Raw QDC amplitude per channel.
    pub qdc: [u16; NUM_CHANNELS],
    /// Primary (scaler) clock reading, seconds since run start.
    pub scaler_time_s: f64,
    /// Auxiliary (SBC) clock reading, raw seconds. Coarser and less
    /// reliable than the scaler; only trusted inside its validity window.
    pub sbc_time_s: f64,
    /// Scaler event counter.
    pub sec: i64,
    /// QDC 1 event counter.
    pub qec1: i64,
    /// QDC 2 event counter.
    pub qec2: i64,
    /// ORCA packet index of the scaler record.
    pub scaler_index: i64,
    /// ORCA packet index of the QDC 1 record.
    pub qdc1_index: i64,
    /// ORCA packet index of the QDC 2 record.
    pub qdc2_index: i64,
    /// Run number this event belongs to.
    pub run: u32,
    /// Position of this event in the input stream.
    pub entry: i64,
    /// Pre-decoded structural-integrity flags.
    pub structural: StructuralFlags,
    /// Scaler timestamp was unreadable or corrupt.
    pub bad_scaler: bool,
}

impl EventRecord {
    /// Total QDC over all channels. Diagnostic only.
    pub fn total_qdc(&self) -> u32 {
        self.qdc.iter().map(|&q| q as u32).sum()
    }
}

impl Default for EventRecord {
    fn default() -> Self {
        Self {
            qdc: [0; NUM_CHANNELS],
            scaler_time_s: 0.0,
            sbc_time_s: 0.0,
            sec: 0,
            qec1: 0,
            qec2: 0,
            scaler_index: 0,
            qdc1_index: 0,
            qdc2_index: 0,
            run: 0,
            entry: -1,
            structural: StructuralFlags::none(),
            bad_scaler: false,
        }
    }
}

// =============================================================================
// ERROR TAXONOMY
// =============================================================================

/// Event and run error kinds, 1-indexed. Slot 0 is reserved so the numeric
/// values line up with the historical taxonomy used by the veto group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorKind {
    Unused0 = 0,
    /// Missing channels (< 32 readings in the event packet).
    MissingPacket = 1,
    /// Extra channels (> 32 readings in the event packet).
    ExtraChannels = 2,
    /// Scaler record only, no QDC data.
    ScalerOnly = 3,
    /// Scaler timestamp read back as all-ones.
    BadTimestamp = 4,
    /// QDC index - scaler index is not 1 or 2.
    QdcIndexGap = 5,
    /// A channel shows up more than once in the packet.
    DuplicateChannel = 6,
    /// Hardware count mismatch (SEC - QEC is not 1 or 2).
    HwCountMismatch = 7,
    /// Run record number does not match the input file.
    RunMismatch = 8,
    /// QDC record failed to decode.
    QdcDecodeFailed = 9,
    /// Scaler event count does not match the stream entry number.
    ScalerEntryMismatch = 10,
    /// Scaler event count does not match the QDC1 event count.
    ScalerQdc1Mismatch = 11,
    /// QDC1 event count does not match the QDC2 event count.
    Qdc1Qdc2Mismatch = 12,
    /// Packet indexes of QDC1 and scaler differ by more than 2.
    Qdc1IndexDrift = 13,
    /// Packet indexes of QDC2 and scaler differ by more than 2.
    Qdc2IndexDrift = 14,
    /// A QDC packet index precedes the scaler index.
    QdcIndexPrecedes = 15,
    /// A QDC packet index equals the scaler index.
    QdcIndexEquals = 16,
    /// An unknown hardware card is present.
    UnknownCard = 17,
    /// Scaler and SBC timestamps have desynchronized.
    ClockDesync = 18,
    /// Scaler event count reset to zero mid-run.
    ScalerCountReset = 19,
    /// Scaler event count incremented by more than the entry gap.
    ScalerCountJump = 20,
    /// QDC1 event count reset to zero mid-run.
    Qdc1CountReset = 21,
    /// QDC1 event count incremented by more than the entry gap.
    Qdc1CountJump = 22,
    /// QDC2 event count reset to zero mid-run.
    Qdc2CountReset = 23,
    /// QDC2 event count incremented by more than the entry gap.
    Qdc2CountJump = 24,
    /// Interpolated or otherwise approximate event time was used. Advisory.
    ApproxTimeUsed = 25,
    /// Run level: LED frequency very low/high, corrupted, or LED off.
    BadPeriodicSignal = 26,
    /// Run level: no pedestal found for a live channel.
    ThresholdNotFound = 27,
    /// Run level: no events above the software threshold.
    NoEventsAboveThreshold = 28,
}

impl ErrorKind {
    /// All kinds in slot order, for tally iteration.
    pub fn all() -> impl Iterator<Item = ErrorKind> {
        (0..NUM_ERRORS as u8).map(|i| ErrorKind::from_slot(i as usize))
    }

    pub fn from_slot(slot: usize) -> ErrorKind {
        use ErrorKind::*;
        match slot {
            0 => Unused0,
            1 => MissingPacket,
            2 => ExtraChannels,
            3 => ScalerOnly,
            4 => BadTimestamp,
            5 => QdcIndexGap,
            6 => DuplicateChannel,
            7 => HwCountMismatch,
            8 => RunMismatch,
            9 => QdcDecodeFailed,
            10 => ScalerEntryMismatch,
            11 => ScalerQdc1Mismatch,
            12 => Qdc1Qdc2Mismatch,
            13 => Qdc1IndexDrift,
            14 => Qdc2IndexDrift,
            15 => QdcIndexPrecedes,
            16 => QdcIndexEquals,
            17 => UnknownCard,
            18 => ClockDesync,
            19 => ScalerCountReset,
            20 => ScalerCountJump,
            21 => Qdc1CountReset,
            22 => Qdc1CountJump,
            23 => Qdc2CountReset,
            24 => Qdc2CountJump,
            25 => ApproxTimeUsed,
            26 => BadPeriodicSignal,
            27 => ThresholdNotFound,
            28 => NoEventsAboveThreshold,
            _ => panic!("error slot out of range: {}", slot),
        }
    }

    #[inline]
    pub fn slot(self) -> usize {
        self as usize
    }

    /// Structural slots that force an event to be skipped.
    pub const BLOCKING_STRUCTURAL: [usize; 8] = [1, 2, 3, 5, 6, 9, 13, 14];

    /// Synchronization slots; all of them force a skip.
    pub const BLOCKING_SYNC: std::ops::RangeInclusive<usize> = 18..=24;

    /// Slots reported loudly in the run error report.
    pub const SERIOUS: [usize; 10] = [1, 13, 14, 18, 19, 20, 21, 22, 23, 24];

    /// Whether this kind forces `skip = true` on the event.
    pub fn is_blocking(self) -> bool {
        let s = self.slot();
        Self::BLOCKING_STRUCTURAL.contains(&s) || Self::BLOCKING_SYNC.contains(&s)
    }
}

// =============================================================================
// ERROR SET
// =============================================================================

/// Fixed-size set of per-event error flags, indexed by [`ErrorKind`].
///
/// Invariants: length is always [`NUM_ERRORS`]; slot 0 is always false;
/// the set is reset before each event is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSet([bool; NUM_ERRORS]);

impl ErrorSet {
    pub fn new() -> Self {
        Self([false; NUM_ERRORS])
    }

    #[inline]
    pub fn set(&mut self, kind: ErrorKind) {
        self.0[kind.slot()] = true;
    }

    #[inline]
    pub fn set_slot(&mut self, slot: usize, value: bool) {
        self.0[slot] = value;
    }

    #[inline]
    pub fn get(&self, kind: ErrorKind) -> bool {
        self.0[kind.slot()]
    }

    #[inline]
    pub fn get_slot(&self, slot: usize) -> bool {
        self.0[slot]
    }

    pub fn clear(&mut self) {
        self.0 = [false; NUM_ERRORS];
    }

    /// Iterate over the kinds currently set.
    pub fn iter_set(&self) -> impl Iterator<Item = ErrorKind> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .map(|(slot, _)| ErrorKind::from_slot(slot))
    }

    /// True if any blocking slot is set.
    pub fn any_blocking(&self) -> bool {
        self.iter_set().any(|k| k.is_blocking())
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&on| !on)
    }
}

impl Default for ErrorSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_set_starts_empty_with_slot0_false() {
        let errors = ErrorSet::new();
        assert!(errors.is_empty());
        assert!(!errors.get(ErrorKind::Unused0));
        assert_eq!(ErrorKind::all().count(), NUM_ERRORS);
    }

    #[test]
    fn blocking_slots_match_taxonomy() {
        assert!(ErrorKind::MissingPacket.is_blocking());
        assert!(ErrorKind::ClockDesync.is_blocking());
        assert!(ErrorKind::Qdc2CountJump.is_blocking());
        assert!(!ErrorKind::BadTimestamp.is_blocking());
        assert!(!ErrorKind::ApproxTimeUsed.is_blocking());
        assert!(!ErrorKind::BadPeriodicSignal.is_blocking());
    }

    #[test]
    fn slot_roundtrip() {
        for slot in 0..NUM_ERRORS {
            assert_eq!(ErrorKind::from_slot(slot).slot(), slot);
        }
    }
}
