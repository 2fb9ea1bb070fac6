//! Channel Threshold Calibration
//!
//! Finds the QDC pedestal location in each channel from a pre-scan over the
//! full run, then sets a software threshold a fixed margin above it. The
//! pedestal is approximated as the modal amplitude bin in a window around the
//! first populated bin; channels with no populated bin get the "pedestal not
//! found" sentinel, channels absent in the run era get the "never fires"
//! sentinel.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::veto::config::RunEra;
use crate::veto::event::{EventRecord, NUM_CHANNELS};

/// QDC counts above the pedestal mode at which the threshold is set.
pub const THRESHOLD_MARGIN: i32 = 35;

/// Sentinel: no pedestal could be located for this channel.
pub const THRESHOLD_NOT_FOUND: i32 = -1;

/// Sentinel: channel is physically absent in this run era.
pub const THRESHOLD_NEVER_FIRES: i32 = 9999;

/// Minimum bin count for the noise-floor search. A bin must exceed this to
/// count as populated.
const NOISE_FLOOR: u32 = 1;

/// Pedestal search window around the first populated bin, in bins.
const PEDESTAL_WINDOW_BELOW: usize = 10;
const PEDESTAL_WINDOW_ABOVE: usize = 50;

/// Fine histogram range for pedestal finding: 500 one-count bins.
const LOW_BINS: usize = 500;

/// Full-range diagnostic histogram: 420 ten-count bins over [0, 4200).
const FULL_BINS: usize = 420;
const FULL_BIN_WIDTH: usize = 10;

// =============================================================================
// THRESHOLD SET
// =============================================================================

/// One calibrated software threshold per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelThresholds(pub [i32; NUM_CHANNELS]);

impl ChannelThresholds {
    /// The disabled baseline: threshold 1 everywhere, so every channel with
    /// any signal at all registers a hit. Used only during the calibration
    /// pre-scan.
    pub fn disabled_baseline() -> Self {
        Self([1; NUM_CHANNELS])
    }

    #[inline]
    pub fn get(&self, channel: usize) -> i32 {
        self.0[channel]
    }

    /// Count of channels whose amplitude exceeds their threshold. The
    /// sentinels compose naturally: -1 accepts every reading, 9999 rejects
    /// every physical reading.
    pub fn multiplicity(&self, event: &EventRecord) -> u32 {
        event
            .qdc
            .iter()
            .zip(self.0.iter())
            .filter(|(&qdc, &thresh)| (qdc as i32) > thresh)
            .count() as u32
    }

    /// Whether a single channel is over threshold.
    #[inline]
    pub fn channel_hit(&self, event: &EventRecord, channel: usize) -> bool {
        (event.qdc[channel] as i32) > self.0[channel]
    }

    /// Number of channels carrying the "pedestal not found" sentinel.
    pub fn not_found_count(&self) -> usize {
        self.0.iter().filter(|&&t| t == THRESHOLD_NOT_FOUND).count()
    }
}

impl Default for ChannelThresholds {
    fn default() -> Self {
        Self::disabled_baseline()
    }
}

// =============================================================================
// CALIBRATOR
// =============================================================================

/// Accumulates per-channel amplitude distributions across the pre-scan and
/// derives the threshold set.
pub struct ChannelCalibrator {
    low: Vec<[u32; LOW_BINS]>,
    full: Vec<[u32; FULL_BINS]>,
    era: RunEra,
    events_seen: u64,
}

impl ChannelCalibrator {
    pub fn new(era: RunEra) -> Self {
        Self {
            low: vec![[0; LOW_BINS]; NUM_CHANNELS],
            full: vec![[0; FULL_BINS]; NUM_CHANNELS],
            era,
            events_seen: 0,
        }
    }

    /// Accumulate one structurally-valid event into the distributions.
    pub fn fill(&mut self, event: &EventRecord) {
        for (channel, &qdc) in event.qdc.iter().enumerate() {
            let q = qdc as usize;
            if q < LOW_BINS {
                self.low[channel][q] += 1;
            }
            let full_bin = q / FULL_BIN_WIDTH;
            if full_bin < FULL_BINS {
                self.full[channel][full_bin] += 1;
            }
        }
        self.events_seen += 1;
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Derive the threshold for every channel.
    pub fn find_thresholds(&self) -> ChannelThresholds {
        let mut thresholds = [THRESHOLD_NOT_FOUND; NUM_CHANNELS];
        for channel in 0..NUM_CHANNELS {
            thresholds[channel] = self.find_channel_threshold(channel);
            debug!(
                channel,
                threshold = thresholds[channel],
                "calibrated channel threshold"
            );
        }
        ChannelThresholds(thresholds)
    }

    fn find_channel_threshold(&self, channel: usize) -> i32 {
        if self.era.channel_absent(channel) {
            return THRESHOLD_NEVER_FIRES;
        }

        let hist = &self.low[channel];
        let first = match hist.iter().position(|&count| count > NOISE_FLOOR) {
            Some(bin) => bin,
            None => return THRESHOLD_NOT_FOUND,
        };

        // Modal bin in the pedestal window approximates the pedestal.
        let lo = first.saturating_sub(PEDESTAL_WINDOW_BELOW);
        let hi = (first + PEDESTAL_WINDOW_ABOVE).min(LOW_BINS - 1);
        let pedestal_bin = (lo..=hi)
            .max_by_key(|&bin| (hist[bin], std::cmp::Reverse(bin)))
            .unwrap_or(first);

        // Bin center of a one-count bin is bin + 0.5; the margin lands the
        // integer threshold at pedestal + margin.
        let center = pedestal_bin as f64 + 0.5;
        (center + THRESHOLD_MARGIN as f64) as i32
    }

    /// Full-range amplitude distribution for one channel, for the summary.
    pub fn full_distribution(&self, channel: usize) -> &[u32; FULL_BINS] {
        &self.full[channel]
    }
}

// =============================================================================
// MULTIPLICITY DISTRIBUTION
// =============================================================================

/// Hit-multiplicity distribution from the second pre-scan, diagnostic only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplicityDistribution {
    /// counts[m] = number of events with multiplicity m.
    pub counts: Vec<u64>,
}

impl MultiplicityDistribution {
    pub fn new() -> Self {
        Self {
            counts: vec![0; NUM_CHANNELS + 1],
        }
    }

    pub fn fill(&mut self, multiplicity: u32) {
        let m = (multiplicity as usize).min(NUM_CHANNELS);
        self.counts[m] += 1;
    }

    /// Number of events with at least one channel over threshold.
    pub fn events_above_zero(&self) -> u64 {
        self.counts[1..].iter().sum()
    }
}

impl Default for MultiplicityDistribution {
    fn default() -> Self {
        Self::new()
    }
}
