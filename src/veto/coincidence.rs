//! Plane Mapping and Muon Coincidence Classification
//!
//! Maps the 32 readout channels onto the 12 logical detector planes and
//! classifies the geometry of events that survive the energy and time cuts.
//! Classification is a pure function of the 12-plane hit vector.

use serde::{Deserialize, Serialize};

use crate::veto::event::{EventRecord, NUM_CHANNELS, NUM_PLANES};
use crate::veto::thresholds::ChannelThresholds;

/// Absolute QDC value a channel must exceed to count toward the energy cut.
/// Independent of the calibrated thresholds.
pub const ENERGY_CUT_QDC: u16 = 500;

/// Channels over [`ENERGY_CUT_QDC`] required for the energy cut to pass.
pub const ENERGY_CUT_CHANNELS: usize = 2;

/// Margin below the highest observed multiplicity at which the LED
/// multiplicity cut is placed.
pub const LED_MULTIPLICITY_MARGIN: u32 = 5;

// =============================================================================
// PLANES
// =============================================================================

/// One of the 12 logical detector planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Plane {
    LowerBottom = 0,
    UpperBottom = 1,
    InnerTop = 2,
    OuterTop = 3,
    InnerNorth = 4,
    OuterNorth = 5,
    InnerSouth = 6,
    OuterSouth = 7,
    InnerWest = 8,
    OuterWest = 9,
    InnerEast = 10,
    OuterEast = 11,
}

impl Plane {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Fixed channel-to-plane lookup. Channels with no physical panel in a slot
/// would map to `None`; the current cabling assigns every channel.
pub const PLANE_MAP: [Option<Plane>; NUM_CHANNELS] = {
    use Plane::*;
    [
        Some(LowerBottom), // 0
        Some(LowerBottom), // 1
        Some(LowerBottom), // 2
        Some(LowerBottom), // 3
        Some(LowerBottom), // 4
        Some(LowerBottom), // 5
        Some(UpperBottom), // 6
        Some(UpperBottom), // 7
        Some(UpperBottom), // 8
        Some(UpperBottom), // 9
        Some(UpperBottom), // 10
        Some(UpperBottom), // 11
        Some(InnerWest),   // 12
        Some(InnerWest),   // 13
        Some(OuterWest),   // 14
        Some(OuterNorth),  // 15
        Some(OuterNorth),  // 16
        Some(OuterTop),    // 17
        Some(OuterTop),    // 18
        Some(InnerNorth),  // 19
        Some(InnerTop),    // 20
        Some(InnerTop),    // 21
        Some(OuterWest),   // 22
        Some(InnerNorth),  // 23
        Some(InnerSouth),  // 24
        Some(OuterSouth),  // 25
        Some(InnerSouth),  // 26
        Some(OuterSouth),  // 27
        Some(InnerEast),   // 28
        Some(OuterEast),   // 29
        Some(InnerEast),   // 30
        Some(OuterEast),   // 31
    ]
};

/// Per-plane hit summary for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneHits {
    /// Plane registered at least one channel over threshold.
    pub hit: [bool; NUM_PLANES],
    /// Channels over threshold per plane.
    pub counts: [u8; NUM_PLANES],
}

impl PlaneHits {
    /// Map an event's over-threshold channels onto planes.
    pub fn from_event(event: &EventRecord, thresholds: &ChannelThresholds) -> Self {
        let mut hits = PlaneHits::default();
        for channel in 0..NUM_CHANNELS {
            if thresholds.channel_hit(event, channel) {
                if let Some(plane) = PLANE_MAP[channel] {
                    hits.hit[plane.index()] = true;
                    hits.counts[plane.index()] += 1;
                }
            }
        }
        hits
    }

    /// Number of distinct planes with at least one hit, 0..=12.
    pub fn hit_count(&self) -> u32 {
        self.hit.iter().filter(|&&h| h).count() as u32
    }
}

// =============================================================================
// CUTS
// =============================================================================

/// Energy cut: at least two channels over the absolute muon QDC threshold.
pub fn energy_cut(event: &EventRecord) -> bool {
    event
        .qdc
        .iter()
        .filter(|&&q| q > ENERGY_CUT_QDC)
        .count()
        >= ENERGY_CUT_CHANNELS
}

/// Time cut, really an LED cut: the event's multiplicity sits below the LED
/// band, or the LED is known to be off for the whole run (in which case every
/// event passes).
pub fn time_cut(multiplicity: u32, multip_threshold: u32, led_off: bool) -> bool {
    led_off || multiplicity < multip_threshold
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Geometric type of a muon candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoincidenceType {
    /// Not a candidate (cuts failed, or fewer than 2 planes hit).
    None,
    /// 2+ planes hit without a recognized pair geometry.
    TwoPlus,
    /// Both bottom planes and both top planes hit.
    Vertical,
    /// Both bottom planes plus one full lateral pair.
    SideBottom,
    /// Both top planes plus one full lateral pair.
    TopSides,
    /// Two or more of vertical / side+bottom / top+sides hold at once.
    Compound,
}

impl CoincidenceType {
    pub fn label(self) -> &'static str {
        match self {
            CoincidenceType::None => "none",
            CoincidenceType::TwoPlus => "2+ planes",
            CoincidenceType::Vertical => "vertical",
            CoincidenceType::SideBottom => "side+bottom",
            CoincidenceType::TopSides => "top+sides",
            CoincidenceType::Compound => "compound",
        }
    }
}

/// Classify the plane-hit vector of an event that already passed both cuts.
/// Pure: identical hit vectors always yield identical types.
pub fn classify_coincidence(hit: &[bool; NUM_PLANES]) -> CoincidenceType {
    let bottom = hit[Plane::LowerBottom.index()] && hit[Plane::UpperBottom.index()];
    let top = hit[Plane::InnerTop.index()] && hit[Plane::OuterTop.index()];
    let lateral = (hit[Plane::InnerNorth.index()] && hit[Plane::OuterNorth.index()])
        || (hit[Plane::InnerSouth.index()] && hit[Plane::OuterSouth.index()])
        || (hit[Plane::InnerWest.index()] && hit[Plane::OuterWest.index()])
        || (hit[Plane::InnerEast.index()] && hit[Plane::OuterEast.index()]);

    let vertical = bottom && top;
    let side_bottom = bottom && lateral;
    let top_sides = top && lateral;

    let matched = [vertical, side_bottom, top_sides]
        .iter()
        .filter(|&&m| m)
        .count();

    if matched >= 2 {
        CoincidenceType::Compound
    } else if vertical {
        CoincidenceType::Vertical
    } else if side_bottom {
        CoincidenceType::SideBottom
    } else if top_sides {
        CoincidenceType::TopSides
    } else if hit.iter().filter(|&&h| h).count() >= 2 {
        CoincidenceType::TwoPlus
    } else {
        CoincidenceType::None
    }
}
