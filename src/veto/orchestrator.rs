//! Run Orchestration
//!
//! Drives the four sequential passes over one run's event stream and owns
//! all cross-pass state. The scans are split across separate passes over the
//! same events to keep each check simple; the input feed must therefore
//! replay identically after every `reset()`.
//!
//! ```text
//! Calibrating ──▶ RunSurvey ──▶ ErrorTally ──▶ Emitting ──▶ Done
//!  thresholds      first-good     tallies +      cuts, muon
//!  + multiplicity  event, offset, report         classification,
//!  distribution    LED stats,     (validation-   one output per
//!                  time table     only may stop) input event
//! ```

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::veto::coincidence::{
    classify_coincidence, energy_cut, time_cut, CoincidenceType, PlaneHits,
    LED_MULTIPLICITY_MARGIN,
};
use crate::veto::config::RunConfig;
use crate::veto::context::RunContext;
use crate::veto::errors::classify;
use crate::veto::event::{ErrorKind, ErrorSet, NUM_CHANNELS, NUM_PLANES};
use crate::veto::feed::EventFeed;
use crate::veto::periodic::{
    PeriodicSignalDetector, PeriodicSignalStats, SIMPLE_MULTIPLICITY_THRESHOLD,
};
use crate::veto::report::{self, ErrorTally};
use crate::veto::thresholds::{
    ChannelCalibrator, ChannelThresholds, MultiplicityDistribution, THRESHOLD_NOT_FOUND,
};
use crate::veto::timing::ClockReconciler;

/// The orchestrator's pass state machine. Transitions are strictly
/// sequential; each pass depends on state produced by the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingPass {
    Calibrating,
    RunSurvey,
    ErrorTally,
    Emitting,
    Done,
}

// =============================================================================
// OUTPUT RECORDS
// =============================================================================

/// Cut flags carried on every output event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutFlags {
    /// The LED was off (or its rate unusable) for this whole run.
    pub led_off: bool,
    /// At least two channels over the absolute muon energy threshold.
    pub energy_cut: bool,
    /// The reconciled time is approximate (SBC fallback, interpolation, or
    /// jump recovery).
    pub approx_time: bool,
    /// Multiplicity sits below the LED band; the event is usable as a muon
    /// candidate.
    pub time_cut: bool,
    /// The event is tagged as an LED pulse.
    pub is_periodic: bool,
    /// First LED pulse of the run.
    pub first_periodic: bool,
    /// The LED frequency measurement was unreliable.
    pub bad_frequency: bool,
}

/// One output record per input event; bad events are marked, never dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOutput {
    pub run: u32,
    pub entry: i64,
    /// Best-estimate event time, seconds.
    pub time_s: f64,
    /// Offset-corrected SBC time, 0.0 when the SBC was unusable.
    pub sbc_time_s: f64,
    /// Time since the previous LED pulse.
    pub delta_t_s: f64,
    pub multiplicity: u32,
    pub total_qdc: u32,
    pub qdc: [u16; NUM_CHANNELS],
    pub errors: ErrorSet,
    /// A blocking error excluded this event from all run statistics.
    pub bad_event: bool,
    pub cuts: CutFlags,
    pub coincidence: CoincidenceType,
    pub plane_true: [bool; NUM_PLANES],
    pub plane_hits: [u8; NUM_PLANES],
    pub plane_hit_count: u32,
}

/// Run-level summary exposed to the persistence/reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: u32,
    pub n_entries: u64,
    pub start: i64,
    pub stop: i64,
    pub duration_s: f64,
    pub livetime_s: f64,
    pub sbc_offset_s: f64,
    pub thresholds: ChannelThresholds,
    pub thresholds_not_found: usize,
    pub multiplicity_dist: MultiplicityDistribution,
    pub highest_multiplicity: u32,
    pub multip_threshold: u32,
    pub periodic: PeriodicSignalStats,
    pub error_tally: ErrorTally,
    pub total_errors: u64,
    pub serious_errors: u64,
    pub skipped_calibration: u64,
    pub skipped_survey: u64,
    pub skipped_emission: u64,
}

/// Everything the engine produces for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub summary: RunSummary,
    /// Exactly one record per input event; empty in validation-only mode.
    pub events: Vec<EventOutput>,
}

// =============================================================================
// PROCESSOR
// =============================================================================

/// Four-pass processor for one run. Single-threaded and strictly sequential
/// within the run; parallelism only ever happens across runs.
pub struct RunProcessor {
    config: RunConfig,
}

impl RunProcessor {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Process the run. Fatal conditions (an empty stream) abort before any
    /// pass; per-event faults only ever mark events.
    pub fn process(&self, feed: &mut dyn EventFeed) -> Result<RunOutput> {
        let era = self.config.era();
        let run = self.config.run;

        let n_entries = match feed.len_hint() {
            Some(n) => n as u64,
            None => {
                let mut count = 0u64;
                while feed.next_event().is_some() {
                    count += 1;
                }
                count
            }
        };
        if n_entries == 0 {
            bail!("no veto events in run {} (feed '{}')", run, feed.name());
        }
        info!(run, n_entries, feed = feed.name(), "processing run");

        let mut ctx = RunContext::new();
        let mut pass = ProcessingPass::Calibrating;
        debug!(?pass, "starting pass");

        // ------------------------- Calibrating -------------------------
        // Find the QDC pedestal location in each channel and set a software
        // threshold above it, then re-scan with the found thresholds for the
        // multiplicity distribution.
        let mut calibrator = ChannelCalibrator::new(era);
        let mut skipped_calibration = 0u64;

        feed.reset();
        ctx.begin_pass();
        while let Some(event) = feed.next_event() {
            let cls = classify(&event, &ctx.prev, None, ctx.prev_good_entry, era);
            if cls.skip {
                skipped_calibration += 1;
            } else {
                calibrator.fill(&event);
            }
            ctx.advance(&event, event.scaler_time_s);
        }
        if skipped_calibration > 0 {
            info!(
                skipped = skipped_calibration,
                n_entries, "calibration pre-scan skipped entries"
            );
        }
        let thresholds = calibrator.find_thresholds();

        let mut multiplicity_dist = MultiplicityDistribution::new();
        feed.reset();
        ctx.begin_pass();
        while let Some(event) = feed.next_event() {
            let cls = classify(&event, &ctx.prev, None, ctx.prev_good_entry, era);
            if !cls.skip {
                multiplicity_dist.fill(thresholds.multiplicity(&event));
            }
            ctx.advance(&event, event.scaler_time_s);
        }

        // -------------------------- RunSurvey --------------------------
        // Establish the first-good event, highest multiplicity, SBC offset,
        // LED statistics and the interpolation time table. The classifier
        // gates here: bad events feed none of these.
        pass = ProcessingPass::RunSurvey;
        debug!(?pass, "starting pass");

        ctx.duration = self.config.nominal_duration();
        let mut detector = PeriodicSignalDetector::new();
        let mut last_qualifying_time: Option<f64> = None;
        let mut skipped_survey = 0u64;

        feed.reset();
        ctx.begin_pass();
        while let Some(event) = feed.next_event() {
            debug_assert_eq!(event.entry as usize, ctx.time_table.len());

            let x_time = if !event.bad_scaler {
                event.scaler_time_s
            } else {
                // Placeholder estimate; refined by the tally pass.
                (event.entry as f64 / n_entries as f64) * ctx.duration
            };
            ctx.time_table.push(x_time, event.bad_scaler);

            // A missing packet after the first-good event invalidates it;
            // the offset must anchor on an unbroken record.
            if ctx.first.is_some() && event.structural.missing_packet() {
                ctx.first = None;
            }
            if ctx.first_good_scaler.is_none() && !event.structural.bad_timestamp() {
                ctx.first_good_scaler = Some(event.scaler_time_s);
            }

            let cls = classify(&event, &ctx.prev, ctx.first.as_ref(), ctx.prev_good_entry, era);
            if cls.skip {
                skipped_survey += 1;
                ctx.advance(&event, x_time);
                continue;
            }

            if ctx.first.is_none()
                && event.sbc_time_s > 0.0
                && event.scaler_time_s > 0.0
                && !event.structural.bad_timestamp()
            {
                ctx.first = Some(event.clone());
            }

            let multiplicity = thresholds.multiplicity(&event);
            if multiplicity > ctx.highest_multiplicity {
                ctx.highest_multiplicity = multiplicity;
            }
            if multiplicity > SIMPLE_MULTIPLICITY_THRESHOLD {
                detector.observe(last_qualifying_time.map(|t| x_time - t));
                last_qualifying_time = Some(x_time);
            }

            ctx.advance(&event, x_time);
        }

        // Run-level checks.
        let mut reconciler = ClockReconciler::new(era);
        if let Some(first) = &ctx.first {
            reconciler.set_offset_from(first);
        } else {
            warn!(run, "no first-good event found; clock offset unavailable");
        }

        if ctx.duration <= 0.0 {
            let repaired = ctx.prev_good_time - ctx.first_good_scaler.unwrap_or(0.0);
            warn!(
                raw_duration = ctx.duration,
                start = self.config.start,
                stop = self.config.stop,
                repaired,
                "corrupted duration, falling back to last good timestamp"
            );
            ctx.duration = repaired;
        }
        ctx.livetime = match (&ctx.first, ctx.first_good_scaler) {
            (Some(first), Some(first_scaler)) => {
                ctx.duration - (first.scaler_time_s - first_scaler)
            }
            _ => ctx.duration,
        };
        info!(livetime = ctx.livetime, "veto livetime");

        ctx.multip_threshold = ctx
            .highest_multiplicity
            .saturating_sub(LED_MULTIPLICITY_MARGIN);
        let periodic = detector.finalize(ctx.duration, n_entries);

        // -------------------------- ErrorTally --------------------------
        // Count every error on every event; nothing is skipped from the
        // tally. Also refines the time table in place with the reconciled
        // estimates, so interpolation in the final pass uses the best data.
        pass = ProcessingPass::ErrorTally;
        debug!(?pass, "starting pass");

        let mut tally = ErrorTally::new();
        if periodic.led_off {
            tally.record_run_level(ErrorKind::BadPeriodicSignal);
        }
        let live_not_found = (0..NUM_CHANNELS)
            .filter(|&ch| !era.channel_absent(ch))
            .filter(|&ch| thresholds.get(ch) == THRESHOLD_NOT_FOUND)
            .count();
        if live_not_found > 0 {
            warn!(channels = live_not_found, "no pedestal found for live channels");
            tally.record_run_level(ErrorKind::ThresholdNotFound);
        }
        if multiplicity_dist.events_above_zero() == 0 {
            warn!("no events above the software threshold");
            tally.record_run_level(ErrorKind::NoEventsAboveThreshold);
        }

        feed.reset();
        ctx.begin_pass();
        while let Some(event) = feed.next_event() {
            let cls = classify(&event, &ctx.prev, ctx.first.as_ref(), ctx.prev_good_entry, era);
            tally.record(&cls.errors);

            let rt = reconciler.select(&event, &ctx.time_table);
            ctx.time_table.refine(event.entry as usize, rt.time_s);

            if ErrorTally::is_serious(&cls.errors) {
                report::log_serious_event(&event, &ctx.prev, &cls.errors, rt.sbc_time_s);
            }
            ctx.advance(&event, rt.time_s);
        }

        report::log_run_report(run, n_entries, &tally, ctx.duration, ctx.livetime, &periodic);

        if self.config.validation_only {
            let summary = self.summary(
                n_entries,
                &ctx,
                &reconciler,
                thresholds,
                multiplicity_dist,
                periodic,
                tally,
                skipped_calibration,
                skipped_survey,
                0,
            );
            return Ok(RunOutput {
                summary,
                events: Vec::new(),
            });
        }

        // --------------------------- Emitting ---------------------------
        // Reconcile each event's time, apply the cuts, classify muon
        // candidates, and emit one record per input event.
        pass = ProcessingPass::Emitting;
        debug!(?pass, "starting pass");
        info!(
            highest_multiplicity = ctx.highest_multiplicity,
            multip_threshold = ctx.multip_threshold,
            "scanning for muons"
        );

        let mut events_out: Vec<EventOutput> = Vec::with_capacity(n_entries as usize);
        let mut last_periodic_time = 0.0f64;
        let mut seen_periodic = false;
        let mut skipped_emission = 0u64;

        feed.reset();
        ctx.begin_pass();
        while let Some(event) = feed.next_event() {
            let cls = classify(&event, &ctx.prev, ctx.first.as_ref(), ctx.prev_good_entry, era);
            let desync = cls.errors.get(ErrorKind::ClockDesync);
            let rt = reconciler.reconcile(&event, desync, &ctx.time_table);

            let mut errors = cls.errors;
            if rt.approximate {
                errors.set(ErrorKind::ApproxTimeUsed);
            }

            let multiplicity = thresholds.multiplicity(&event);
            let delta_t_s = rt.time_s - last_periodic_time;

            if cls.skip {
                skipped_emission += 1;
                events_out.push(EventOutput {
                    run,
                    entry: event.entry,
                    time_s: rt.time_s,
                    sbc_time_s: rt.sbc_time_s,
                    delta_t_s,
                    multiplicity,
                    total_qdc: event.total_qdc(),
                    qdc: event.qdc,
                    errors,
                    bad_event: true,
                    cuts: CutFlags {
                        led_off: periodic.led_off,
                        approx_time: rt.approximate,
                        bad_frequency: periodic.unreliable,
                        ..CutFlags::default()
                    },
                    coincidence: CoincidenceType::None,
                    plane_true: [false; NUM_PLANES],
                    plane_hits: [0; NUM_PLANES],
                    plane_hit_count: 0,
                });
                ctx.advance(&event, rt.time_s);
                continue;
            }

            let led_off = periodic.led_off;
            let passes_time = time_cut(multiplicity, ctx.multip_threshold, led_off);
            let passes_energy = energy_cut(&event);

            let is_periodic = !led_off && multiplicity > ctx.multip_threshold;
            let first_periodic = is_periodic && !seen_periodic;
            seen_periodic |= is_periodic;

            let planes = PlaneHits::from_event(&event, &thresholds);
            let coincidence = if passes_time && passes_energy {
                classify_coincidence(&planes.hit)
            } else {
                CoincidenceType::None
            };
            if coincidence != CoincidenceType::None {
                info!(
                    hit_type = coincidence.label(),
                    entry = event.entry,
                    time_s = rt.time_s,
                    total_qdc = event.total_qdc(),
                    multiplicity,
                    led_off,
                    approx_time = rt.approximate,
                    "muon candidate"
                );
            }

            events_out.push(EventOutput {
                run,
                entry: event.entry,
                time_s: rt.time_s,
                sbc_time_s: rt.sbc_time_s,
                delta_t_s,
                multiplicity,
                total_qdc: event.total_qdc(),
                qdc: event.qdc,
                errors,
                bad_event: false,
                cuts: CutFlags {
                    led_off,
                    energy_cut: passes_energy,
                    approx_time: rt.approximate,
                    time_cut: passes_time,
                    is_periodic,
                    first_periodic,
                    bad_frequency: periodic.unreliable,
                },
                coincidence,
                plane_true: planes.hit,
                plane_hits: planes.counts,
                plane_hit_count: planes.hit_count(),
            });

            if is_periodic {
                last_periodic_time = rt.time_s;
            }
            ctx.advance(&event, rt.time_s);
        }

        if skipped_emission > 0 {
            info!(
                skipped = skipped_emission,
                n_entries, "emission pass marked entries as bad"
            );
        }

        pass = ProcessingPass::Done;
        debug!(?pass, "done processing");

        let summary = self.summary(
            n_entries,
            &ctx,
            &reconciler,
            thresholds,
            multiplicity_dist,
            periodic,
            tally,
            skipped_calibration,
            skipped_survey,
            skipped_emission,
        );
        Ok(RunOutput {
            summary,
            events: events_out,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn summary(
        &self,
        n_entries: u64,
        ctx: &RunContext,
        reconciler: &ClockReconciler,
        thresholds: ChannelThresholds,
        multiplicity_dist: MultiplicityDistribution,
        periodic: PeriodicSignalStats,
        tally: ErrorTally,
        skipped_calibration: u64,
        skipped_survey: u64,
        skipped_emission: u64,
    ) -> RunSummary {
        RunSummary {
            run: self.config.run,
            n_entries,
            start: self.config.start,
            stop: self.config.stop,
            duration_s: ctx.duration,
            livetime_s: ctx.livetime,
            sbc_offset_s: reconciler.sbc_offset(),
            thresholds_not_found: thresholds.not_found_count(),
            thresholds,
            multiplicity_dist,
            highest_multiplicity: ctx.highest_multiplicity,
            multip_threshold: ctx.multip_threshold,
            periodic,
            total_errors: tally.total_errors(),
            serious_errors: tally.serious_errors(),
            error_tally: tally,
            skipped_calibration,
            skipped_survey,
            skipped_emission,
        }
    }
}

/// Process several runs in parallel. Runs are fully independent (each owns
/// its context and reconciler); events inside a run stay strictly ordered.
pub fn process_runs<F>(jobs: Vec<(RunConfig, F)>) -> Vec<Result<RunOutput>>
where
    F: EventFeed + Send,
{
    use rayon::prelude::*;
    jobs.into_par_iter()
        .map(|(config, mut feed)| RunProcessor::new(config).process(&mut feed))
        .collect()
}
