//! Integration tests for the run processor
//!
//! Builds synthetic runs as in-memory feeds and drives the full four-pass
//! pipeline over them, checking the calibrated thresholds, LED statistics,
//! clock handling and muon tagging end to end.

use vetoscan_backend::veto::coincidence::CoincidenceType;
use vetoscan_backend::veto::config::RunConfig;
use vetoscan_backend::veto::event::{ErrorKind, EventRecord, NUM_CHANNELS};
use vetoscan_backend::veto::feed::VecFeed;
use vetoscan_backend::veto::orchestrator::process_runs;
use vetoscan_backend::{RunOutput, RunProcessor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A clean event: flat pedestal at QDC 50, scaler at 2 s per entry, SBC
/// offset by 100 s, all hardware counters in step.
fn clean_event(run: u32, entry: i64) -> EventRecord {
    let t = entry as f64 * 2.0;
    EventRecord {
        qdc: [50; NUM_CHANNELS],
        scaler_time_s: t,
        sbc_time_s: t + 100.0,
        sec: entry + 1,
        qec1: entry + 1,
        qec2: entry + 1,
        scaler_index: 3 * entry,
        qdc1_index: 3 * entry + 1,
        qdc2_index: 3 * entry + 2,
        run,
        entry,
        ..EventRecord::default()
    }
}

/// 200 entries over 400 s: pedestal background, 30 LED pulses at 2 s spacing
/// starting at entry 10, and one vertical muon at entry 100.
fn nominal_run() -> (RunConfig, VecFeed) {
    let run = 10_000;
    let mut events: Vec<EventRecord> = (0..200).map(|i| clean_event(run, i)).collect();

    for entry in 10..40 {
        events[entry].qdc = [600; NUM_CHANNELS];
    }
    // Lower bottom, upper bottom, inner top, outer top: 8 channels, below
    // the LED multiplicity band.
    for &channel in &[0usize, 1, 6, 7, 17, 18, 20, 21] {
        events[100].qdc[channel] = 600;
    }

    (RunConfig::new(run, 0, 400), VecFeed::new("nominal", events))
}

fn process(config: RunConfig, mut feed: VecFeed) -> RunOutput {
    RunProcessor::new(config)
        .process(&mut feed)
        .expect("processing failed")
}

#[test]
fn nominal_run_summary() {
    init_tracing();
    let (config, feed) = nominal_run();
    let out = process(config, feed);
    let s = &out.summary;

    assert_eq!(s.run, 10_000);
    assert_eq!(s.n_entries, 200);
    assert_eq!(out.events.len(), 200);

    // Pedestal at 50 plus the fixed margin.
    for channel in 0..NUM_CHANNELS {
        assert_eq!(s.thresholds.get(channel), 85, "channel {}", channel);
    }
    assert_eq!(s.thresholds_not_found, 0);

    // LED pulses light up all 32 channels; the cut sits 5 below.
    assert_eq!(s.highest_multiplicity, 32);
    assert_eq!(s.multip_threshold, 27);

    // 30 pulses at exactly 2 s spacing.
    assert_eq!(s.periodic.simple_count, 30);
    assert!((s.periodic.frequency_hz - 0.5).abs() < 1e-6);
    assert!((s.periodic.period_s - 2.0).abs() < 1e-6);
    assert!(!s.periodic.led_off);

    // First-good event is entry 1 (entry 0 has scaler time 0), so 2 s of
    // the nominal 400 are dead.
    assert!((s.duration_s - 400.0).abs() < 1e-9);
    assert!((s.livetime_s - 398.0).abs() < 1e-9);
    assert!((s.sbc_offset_s - 100.0).abs() < 1e-9);

    assert_eq!(s.serious_errors, 0);
    assert_eq!(s.skipped_emission, 0);
}

#[test]
fn nominal_run_event_tagging() {
    init_tracing();
    let (config, feed) = nominal_run();
    let out = process(config, feed);

    assert!(out.events.iter().all(|e| !e.bad_event));

    // Exactly the 30 LED pulses are tagged periodic, and only the first of
    // them carries the first-pulse flag.
    let periodic: Vec<i64> = out
        .events
        .iter()
        .filter(|e| e.cuts.is_periodic)
        .map(|e| e.entry)
        .collect();
    assert_eq!(periodic, (10..40).collect::<Vec<i64>>());
    let first: Vec<i64> = out
        .events
        .iter()
        .filter(|e| e.cuts.first_periodic)
        .map(|e| e.entry)
        .collect();
    assert_eq!(first, vec![10]);

    // LED pulses fail the time cut, background passes it.
    assert!(!out.events[20].cuts.time_cut);
    assert!(out.events[50].cuts.time_cut);
    // LED pulses never classify as muons even though they dump charge
    // everywhere.
    assert!(out.events[10..40]
        .iter()
        .all(|e| e.coincidence == CoincidenceType::None));

    // The one planted muon: both cuts pass and the geometry is vertical.
    let muon = &out.events[100];
    assert_eq!(muon.multiplicity, 8);
    assert!(muon.cuts.energy_cut);
    assert!(muon.cuts.time_cut);
    assert_eq!(muon.coincidence, CoincidenceType::Vertical);
    assert_eq!(muon.plane_hit_count, 4);

    let candidates = out
        .events
        .iter()
        .filter(|e| e.coincidence != CoincidenceType::None)
        .count();
    assert_eq!(candidates, 1);
}

#[test]
fn scaler_jump_is_flagged_and_corrected() {
    init_tracing();
    let run = 10_000;
    // 100 entries at 1 s spacing; the scaler jumps forward 9.8 s at entry 50
    // and stays jumped, while the SBC keeps its pace.
    let events: Vec<EventRecord> = (0..100)
        .map(|entry| {
            let mut e = clean_event(run, entry);
            let t = entry as f64;
            e.scaler_time_s = if entry >= 50 { t + 9.8 } else { t };
            e.sbc_time_s = t + 100.0;
            e
        })
        .collect();
    let mut feed = VecFeed::new("jump", events);
    let out = RunProcessor::new(RunConfig::new(run, 0, 100))
        .process(&mut feed)
        .expect("processing failed");

    // Only the jump entry itself desyncs; afterwards both clocks advance in
    // step again.
    assert_eq!(out.summary.error_tally.count(ErrorKind::ClockDesync), 1);
    assert_eq!(out.summary.skipped_emission, 1);

    let jump = &out.events[50];
    assert!(jump.bad_event);
    assert!(jump.errors.get(ErrorKind::ClockDesync));
    assert!((jump.time_s - 50.0).abs() < 1e-9);

    // Recovery pins later events to the SBC pace; the raw scaler would say
    // 60.8 here.
    let later = &out.events[60];
    assert!(!later.bad_event);
    assert!((later.time_s - 60.0).abs() < 1e-9);
    assert!(later.cuts.approx_time);
    assert!(later.errors.get(ErrorKind::ApproxTimeUsed));

    // Before the jump, times come straight from the scaler.
    let before = &out.events[49];
    assert!((before.time_s - 49.0).abs() < 1e-9);
    assert!(!before.cuts.approx_time);
}

#[test]
fn corrupt_stop_time_repairs_duration_from_last_good_timestamp() {
    init_tracing();
    let run = 10_000;
    let events: Vec<EventRecord> = (0..100).map(|i| clean_event(run, i)).collect();
    let mut feed = VecFeed::new("corrupt-stop", events);
    // Stop precedes start: the run record's duration is garbage.
    let out = RunProcessor::new(RunConfig::new(run, 100, 50))
        .process(&mut feed)
        .expect("processing failed");

    // Repaired from the last good scaler timestamp (entry 99 at 198 s).
    assert!((out.summary.duration_s - 198.0).abs() < 1e-9);
    // First-good event is entry 1 at 2 s.
    assert!((out.summary.livetime_s - 196.0).abs() < 1e-9);
    assert_eq!(out.events.len(), 100);
}

#[test]
fn missing_packet_reanchors_first_good_event() {
    init_tracing();
    let run = 10_000;
    // SBC-scaler offset changes from 100 s to 110 s at entry 5, which also
    // arrives with a broken packet. The clock offset must come from the
    // first unbroken record after the gap, not from before it.
    let events: Vec<EventRecord> = (0..50)
        .map(|entry| {
            let mut e = clean_event(run, entry);
            if entry >= 5 {
                e.sbc_time_s = e.scaler_time_s + 110.0;
            }
            if entry == 5 {
                e.structural.set(1, true);
            }
            e
        })
        .collect();
    let mut feed = VecFeed::new("broken-packet", events);
    let out = RunProcessor::new(RunConfig::new(run, 0, 100))
        .process(&mut feed)
        .expect("processing failed");

    // Anchored at entry 6 (scaler 12 s, SBC 122 s), not at entry 1.
    assert!((out.summary.sbc_offset_s - 110.0).abs() < 1e-9);
    // Livetime loses everything before the re-anchored first-good event.
    assert!((out.summary.livetime_s - 88.0).abs() < 1e-9);

    assert!(out.events[5].bad_event);
    assert_eq!(out.summary.skipped_emission, 1);

    // Events after the gap keep clean scaler times under the new offset.
    let later = &out.events[10];
    assert!((later.time_s - 20.0).abs() < 1e-9);
    assert!((later.sbc_time_s - 20.0).abs() < 1e-9);
    assert!(!later.cuts.approx_time);
}

#[test]
fn run_without_led_flags_bad_periodic_signal() {
    init_tracing();
    let run = 10_000;
    // Pure pedestal: nothing ever qualifies as an LED pulse.
    let events: Vec<EventRecord> = (0..150).map(|i| clean_event(run, i)).collect();
    let mut feed = VecFeed::new("dark", events);
    let out = RunProcessor::new(RunConfig::new(run, 0, 300))
        .process(&mut feed)
        .expect("processing failed");

    assert!(out.summary.periodic.led_off);
    assert_eq!(
        out.summary.error_tally.count(ErrorKind::BadPeriodicSignal),
        1
    );
    // With the LED known off, the time cut passes everything.
    assert!(out.events.iter().all(|e| e.cuts.time_cut));
    assert!(out.events.iter().all(|e| !e.cuts.is_periodic));
}

#[test]
fn validation_only_skips_event_output() {
    init_tracing();
    let (config, feed) = nominal_run();
    let out = process(config.validation_only(), feed);
    assert!(out.events.is_empty());
    assert_eq!(out.summary.n_entries, 200);
    assert_eq!(out.summary.multip_threshold, 27);
}

#[test]
fn empty_run_is_an_error() {
    init_tracing();
    let mut feed = VecFeed::new("empty", Vec::new());
    let result = RunProcessor::new(RunConfig::new(10_000, 0, 100)).process(&mut feed);
    assert!(result.is_err());
}

#[test]
fn output_records_serialize_to_json() {
    init_tracing();
    let (config, feed) = nominal_run();
    let out = process(config, feed);

    let summary = serde_json::to_value(&out.summary).expect("summary should serialize");
    assert_eq!(summary["run"], 10_000);
    assert_eq!(summary["multip_threshold"], 27);

    let muon = serde_json::to_value(&out.events[100]).expect("event should serialize");
    assert_eq!(muon["coincidence"], "Vertical");
    assert_eq!(muon["entry"], 100);
}

#[test]
fn runs_process_independently_in_parallel() {
    init_tracing();
    let jobs: Vec<(RunConfig, VecFeed)> = (0..4)
        .map(|i| {
            let (mut config, feed) = nominal_run();
            config.run += i;
            (config, feed)
        })
        .collect();
    let outputs = process_runs(jobs);
    assert_eq!(outputs.len(), 4);
    for (i, out) in outputs.into_iter().enumerate() {
        let out = out.expect("processing failed");
        assert_eq!(out.summary.run, 10_000 + i as u32);
        assert_eq!(out.events.len(), 200);
    }
}
