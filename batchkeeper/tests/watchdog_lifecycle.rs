//! Watchdog + batch runner lifecycle scenarios.
//!
//! The host runs in-process: a scripted processor that panics stands in for
//! a host dying mid-item, which leaves the ledger exactly as a real crash
//! would (item persisted `InProgress`, sentinel still present).

use std::fs;

use batchkeeper::core::types::ItemStatus;
use batchkeeper::error::{BatchError, find_batch_error};
use batchkeeper::io::qc_notes::QcNotes;
use batchkeeper::io::sentinel::Sentinel;
use batchkeeper::ledger::HOST_DIED_DIAGNOSTIC;
use batchkeeper::test_support::{BatchFixture, InProcessHost, ScriptedProcessor, ScriptedStep};
use batchkeeper::watchdog::{Watchdog, WatchdogStop};

const FIVE: [&str; 5] = [
    "item1.blend",
    "item2.blend",
    "item3.blend",
    "item4.blend",
    "item5.blend",
];

/// Item 3 kills the host on every attempt.
///
/// Launch sequence:
/// 1. items 1, 2 done; item 3 crashes
/// 2. item 3 charged (1), crashes again
/// 3. item 3 charged (2), crashes again
/// 4. item 3 charged (3) -> failed permanently; items 4, 5 done; sentinel removed
#[test]
fn always_crashing_item_is_excluded_after_three_crashes() {
    let fixture = BatchFixture::new(&FIVE).expect("fixture");
    let paths = fixture.paths();
    let processor = ScriptedProcessor::new(Vec::new()).always("item3.blend", ScriptedStep::Crash);
    let host = InProcessHost::new(&fixture, &processor);

    let outcome = Watchdog::new(&host, fixture.watchdog_settings())
        .run(&fixture.launch_request())
        .expect("watchdog");

    assert_eq!(outcome.launches, 4);
    assert_eq!(host.launches(), 4);
    assert_eq!(outcome.stop, WatchdogStop::Completed);
    assert!(!Sentinel::new(&paths.sentinel_path).is_present());
    assert_eq!(
        processor.calls(),
        vec![
            "item1.blend",
            "item2.blend",
            "item3.blend",
            "item3.blend",
            "item3.blend",
            "item4.blend",
            "item5.blend",
        ]
    );

    let state = fixture.read_ledger().expect("ledger");
    for id in ["item1.blend", "item2.blend", "item4.blend", "item5.blend"] {
        let item = state.find(id).expect("item");
        assert_eq!(item.status, ItemStatus::Done, "{id}");
        assert_eq!(item.crash_count, 0, "{id}");
    }
    let crashed = state.find("item3.blend").expect("item3");
    assert_eq!(crashed.status, ItemStatus::FailedPermanent);
    assert_eq!(crashed.crash_count, 3);
    assert_eq!(crashed.last_error.as_deref(), Some(HOST_DIED_DIAGNOSTIC));
    assert_eq!(
        QcNotes::new(&paths.qc_dir)
            .read("item3.blend")
            .expect("note")
            .as_deref(),
        Some(HOST_DIED_DIAGNOSTIC)
    );
}

#[test]
fn ledger_is_balanced_whenever_the_processor_runs() {
    let fixture = BatchFixture::new(&FIVE).expect("fixture");
    let processor = ScriptedProcessor::new(Vec::new())
        .always("item2.blend", ScriptedStep::Fail("bad uv map".to_string()))
        .always("item4.blend", ScriptedStep::Crash)
        .observing(&fixture.paths().ledger_path);
    let host = InProcessHost::new(&fixture, &processor);

    let outcome = Watchdog::new(&host, fixture.watchdog_settings())
        .run(&fixture.launch_request())
        .expect("watchdog");
    assert_eq!(outcome.stop, WatchdogStop::Completed);

    let observed = processor.observed();
    assert_eq!(observed.len(), processor.calls().len());
    for counts in &observed {
        assert!(counts.is_balanced(), "{counts:?}");
        assert_eq!(counts.in_progress, 1);
        assert!(counts.crashes <= 3 * counts.total as u64);
    }
    // Crash totals never go down across the run.
    assert!(observed.windows(2).all(|pair| pair[0].crashes <= pair[1].crashes));

    let final_counts = fixture.read_ledger().expect("ledger").counts();
    assert!(final_counts.is_balanced());
    assert_eq!(final_counts.done, 3);
    assert_eq!(final_counts.failed_permanent, 2);
}

#[test]
fn empty_source_folder_finishes_in_one_launch() {
    let fixture = BatchFixture::new(&[]).expect("fixture");
    let processor = ScriptedProcessor::new(Vec::new());
    let host = InProcessHost::new(&fixture, &processor);

    let outcome = Watchdog::new(&host, fixture.watchdog_settings())
        .run(&fixture.launch_request())
        .expect("watchdog");

    assert_eq!(outcome.launches, 1);
    assert_eq!(outcome.stop, WatchdogStop::Completed);
    assert_eq!(outcome.counts.map(|counts| counts.total), Some(0));
    assert!(processor.calls().is_empty());
    assert!(!Sentinel::new(&fixture.paths().sentinel_path).is_present());
}

#[test]
fn operator_stop_during_item_two_is_not_relaunched() {
    let fixture = BatchFixture::new(&FIVE).expect("fixture");
    let sentinel = fixture.paths().sentinel_path;
    let processor = ScriptedProcessor::new(vec![
        ScriptedStep::Succeed,
        ScriptedStep::RemoveSentinelThenSucceed(sentinel.clone()),
    ]);
    let host = InProcessHost::new(&fixture, &processor);

    let outcome = Watchdog::new(&host, fixture.watchdog_settings())
        .run(&fixture.launch_request())
        .expect("watchdog");

    assert_eq!(outcome.launches, 1);
    assert_eq!(outcome.stop, WatchdogStop::StoppedByOperator);
    assert_eq!(processor.calls(), vec!["item1.blend", "item2.blend"]);
    let counts = fixture.read_ledger().expect("ledger").counts();
    assert_eq!((counts.done, counts.pending), (2, 3));
}

#[test]
fn host_dying_after_operator_stop_is_not_relaunched_and_resumes_later() {
    let fixture = BatchFixture::new(&FIVE).expect("fixture");
    let sentinel = fixture.paths().sentinel_path;
    let processor = ScriptedProcessor::new(vec![
        ScriptedStep::Succeed,
        ScriptedStep::RemoveSentinelThenCrash(sentinel.clone()),
    ]);
    let host = InProcessHost::new(&fixture, &processor);
    let watchdog = Watchdog::new(&host, fixture.watchdog_settings());

    let outcome = watchdog.run(&fixture.launch_request()).expect("first run");
    assert_eq!(outcome.launches, 1);
    assert_eq!(outcome.stop, WatchdogStop::StoppedByOperator);
    let state = fixture.read_ledger().expect("ledger");
    assert_eq!(
        state.find("item2.blend").expect("item2").status,
        ItemStatus::InProgress
    );

    // `start` again: item 2 is charged once and the batch completes.
    let outcome = watchdog.run(&fixture.launch_request()).expect("second run");
    assert_eq!(outcome.stop, WatchdogStop::Completed);
    let item = fixture
        .read_ledger()
        .expect("ledger")
        .find("item2.blend")
        .cloned()
        .expect("item2");
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.crash_count, 1);
}

#[test]
fn corrupt_ledger_stops_the_watchdog() {
    let fixture = BatchFixture::new(&FIVE).expect("fixture");
    fs::write(fixture.paths().ledger_path, "{\"version\": 1, \"items\": [").expect("write");
    let processor = ScriptedProcessor::new(Vec::new());
    let host = InProcessHost::new(&fixture, &processor);

    let err = Watchdog::new(&host, fixture.watchdog_settings())
        .run(&fixture.launch_request())
        .unwrap_err();

    assert!(matches!(
        find_batch_error(&err),
        Some(BatchError::CorruptLedger { .. })
    ));
    assert_eq!(host.launches(), 1);
    assert!(processor.calls().is_empty());
}
