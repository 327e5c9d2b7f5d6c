//! Monthly aggregation: bucketing, warm-up, snapshot floor, job
//! transition tracking.

mod common;

use cityscope_core::aggregate::{MonthlyAggregator, SkipReason};
use cityscope_core::config::{AggregationConfig, PipelineConfig};
use cityscope_core::error::PipelineError;
use cityscope_core::raw::TxnCategory;
use cityscope_core::types::Month;
use common::{snapshot, ts, txn};

fn agg_config(warmup: usize, floor: u32) -> AggregationConfig {
    AggregationConfig {
        warmup_months: warmup,
        min_snapshots_per_month: floor,
        expected_range: None,
    }
}

#[test]
fn events_bucket_by_calendar_month_truncation() {
    let events = vec![
        txn("res-0", ts(2022, 3, 1, 0), TxnCategory::Wage, 100.0),
        txn("res-0", ts(2022, 3, 31, 23), TxnCategory::Wage, 50.0),
        txn("res-0", ts(2022, 4, 1, 0), TxnCategory::Wage, 25.0),
        snapshot("res-0", ts(2022, 3, 5, 8), None),
        snapshot("res-0", ts(2022, 4, 5, 8), None),
    ];
    let out = MonthlyAggregator::new(agg_config(0, 1))
        .run(events.into_iter().map(Ok))
        .unwrap();

    let march = &out.residents[&Month::new(2022, 3)]["res-0"];
    assert_eq!(march.totals.wage, 150.0);
    let april = &out.residents[&Month::new(2022, 4)]["res-0"];
    assert_eq!(april.totals.wage, 25.0);
}

#[test]
fn warmup_months_are_dropped_and_recorded() {
    let mut events = Vec::new();
    for m in 3..=5u32 {
        events.push(snapshot("res-0", ts(2022, m, 5, 8), None));
        events.push(snapshot("res-0", ts(2022, m, 20, 8), None));
    }
    let out = MonthlyAggregator::new(agg_config(1, 1))
        .run(events.into_iter().map(Ok))
        .unwrap();

    assert_eq!(out.months, vec![Month::new(2022, 4), Month::new(2022, 5)]);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].month, Month::new(2022, 3));
    assert_eq!(out.skipped[0].reason, SkipReason::Warmup);
}

#[test]
fn warmup_is_a_parameter_not_a_constant() {
    let mut events = Vec::new();
    for m in 3..=5u32 {
        events.push(snapshot("res-0", ts(2022, m, 5, 8), None));
    }
    let out = MonthlyAggregator::new(agg_config(0, 1))
        .run(events.into_iter().map(Ok))
        .unwrap();
    assert_eq!(out.months.len(), 3, "warmup 0 keeps every month");
}

#[test]
fn residents_below_snapshot_floor_are_excluded() {
    let events = vec![
        // res-0 has two snapshots, res-1 only one.
        snapshot("res-0", ts(2022, 4, 5, 8), None),
        snapshot("res-0", ts(2022, 4, 20, 8), None),
        snapshot("res-1", ts(2022, 4, 6, 8), None),
        txn("res-1", ts(2022, 4, 25, 17), TxnCategory::Wage, 999.0),
    ];
    let out = MonthlyAggregator::new(agg_config(0, 2))
        .run(events.into_iter().map(Ok))
        .unwrap();

    let april = &out.residents[&Month::new(2022, 4)];
    assert!(april.contains_key("res-0"));
    assert!(
        !april.contains_key("res-1"),
        "a thin resident-month is excluded, not partially aggregated"
    );
}

#[test]
fn month_emptied_by_the_floor_is_skipped_not_fabricated() {
    let events = vec![snapshot("res-0", ts(2022, 4, 5, 8), None)];
    let err = MonthlyAggregator::new(agg_config(0, 2))
        .run(events.into_iter().map(Ok))
        .unwrap_err();
    match err {
        PipelineError::NoDataForPeriod { month } => {
            assert_eq!(month, Month::new(2022, 4));
        }
        other => panic!("expected NoDataForPeriod, got {other}"),
    }
}

#[test]
fn month_emptied_by_the_floor_records_below_snapshot_floor() {
    let events = vec![
        snapshot("res-0", ts(2022, 3, 5, 8), None),
        snapshot("res-0", ts(2022, 3, 20, 8), None),
        // April has records but every resident is below the floor.
        snapshot("res-0", ts(2022, 4, 5, 8), None),
    ];
    let out = MonthlyAggregator::new(agg_config(0, 2))
        .run(events.into_iter().map(Ok))
        .unwrap();

    assert_eq!(out.months, vec![Month::new(2022, 3)]);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].month, Month::new(2022, 4));
    assert_eq!(out.skipped[0].reason, SkipReason::BelowSnapshotFloor);
}

#[test]
fn calendar_gap_inside_the_span_is_recorded_as_skipped() {
    let mut events = Vec::new();
    for m in [3u32, 5] {
        events.push(snapshot("res-0", ts(2022, m, 5, 8), None));
        events.push(snapshot("res-0", ts(2022, m, 20, 8), None));
    }
    let out = MonthlyAggregator::new(agg_config(0, 1))
        .run(events.into_iter().map(Ok))
        .unwrap();

    assert_eq!(out.months, vec![Month::new(2022, 3), Month::new(2022, 5)]);
    assert!(out
        .skipped
        .iter()
        .any(|s| s.month == Month::new(2022, 4) && s.reason == SkipReason::NoResidentRecords));
}

#[test]
fn job_transitions_count_hires_quits_and_complete_spans() {
    let events = vec![
        snapshot("res-0", ts(2022, 3, 5, 8), Some("emp-A")),
        snapshot("res-0", ts(2022, 4, 5, 8), Some("emp-A")),
        // Switch straight from A to B: one quit for A, one hire for B.
        snapshot("res-0", ts(2022, 5, 5, 8), Some("emp-B")),
        snapshot("res-0", ts(2022, 6, 5, 8), None),
    ];
    let out = MonthlyAggregator::new(agg_config(0, 1))
        .run(events.into_iter().map(Ok))
        .unwrap();

    let march = &out.employers[&Month::new(2022, 3)]["emp-A"];
    assert_eq!(march.hires, 1, "first observed employment is a hire");

    let may = &out.employers[&Month::new(2022, 5)];
    assert_eq!(may["emp-A"].quits, 1);
    assert_eq!(may["emp-B"].hires, 1);

    let june = &out.employers[&Month::new(2022, 6)]["emp-B"];
    assert_eq!(june.quits, 1);

    assert_eq!(out.job_spans.len(), 2);
    let span_a = out
        .job_spans
        .iter()
        .find(|s| s.employer_id == "emp-A")
        .unwrap();
    assert!((span_a.days() - 61.0).abs() < 1e-9);
}

#[test]
fn headcount_is_distinct_participants_per_month() {
    let events = vec![
        snapshot("res-0", ts(2022, 4, 5, 8), Some("emp-A")),
        snapshot("res-0", ts(2022, 4, 20, 8), Some("emp-A")),
        snapshot("res-1", ts(2022, 4, 5, 8), Some("emp-A")),
    ];
    let out = MonthlyAggregator::new(agg_config(0, 1))
        .run(events.into_iter().map(Ok))
        .unwrap();
    let april = &out.employers[&Month::new(2022, 4)]["emp-A"];
    assert_eq!(april.participants.len(), 2);
}

#[test]
fn out_of_order_snapshots_do_not_fabricate_transitions() {
    let events = vec![
        snapshot("res-0", ts(2022, 4, 20, 8), Some("emp-A")),
        // Arrives late, behind the high-water mark, claiming no job.
        snapshot("res-0", ts(2022, 4, 5, 8), None),
        snapshot("res-0", ts(2022, 5, 5, 8), Some("emp-A")),
    ];
    let out = MonthlyAggregator::new(agg_config(0, 1))
        .run(events.into_iter().map(Ok))
        .unwrap();

    assert_eq!(out.out_of_order_snapshots, 1);
    assert!(out.job_spans.is_empty(), "no quit was fabricated");
    let april = &out.employers[&Month::new(2022, 4)]["emp-A"];
    assert_eq!(april.quits, 0);
}

#[test]
fn events_outside_the_expected_range_are_rejected_and_counted() {
    let mut cfg = agg_config(0, 1);
    cfg.expected_range = Some((Month::new(2022, 3), Month::new(2022, 5)));
    let events = vec![
        snapshot("res-0", ts(2022, 4, 5, 8), None),
        snapshot("res-0", ts(2022, 4, 20, 8), None),
        snapshot("res-0", ts(2031, 1, 1, 0), None),
    ];
    let out = MonthlyAggregator::new(cfg)
        .run(events.into_iter().map(Ok))
        .unwrap();

    assert_eq!(out.rejected_events, 1);
    assert!(!out.residents.contains_key(&Month::new(2031, 1)));
}

#[test]
fn fixture_publishes_april_and_may_only() {
    let cfg = PipelineConfig::default_test();
    let mut ingestor = common::city_fixture();
    use cityscope_core::raw::RawLogIngestor;
    let events: Vec<_> = ingestor.events().unwrap().collect();
    let out = MonthlyAggregator::new(cfg.aggregation)
        .run(events.into_iter())
        .unwrap();

    assert_eq!(out.months, vec![Month::new(2022, 4), Month::new(2022, 5)]);
    assert_eq!(out.residents[&Month::new(2022, 4)].len(), 10);
}
