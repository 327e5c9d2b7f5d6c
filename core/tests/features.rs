//! Feature building: savings-rate invariant, sentinels, turnover and
//! tenure derivation, venue joins.

mod common;

use cityscope_core::aggregate::{
    AggregateOutput, CategoryTotals, EmployerPartial, JobSpan, ResidentPartial, VenuePartial,
};
use cityscope_core::config::PipelineConfig;
use cityscope_core::features::FeatureBuilder;
use cityscope_core::raw::{
    EducationLevel, ParticipantAttributes, TxnCategory, VenueInfo, VenueType,
};
use cityscope_core::types::Month;
use common::{attrs, ts};
use std::collections::{BTreeMap, HashMap, HashSet};

fn empty_output(month: Month) -> AggregateOutput {
    AggregateOutput {
        residents: BTreeMap::new(),
        employers: BTreeMap::new(),
        venues: BTreeMap::new(),
        job_spans: Vec::new(),
        months: vec![month],
        skipped: Vec::new(),
        rejected_events: 0,
        out_of_order_snapshots: 0,
    }
}

fn resident_partial(wage: f64, shelter: f64, food: f64) -> ResidentPartial {
    let mut totals = CategoryTotals::default();
    totals.add(TxnCategory::Wage, wage);
    totals.add(TxnCategory::Shelter, shelter);
    totals.add(TxnCategory::Food, food);
    ResidentPartial {
        totals,
        snapshot_count: 4,
        checkin_count: 0,
    }
}

fn attributes_for(pids: &[&str]) -> HashMap<String, ParticipantAttributes> {
    pids.iter()
        .map(|p| {
            (
                p.to_string(),
                attrs(p, 30, 2, false, EducationLevel::Bachelors),
            )
        })
        .collect()
}

fn builder() -> FeatureBuilder {
    FeatureBuilder::new(PipelineConfig::default_test().features)
}

#[test]
fn savings_rate_satisfies_its_identity_when_income_positive() {
    let month = Month::new(2022, 4);
    let mut out = empty_output(month);
    out.residents
        .entry(month)
        .or_default()
        .insert("res-0".to_string(), resident_partial(4000.0, -900.0, -300.0));

    let set = builder().build(&out, &attributes_for(&["res-0"]), &HashMap::new());
    let row = &set.residents[0];

    assert_eq!(row.income, 4000.0);
    assert_eq!(row.cost_of_living, 1200.0, "costs are absolute values");
    let rate = row.savings_rate.unwrap();
    assert!(((row.income - row.cost_of_living) / row.income - rate).abs() < 1e-9);
    assert_eq!(set.sentinel_rows, 0);
}

#[test]
fn zero_income_yields_the_null_sentinel_not_zero() {
    let month = Month::new(2022, 4);
    let mut out = empty_output(month);
    out.residents
        .entry(month)
        .or_default()
        .insert("res-0".to_string(), resident_partial(0.0, -500.0, 0.0));

    let set = builder().build(&out, &attributes_for(&["res-0"]), &HashMap::new());
    let row = &set.residents[0];

    assert!(row.savings_rate.is_none(), "undefined, never a fake 0.0");
    assert_eq!(set.sentinel_rows, 1);

    // The sentinel serializes as null, which renderers show as unknown.
    let json = serde_json::to_value(row).unwrap();
    assert!(json["savings_rate"].is_null());
}

#[test]
fn rent_adjustment_is_not_a_cost_category() {
    let month = Month::new(2022, 4);
    let mut partial = resident_partial(2000.0, -500.0, 0.0);
    partial.totals.add(TxnCategory::RentAdjustment, -400.0);
    let mut out = empty_output(month);
    out.residents
        .entry(month)
        .or_default()
        .insert("res-0".to_string(), partial);

    let set = builder().build(&out, &attributes_for(&["res-0"]), &HashMap::new());
    assert_eq!(set.residents[0].cost_of_living, 500.0);
}

#[test]
fn residents_without_attributes_are_dropped_and_counted() {
    let month = Month::new(2022, 4);
    let mut out = empty_output(month);
    let bucket = out.residents.entry(month).or_default();
    bucket.insert("res-0".to_string(), resident_partial(1000.0, -100.0, 0.0));
    bucket.insert("ghost".to_string(), resident_partial(1000.0, -100.0, 0.0));

    let set = builder().build(&out, &attributes_for(&["res-0"]), &HashMap::new());
    assert_eq!(set.residents.len(), 1);
    assert_eq!(set.missing_attributes, 1);
}

#[test]
fn turnover_rate_is_hires_plus_quits_over_twice_headcount() {
    let month = Month::new(2022, 4);
    let mut out = empty_output(month);
    let participants: HashSet<String> = (0..40).map(|i| format!("res-{i}")).collect();
    out.employers.entry(month).or_default().insert(
        "emp-A".to_string(),
        EmployerPartial {
            participants,
            hires: 10,
            quits: 6,
        },
    );

    let set = builder().build(&out, &HashMap::new(), &HashMap::new());
    let row = &set.employers[0];
    assert_eq!(row.headcount, 40);
    assert!((row.turnover_rate.unwrap() - 0.2).abs() < 1e-9);
}

#[test]
fn zero_headcount_flags_turnover_as_undefined() {
    let month = Month::new(2022, 4);
    let mut out = empty_output(month);
    out.employers.entry(month).or_default().insert(
        "emp-A".to_string(),
        EmployerPartial {
            participants: HashSet::new(),
            hires: 0,
            quits: 2,
        },
    );

    let set = builder().build(&out, &HashMap::new(), &HashMap::new());
    assert!(set.employers[0].turnover_rate.is_none());
}

#[test]
fn tenure_averages_completed_spans_only() {
    let month = Month::new(2022, 4);
    let mut out = empty_output(month);
    out.employers.entry(month).or_default().insert(
        "emp-A".to_string(),
        EmployerPartial {
            participants: ["res-0".to_string()].into_iter().collect(),
            hires: 0,
            quits: 0,
        },
    );
    out.employers.entry(month).or_default().insert(
        "emp-B".to_string(),
        EmployerPartial {
            participants: ["res-1".to_string()].into_iter().collect(),
            hires: 0,
            quits: 0,
        },
    );
    // Two completed spans at emp-A (100 and 200 days), none at emp-B.
    out.job_spans.push(JobSpan {
        participant_id: "res-2".to_string(),
        employer_id: "emp-A".to_string(),
        start: ts(2021, 1, 1, 0),
        end: ts(2021, 4, 11, 0),
    });
    out.job_spans.push(JobSpan {
        participant_id: "res-3".to_string(),
        employer_id: "emp-A".to_string(),
        start: ts(2021, 1, 1, 0),
        end: ts(2021, 7, 20, 0),
    });

    let set = builder().build(&out, &HashMap::new(), &HashMap::new());
    let a = set.employers.iter().find(|e| e.employer_id == "emp-A").unwrap();
    let b = set.employers.iter().find(|e| e.employer_id == "emp-B").unwrap();
    assert!((a.avg_tenure_days.unwrap() - 150.0).abs() < 1e-9);
    assert!(b.avg_tenure_days.is_none(), "no completed span, no tenure");
}

#[test]
fn venue_spend_splits_by_type_and_prorates_within_it() {
    let month = Month::new(2022, 4);
    let mut out = empty_output(month);

    // res-0 spent 60 food and 120 recreation, with restaurant visits
    // split 2:1 between venue-0 and venue-2 and one pub visit at
    // venue-1. Food spend follows the restaurant visits, recreation
    // spend follows the pub visits.
    let mut partial = resident_partial(3000.0, -300.0, -60.0);
    partial.totals.add(TxnCategory::Recreation, -120.0);
    out.residents
        .entry(month)
        .or_default()
        .insert("res-0".to_string(), partial);

    let venues = out.venues.entry(month).or_default();
    venues.insert(
        "venue-0".to_string(),
        VenuePartial {
            venue_type: VenueType::Restaurant,
            visits_by_participant: [("res-0".to_string(), 2u32)].into_iter().collect(),
        },
    );
    venues.insert(
        "venue-1".to_string(),
        VenuePartial {
            venue_type: VenueType::Pub,
            visits_by_participant: [("res-0".to_string(), 1u32)].into_iter().collect(),
        },
    );
    venues.insert(
        "venue-2".to_string(),
        VenuePartial {
            venue_type: VenueType::Restaurant,
            visits_by_participant: [("res-0".to_string(), 1u32)].into_iter().collect(),
        },
    );

    let venue_info: HashMap<String, VenueInfo> = [(
        "venue-0".to_string(),
        VenueInfo {
            venue_id: "venue-0".to_string(),
            venue_type: VenueType::Restaurant,
            max_occupancy: 10,
        },
    )]
    .into_iter()
    .collect();

    let set = builder().build(&out, &attributes_for(&["res-0"]), &venue_info);
    let v0 = set.venues.iter().find(|v| v.venue_id == "venue-0").unwrap();
    let v1 = set.venues.iter().find(|v| v.venue_id == "venue-1").unwrap();
    let v2 = set.venues.iter().find(|v| v.venue_id == "venue-2").unwrap();

    assert_eq!(v0.visits, 2);
    assert_eq!(v0.unique_visitors, 1);
    // Food 60 splits 2/3 vs 1/3 across the two restaurants.
    assert!((v0.inferred_spend - 40.0).abs() < 1e-9);
    assert!((v2.inferred_spend - 20.0).abs() < 1e-9);
    // The pub gets the recreation spend, untouched by restaurant visits.
    assert!((v1.inferred_spend - 120.0).abs() < 1e-9);

    // 2 visits / (capacity 10 * 30 days of April).
    assert!((v0.utilization.unwrap() - 2.0 / 300.0).abs() < 1e-12);
    assert!(v1.utilization.is_none(), "unknown capacity, no utilization");
    assert_eq!(v1.max_occupancy, None);
}
