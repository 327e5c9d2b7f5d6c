//! Shared fixtures for the integration tests.
//!
//! `city_fixture` is the hand-checked scenario most tests lean on:
//! three months (2022-03 through 2022-05), ten residents with incomes
//! 1000..10000, two employers, one restaurant. With the default test
//! config the first month is dropped as warm-up, so April and May are
//! the published months.
#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use cityscope_core::fingerprint::DataFingerprint;
use cityscope_core::raw::{
    CheckIn, EducationLevel, FinancialTransaction, MemoryIngestor, ParticipantAttributes,
    RawEvent, StatusSnapshot, TxnCategory, VenueInfo, VenueType,
};

pub fn ts(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("valid date")
        .and_hms_opt(hour, 0, 0)
        .expect("valid time")
}

pub fn snapshot(pid: &str, at: NaiveDateTime, job: Option<&str>) -> RawEvent {
    RawEvent::Status(StatusSnapshot {
        timestamp: at,
        participant_id: pid.to_string(),
        balance: 1000.0,
        job_id: job.map(str::to_string),
    })
}

pub fn txn(pid: &str, at: NaiveDateTime, category: TxnCategory, amount: f64) -> RawEvent {
    RawEvent::Transaction(FinancialTransaction {
        timestamp: at,
        participant_id: pid.to_string(),
        category,
        amount,
    })
}

pub fn checkin(pid: &str, at: NaiveDateTime, venue_id: &str, venue_type: VenueType) -> RawEvent {
    RawEvent::CheckIn(CheckIn {
        timestamp: at,
        participant_id: pid.to_string(),
        venue_id: venue_id.to_string(),
        venue_type,
    })
}

pub fn attrs(
    pid: &str,
    age: u32,
    household_size: u32,
    have_kids: bool,
    education_level: EducationLevel,
) -> ParticipantAttributes {
    ParticipantAttributes {
        participant_id: pid.to_string(),
        age,
        household_size,
        have_kids,
        education_level,
    }
}

/// Participant ids of the fixture, res-0 through res-9.
pub fn fixture_pid(i: usize) -> String {
    format!("res-{i}")
}

/// The hand-checked city scenario. Known facts:
///   - resident i earns (i+1)*1000 per month, pays 300 shelter;
///   - res-0 additionally spends 120 on food in April and checks in
///     twice at venue-0, a restaurant with capacity 10;
///   - res-0..4 work at emp-A, res-5..8 at emp-B throughout;
///   - res-9 works at emp-A through April and at emp-B from May on,
///     producing one completed 61-day job span at emp-A;
///   - res-5..9 have kids, res-0..4 do not;
///   - two snapshots per resident per month, above the floor of 2.
pub fn city_fixture() -> MemoryIngestor {
    let mut events = Vec::new();

    for m in 3..=5u32 {
        for i in 0..10usize {
            let pid = fixture_pid(i);
            let job = match (i, m) {
                (0..=4, _) => Some("emp-A"),
                (9, 3 | 4) => Some("emp-A"),
                (9, _) => Some("emp-B"),
                _ => Some("emp-B"),
            };
            events.push(snapshot(&pid, ts(2022, m, 5, 8), job));
            events.push(snapshot(&pid, ts(2022, m, 20, 8), job));

            events.push(txn(
                &pid,
                ts(2022, m, 25, 17),
                TxnCategory::Wage,
                (i as f64 + 1.0) * 1000.0,
            ));
            events.push(txn(&pid, ts(2022, m, 3, 12), TxnCategory::Shelter, -300.0));
        }
    }

    events.push(txn(
        &fixture_pid(0),
        ts(2022, 4, 10, 12),
        TxnCategory::Food,
        -120.0,
    ));
    events.push(checkin(
        &fixture_pid(0),
        ts(2022, 4, 10, 19),
        "venue-0",
        VenueType::Restaurant,
    ));
    events.push(checkin(
        &fixture_pid(0),
        ts(2022, 4, 12, 19),
        "venue-0",
        VenueType::Restaurant,
    ));

    let participants: Vec<ParticipantAttributes> = (0..10)
        .map(|i| {
            attrs(
                &fixture_pid(i),
                20 + i as u32 * 3,
                (i % 4) as u32 + 1,
                i >= 5,
                EducationLevel::ALL[i % 4],
            )
        })
        .collect();

    let venues = vec![VenueInfo {
        venue_id: "venue-0".to_string(),
        venue_type: VenueType::Restaurant,
        max_occupancy: 10,
    }];

    MemoryIngestor::new(
        events,
        participants,
        venues,
        DataFingerprint::from_string("test-city-v1".to_string()),
    )
}
