//! Monthly aggregation: one streaming pass over the raw log.
//!
//! The raw log is ~120M rows; the aggregator never materializes it.
//! State is bounded by (entities × months): per-category totals per
//! resident-month, headcount/hires/quits per employer-month, visit
//! counts per venue-month, plus one job-tracking entry per participant.
//!
//! Bucketing is timestamp-driven (calendar-month truncation), so
//! out-of-order arrival cannot move an event between months. Only job
//! transition detection is order-sensitive; snapshots that arrive behind
//! a participant's high-water timestamp are counted but skipped for
//! transition purposes.

use crate::config::AggregationConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::raw::{RawEvent, TxnCategory, VenueType};
use crate::types::{EmployerId, Month, ParticipantId, VenueId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

// ── Partial records ──────────────────────────────────────────────────────────

/// Signed per-category transaction totals for one resident-month.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub wage: f64,
    pub shelter: f64,
    pub food: f64,
    pub recreation: f64,
    pub education: f64,
    pub rent_adjustment: f64,
}

impl CategoryTotals {
    pub fn add(&mut self, category: TxnCategory, amount: f64) {
        *self.slot(category) += amount;
    }

    pub fn get(&self, category: TxnCategory) -> f64 {
        match category {
            TxnCategory::Wage => self.wage,
            TxnCategory::Shelter => self.shelter,
            TxnCategory::Food => self.food,
            TxnCategory::Recreation => self.recreation,
            TxnCategory::Education => self.education,
            TxnCategory::RentAdjustment => self.rent_adjustment,
        }
    }

    fn slot(&mut self, category: TxnCategory) -> &mut f64 {
        match category {
            TxnCategory::Wage => &mut self.wage,
            TxnCategory::Shelter => &mut self.shelter,
            TxnCategory::Food => &mut self.food,
            TxnCategory::Recreation => &mut self.recreation,
            TxnCategory::Education => &mut self.education,
            TxnCategory::RentAdjustment => &mut self.rent_adjustment,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResidentPartial {
    pub totals: CategoryTotals,
    pub snapshot_count: u32,
    pub checkin_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct EmployerPartial {
    /// Distinct participants whose job resolved to this employer during
    /// the month; the headcount basis.
    pub participants: HashSet<ParticipantId>,
    pub hires: u32,
    pub quits: u32,
}

#[derive(Debug, Clone)]
pub struct VenuePartial {
    pub venue_type: VenueType,
    /// Visits per participant; key count is the unique-visitor count.
    pub visits_by_participant: HashMap<ParticipantId, u32>,
}

impl VenuePartial {
    pub fn visits(&self) -> u32 {
        self.visits_by_participant.values().sum()
    }
}

/// A completed job-holding interval: participant acquired the job at
/// `start` and left it at `end`.
#[derive(Debug, Clone)]
pub struct JobSpan {
    pub participant_id: ParticipantId,
    pub employer_id: EmployerId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl JobSpan {
    pub fn days(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 86_400.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The month had no resident records at all.
    NoResidentRecords,
    /// Every resident-month fell below the snapshot floor.
    BelowSnapshotFloor,
    /// Dropped by the warm-up policy.
    Warmup,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoResidentRecords => "no_resident_records",
            SkipReason::BelowSnapshotFloor => "below_snapshot_floor",
            SkipReason::Warmup => "warmup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedMonth {
    pub month: Month,
    pub reason: SkipReason,
}

/// Everything downstream stages need, keyed by qualifying month.
#[derive(Debug)]
pub struct AggregateOutput {
    pub residents: BTreeMap<Month, HashMap<ParticipantId, ResidentPartial>>,
    pub employers: BTreeMap<Month, HashMap<EmployerId, EmployerPartial>>,
    pub venues: BTreeMap<Month, HashMap<VenueId, VenuePartial>>,
    pub job_spans: Vec<JobSpan>,
    pub months: Vec<Month>,
    pub skipped: Vec<SkippedMonth>,
    pub rejected_events: u64,
    pub out_of_order_snapshots: u64,
}

// ── Aggregator ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct JobState {
    current: Option<(EmployerId, NaiveDateTime)>,
    high_water: NaiveDateTime,
}

pub struct MonthlyAggregator {
    cfg: AggregationConfig,
    residents: BTreeMap<Month, HashMap<ParticipantId, ResidentPartial>>,
    employers: BTreeMap<Month, HashMap<EmployerId, EmployerPartial>>,
    venues: BTreeMap<Month, HashMap<VenueId, VenuePartial>>,
    job_state: HashMap<ParticipantId, JobState>,
    job_spans: Vec<JobSpan>,
    rejected_events: u64,
    out_of_order_snapshots: u64,
}

impl MonthlyAggregator {
    pub fn new(cfg: AggregationConfig) -> Self {
        Self {
            cfg,
            residents: BTreeMap::new(),
            employers: BTreeMap::new(),
            venues: BTreeMap::new(),
            job_state: HashMap::new(),
            job_spans: Vec::new(),
            rejected_events: 0,
            out_of_order_snapshots: 0,
        }
    }

    /// Consume an entire event stream and finish. The streaming entry
    /// point for callers that hold an ingestor iterator.
    pub fn run(
        mut self,
        events: impl Iterator<Item = PipelineResult<RawEvent>>,
    ) -> PipelineResult<AggregateOutput> {
        for event in events {
            self.observe(&event?);
        }
        self.finish()
    }

    /// Fold a single event into the month buckets.
    pub fn observe(&mut self, event: &RawEvent) {
        let month = Month::from_datetime(event.timestamp());
        if let Some((start, end)) = self.cfg.expected_range {
            if month < start || month > end {
                self.rejected_events += 1;
                return;
            }
        }

        match event {
            RawEvent::Transaction(txn) => {
                self.residents
                    .entry(month)
                    .or_default()
                    .entry(txn.participant_id.clone())
                    .or_default()
                    .totals
                    .add(txn.category, txn.amount);
            }
            RawEvent::Status(snap) => {
                self.residents
                    .entry(month)
                    .or_default()
                    .entry(snap.participant_id.clone())
                    .or_default()
                    .snapshot_count += 1;

                if let Some(job_id) = &snap.job_id {
                    self.employers
                        .entry(month)
                        .or_default()
                        .entry(job_id.clone())
                        .or_default()
                        .participants
                        .insert(snap.participant_id.clone());
                }

                self.track_job(snap.participant_id.clone(), snap.job_id.clone(), snap.timestamp);
            }
            RawEvent::CheckIn(checkin) => {
                self.residents
                    .entry(month)
                    .or_default()
                    .entry(checkin.participant_id.clone())
                    .or_default()
                    .checkin_count += 1;

                let partial = self
                    .venues
                    .entry(month)
                    .or_default()
                    .entry(checkin.venue_id.clone())
                    .or_insert_with(|| VenuePartial {
                        venue_type: checkin.venue_type,
                        visits_by_participant: HashMap::new(),
                    });
                *partial
                    .visits_by_participant
                    .entry(checkin.participant_id.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    fn track_job(
        &mut self,
        participant_id: ParticipantId,
        job_id: Option<EmployerId>,
        ts: NaiveDateTime,
    ) {
        let state = self
            .job_state
            .entry(participant_id.clone())
            .or_insert_with(|| JobState {
                current: None,
                high_water: ts,
            });

        if ts < state.high_water {
            self.out_of_order_snapshots += 1;
            return;
        }
        state.high_water = ts;

        let month = Month::from_datetime(&ts);
        match (&state.current, &job_id) {
            (None, None) => {}
            (Some((held, _)), Some(next)) if held == next => {}
            (None, Some(next)) => {
                bump_hires(&mut self.employers, month, next);
                state.current = Some((next.clone(), ts));
            }
            (Some((held, start)), None) => {
                self.job_spans.push(JobSpan {
                    participant_id: participant_id.clone(),
                    employer_id: held.clone(),
                    start: *start,
                    end: ts,
                });
                bump_quits(&mut self.employers, month, held);
                state.current = None;
            }
            (Some((held, start)), Some(next)) => {
                self.job_spans.push(JobSpan {
                    participant_id: participant_id.clone(),
                    employer_id: held.clone(),
                    start: *start,
                    end: ts,
                });
                bump_quits(&mut self.employers, month, held);
                bump_hires(&mut self.employers, month, next);
                state.current = Some((next.clone(), ts));
            }
        }
    }

    /// Apply the warm-up and snapshot-floor policies and hand over the
    /// qualifying month buckets.
    pub fn finish(mut self) -> PipelineResult<AggregateOutput> {
        let mut skipped = Vec::new();

        let observed: Vec<Month> = self.residents.keys().copied().collect();
        if observed.is_empty() {
            return Ok(AggregateOutput {
                residents: BTreeMap::new(),
                employers: BTreeMap::new(),
                venues: BTreeMap::new(),
                job_spans: self.job_spans,
                months: Vec::new(),
                skipped,
                rejected_events: self.rejected_events,
                out_of_order_snapshots: self.out_of_order_snapshots,
            });
        }

        // Warm-up: drop the leading observed months by policy.
        for month in observed.iter().take(self.cfg.warmup_months) {
            log::info!("month {month} dropped by warm-up policy");
            skipped.push(SkippedMonth {
                month: *month,
                reason: SkipReason::Warmup,
            });
            self.residents.remove(month);
            self.employers.remove(month);
            self.venues.remove(month);
        }

        // Snapshot floor: residents below the floor are excluded rather
        // than partially aggregated; an emptied month is skipped whole.
        let floor = self.cfg.min_snapshots_per_month;
        let mut months = Vec::new();
        let remaining: Vec<Month> = self.residents.keys().copied().collect();
        for month in remaining {
            let bucket = self.residents.get_mut(&month).expect("month key present");
            bucket.retain(|_, partial| partial.snapshot_count >= floor);
            if bucket.is_empty() {
                // A month key only exists once a partial was inserted,
                // so an emptied bucket always means the floor did it.
                let reason = SkipReason::BelowSnapshotFloor;
                log::warn!("month {month} skipped: {}", reason.as_str());
                skipped.push(SkippedMonth { month, reason });
                self.residents.remove(&month);
                self.employers.remove(&month);
                self.venues.remove(&month);
            } else {
                months.push(month);
            }
        }

        // Calendar gaps inside the observed span count as skipped too.
        if let (Some(first), Some(last)) = (months.first().copied(), months.last().copied()) {
            for month in first.iter_through(last) {
                if !self.residents.contains_key(&month)
                    && !skipped.iter().any(|s| s.month == month)
                {
                    log::warn!("month {month} skipped: no resident records");
                    skipped.push(SkippedMonth {
                        month,
                        reason: SkipReason::NoResidentRecords,
                    });
                }
            }
        }

        if months.is_empty() {
            // Every observed month was excluded; surface the first one.
            return Err(PipelineError::NoDataForPeriod { month: observed[0] });
        }

        if self.rejected_events > 0 {
            log::warn!(
                "{} events rejected outside expected month range",
                self.rejected_events
            );
        }

        skipped.sort_by_key(|s| s.month);
        Ok(AggregateOutput {
            residents: self.residents,
            employers: self.employers,
            venues: self.venues,
            job_spans: self.job_spans,
            months,
            skipped,
            rejected_events: self.rejected_events,
            out_of_order_snapshots: self.out_of_order_snapshots,
        })
    }
}

fn bump_hires(
    employers: &mut BTreeMap<Month, HashMap<EmployerId, EmployerPartial>>,
    month: Month,
    employer_id: &EmployerId,
) {
    employers
        .entry(month)
        .or_default()
        .entry(employer_id.clone())
        .or_default()
        .hires += 1;
}

fn bump_quits(
    employers: &mut BTreeMap<Month, HashMap<EmployerId, EmployerPartial>>,
    month: Month,
    employer_id: &EmployerId,
) {
    employers
        .entry(month)
        .or_default()
        .entry(employer_id.clone())
        .or_default()
        .quits += 1;
}
