//! Feature building: joins monthly partials with static attributes and
//! derives the typed metric rows every downstream stage consumes.
//!
//! Loose shapes stop here: a resident partial with no matching
//! attributes row is dropped and counted, never carried forward with
//! holes. Undefined ratios (Income = 0, headcount = 0) become `None`
//! sentinels that serialize as null; dashboards must render them as
//! "unknown", not zero.

use crate::aggregate::AggregateOutput;
use crate::config::FeatureConfig;
use crate::raw::{EducationLevel, ParticipantAttributes, TxnCategory, VenueInfo, VenueType};
use crate::stability::StabilityCategory;
use crate::types::{EmployerId, Month, ParticipantId, VenueId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Metric rows ──────────────────────────────────────────────────────────────

/// One resident-month record. Exactly one per (participant, month) with
/// complete data; `cluster` is set later by the ClusterAssigner and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidentMonthlyMetric {
    pub participant_id: ParticipantId,
    pub month: Month,
    pub income: f64,
    pub cost_of_living: f64,
    pub cost_shelter: f64,
    pub cost_food: f64,
    pub cost_recreation: f64,
    pub cost_education: f64,
    /// (income − cost_of_living) / income; None when income is 0.
    pub savings_rate: Option<f64>,
    pub age: u32,
    pub household_size: u32,
    pub have_kids: bool,
    pub education_level: EducationLevel,
    pub cluster: Option<u32>,
}

/// One employer-month record. `turnover_rate` is None (flagged, not
/// zeroed) when headcount is 0; `avg_tenure_days` is None when no job
/// span for the employer has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployerMonthlyMetric {
    pub employer_id: EmployerId,
    pub month: Month,
    pub headcount: u32,
    pub hires: u32,
    pub quits: u32,
    pub turnover_rate: Option<f64>,
    pub avg_tenure_days: Option<f64>,
    pub stability: Option<StabilityCategory>,
}

/// One venue-month record, joining check-in activity with inferred
/// spend and capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueMonthlyMetric {
    pub venue_id: VenueId,
    pub venue_type: VenueType,
    pub month: Month,
    pub visits: u32,
    pub unique_visitors: u32,
    /// Monthly spend attributed to this venue: Food for restaurants,
    /// Recreation for pubs, pro-rated by each participant's visit share
    /// within the venue type.
    pub inferred_spend: f64,
    pub max_occupancy: Option<u32>,
    /// visits / (max_occupancy × days in month); None without capacity.
    pub utilization: Option<f64>,
}

/// Output of the feature-building stage.
pub struct FeatureSet {
    pub residents: Vec<ResidentMonthlyMetric>,
    pub employers: Vec<EmployerMonthlyMetric>,
    pub venues: Vec<VenueMonthlyMetric>,
    /// Resident partials dropped for lack of an attributes row.
    pub missing_attributes: u32,
    /// Resident rows whose savings rate is the undefined sentinel.
    pub sentinel_rows: u32,
}

// ── Builder ──────────────────────────────────────────────────────────────────

pub struct FeatureBuilder {
    cfg: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(cfg: FeatureConfig) -> Self {
        Self { cfg }
    }

    pub fn build(
        &self,
        agg: &AggregateOutput,
        attributes: &HashMap<ParticipantId, ParticipantAttributes>,
        venue_info: &HashMap<VenueId, VenueInfo>,
    ) -> FeatureSet {
        let mut missing_attributes = 0u32;
        let mut sentinel_rows = 0u32;

        let mut residents = Vec::new();
        for (month, bucket) in &agg.residents {
            let mut ids: Vec<&ParticipantId> = bucket.keys().collect();
            ids.sort();
            for participant_id in ids {
                let partial = &bucket[participant_id];
                let Some(attrs) = attributes.get(participant_id) else {
                    missing_attributes += 1;
                    continue;
                };

                let income = partial.totals.wage;
                let cost_of_living: f64 = self
                    .cfg
                    .cost_categories
                    .iter()
                    .map(|cat| partial.totals.get(*cat).abs())
                    .sum();

                let savings_rate = if income > 0.0 {
                    Some((income - cost_of_living) / income)
                } else {
                    sentinel_rows += 1;
                    None
                };

                residents.push(ResidentMonthlyMetric {
                    participant_id: participant_id.clone(),
                    month: *month,
                    income,
                    cost_of_living,
                    cost_shelter: partial.totals.get(TxnCategory::Shelter).abs(),
                    cost_food: partial.totals.get(TxnCategory::Food).abs(),
                    cost_recreation: partial.totals.get(TxnCategory::Recreation).abs(),
                    cost_education: partial.totals.get(TxnCategory::Education).abs(),
                    savings_rate,
                    age: attrs.age,
                    household_size: attrs.household_size,
                    have_kids: attrs.have_kids,
                    education_level: attrs.education_level,
                    cluster: None,
                });
            }
        }

        let employers = self.build_employers(agg);
        let venues = self.build_venues(agg, venue_info);

        if missing_attributes > 0 {
            log::warn!("{missing_attributes} resident-months dropped: no attributes row");
        }
        if sentinel_rows > 0 {
            log::info!("{sentinel_rows} resident-months carry an undefined savings rate");
        }

        FeatureSet {
            residents,
            employers,
            venues,
            missing_attributes,
            sentinel_rows,
        }
    }

    fn build_employers(&self, agg: &AggregateOutput) -> Vec<EmployerMonthlyMetric> {
        // Tenure is employer-level: mean length of completed job spans,
        // attached to every month row for that employer.
        let mut tenure_sum: HashMap<&EmployerId, (f64, u32)> = HashMap::new();
        for span in &agg.job_spans {
            let entry = tenure_sum.entry(&span.employer_id).or_insert((0.0, 0));
            entry.0 += span.days();
            entry.1 += 1;
        }
        let avg_tenure: HashMap<&EmployerId, f64> = tenure_sum
            .into_iter()
            .map(|(id, (sum, n))| (id, sum / n as f64))
            .collect();

        let mut rows = Vec::new();
        for (month, bucket) in &agg.employers {
            let mut ids: Vec<&EmployerId> = bucket.keys().collect();
            ids.sort();
            for employer_id in ids {
                let partial = &bucket[employer_id];
                let headcount = partial.participants.len() as u32;
                let turnover_rate = if headcount > 0 {
                    Some((partial.hires + partial.quits) as f64 / 2.0 / headcount as f64)
                } else {
                    log::warn!("employer {employer_id} month {month}: zero headcount, turnover undefined");
                    None
                };

                rows.push(EmployerMonthlyMetric {
                    employer_id: employer_id.clone(),
                    month: *month,
                    headcount,
                    hires: partial.hires,
                    quits: partial.quits,
                    turnover_rate,
                    avg_tenure_days: avg_tenure.get(employer_id).copied(),
                    stability: None,
                });
            }
        }
        rows
    }

    fn build_venues(
        &self,
        agg: &AggregateOutput,
        venue_info: &HashMap<VenueId, VenueInfo>,
    ) -> Vec<VenueMonthlyMetric> {
        let mut rows = Vec::new();
        for (month, bucket) in &agg.venues {
            // Spend attribution is per venue type: Food spend goes to
            // restaurants, Recreation spend to pubs, each pro-rated by
            // the participant's visit share within that type.
            let mut type_visits: HashMap<(&ParticipantId, VenueType), u32> = HashMap::new();
            for partial in bucket.values() {
                for (pid, visits) in &partial.visits_by_participant {
                    *type_visits.entry((pid, partial.venue_type)).or_insert(0) += visits;
                }
            }

            let resident_bucket = agg.residents.get(month);
            let mut ids: Vec<&VenueId> = bucket.keys().collect();
            ids.sort();
            for venue_id in ids {
                let partial = &bucket[venue_id];
                let visits = partial.visits();
                let unique_visitors = partial.visits_by_participant.len() as u32;

                let spend_category = match partial.venue_type {
                    VenueType::Restaurant => TxnCategory::Food,
                    VenueType::Pub => TxnCategory::Recreation,
                };
                let mut inferred_spend = 0.0;
                for (pid, venue_visits) in &partial.visits_by_participant {
                    let participant_total = type_visits
                        .get(&(pid, partial.venue_type))
                        .copied()
                        .unwrap_or(0);
                    if participant_total == 0 {
                        continue;
                    }
                    let Some(res) = resident_bucket.and_then(|b| b.get(pid)) else {
                        continue;
                    };
                    let out_spend = res.totals.get(spend_category).abs();
                    inferred_spend +=
                        out_spend * (*venue_visits as f64 / participant_total as f64);
                }

                let info = venue_info.get(venue_id);
                let max_occupancy = info.map(|v| v.max_occupancy);
                let utilization = max_occupancy.and_then(|cap| {
                    if cap == 0 {
                        None
                    } else {
                        Some(visits as f64 / (cap as f64 * month.days_in_month() as f64))
                    }
                });

                rows.push(VenueMonthlyMetric {
                    venue_id: venue_id.clone(),
                    venue_type: partial.venue_type,
                    month: *month,
                    visits,
                    unique_visitors,
                    inferred_spend,
                    max_occupancy,
                    utilization,
                });
            }
        }
        rows
    }
}
