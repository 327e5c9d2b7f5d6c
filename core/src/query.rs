//! Read-side query service over a published run.
//!
//! The service never recomputes anything; it reads processed rows and
//! shapes them into the camelCase JSON the dashboards consume. The
//! cluster filter is a display concern: statistics that describe "the
//! selected population" are computed over the domain set, which ignores
//! the cluster filter by contract.

use crate::drivers::FeatureEffect;
use crate::error::{PipelineError, PipelineResult};
use crate::features::{EmployerMonthlyMetric, ResidentMonthlyMetric, VenueMonthlyMetric};
use crate::inequality::CityMonthlyAggregate;
use crate::store::MetricStore;
use crate::types::Month;
use serde::{Deserialize, Serialize};

// ── Filters ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthSelection {
    All,
    Single(Month),
    Range(Month, Month),
}

#[derive(Debug, Clone)]
pub struct ResidentFilter {
    pub have_kids: Option<bool>,
    pub cluster: Option<u32>,
    pub months: MonthSelection,
}

impl ResidentFilter {
    pub fn all() -> Self {
        Self {
            have_kids: None,
            cluster: None,
            months: MonthSelection::All,
        }
    }
}

// ── JSON rows ────────────────────────────────────────────────────────────────

/// Resident row in dashboard field naming. The metric fields keep their
/// legacy capitalized names; demographics stay camelCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidentJson {
    #[serde(rename = "participantId")]
    pub participant_id: String,
    pub month: Month,
    #[serde(rename = "Income")]
    pub income: f64,
    #[serde(rename = "CostOfLiving")]
    pub cost_of_living: f64,
    #[serde(rename = "SavingsRate")]
    pub savings_rate: Option<f64>,
    #[serde(rename = "Cluster")]
    pub cluster: Option<u32>,
    pub age: u32,
    #[serde(rename = "householdSize")]
    pub household_size: u32,
    #[serde(rename = "haveKids")]
    pub have_kids: bool,
    #[serde(rename = "educationLevel")]
    pub education_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployerJson {
    #[serde(rename = "employerId")]
    pub employer_id: String,
    pub month: Month,
    pub headcount: u32,
    pub hires: u32,
    pub quits: u32,
    #[serde(rename = "turnoverRate")]
    pub turnover_rate: Option<f64>,
    #[serde(rename = "avgTenure")]
    pub avg_tenure: Option<f64>,
    pub stability: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityJson {
    pub month: Month,
    #[serde(rename = "giniIncome")]
    pub gini_income: f64,
    #[serde(rename = "giniSavingsRate")]
    pub gini_savings_rate: f64,
    #[serde(rename = "sampleSize")]
    pub sample_size: u32,
    #[serde(rename = "avgIncome")]
    pub avg_income: f64,
    #[serde(rename = "avgCostOfLiving")]
    pub avg_cost_of_living: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueJson {
    #[serde(rename = "venueId")]
    pub venue_id: String,
    #[serde(rename = "venueType")]
    pub venue_type: String,
    pub month: Month,
    pub visits: u32,
    #[serde(rename = "uniqueVisitors")]
    pub unique_visitors: u32,
    #[serde(rename = "inferredSpend")]
    pub inferred_spend: f64,
    #[serde(rename = "maxOccupancy")]
    pub max_occupancy: Option<u32>,
    pub utilization: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eta2Entry {
    pub feature: String,
    pub eta2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceEntry {
    pub feature: String,
    pub importance_mean: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSeparationJson {
    pub numeric_eta2: Vec<Eta2Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsPredictorsJson {
    pub permutation_importance: Vec<ImportanceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverResponse {
    pub cluster_separation: ClusterSeparationJson,
    pub savings_predictors: SavingsPredictorsJson,
}

/// The two populations a resident query yields: `domain` ignores the
/// cluster filter, `display` honors every filter. Summary statistics
/// belong to the domain set; tables and charts render the display set.
#[derive(Debug)]
pub struct FilteredResidents {
    pub domain: Vec<ResidentJson>,
    pub display: Vec<ResidentJson>,
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct QueryService<'a> {
    store: &'a MetricStore,
    fingerprint: String,
    months: Vec<Month>,
}

impl<'a> QueryService<'a> {
    /// Bind to the most recently published run.
    pub fn latest(store: &'a MetricStore) -> PipelineResult<Self> {
        let fingerprint = store
            .latest_published()?
            .ok_or_else(|| anyhow::anyhow!("no published pipeline run in store"))?;
        Self::for_fingerprint(store, fingerprint)
    }

    pub fn for_fingerprint(store: &'a MetricStore, fingerprint: String) -> PipelineResult<Self> {
        if !store.is_published(&fingerprint)? {
            return Err(PipelineError::StaleCacheFingerprint {
                expected: fingerprint,
                found: "unpublished or missing run".to_string(),
            });
        }
        let months = store.months(&fingerprint)?;
        Ok(Self {
            store,
            fingerprint,
            months,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Qualifying months of the bound run, chronological.
    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn residents(&self, filter: &ResidentFilter) -> PipelineResult<FilteredResidents> {
        let range = self.resolve(filter.months)?;
        let domain = self
            .store
            .resident_rows(&self.fingerprint, range, filter.have_kids, None)?;

        // The display set is a subset of the domain set, so the cluster
        // filter is applied in memory rather than with a second query.
        let display: Vec<ResidentJson> = domain
            .iter()
            .filter(|r| filter.cluster.is_none() || r.cluster == filter.cluster)
            .map(resident_json)
            .collect();

        Ok(FilteredResidents {
            domain: domain.iter().map(resident_json).collect(),
            display,
        })
    }

    pub fn employers(&self, months: MonthSelection) -> PipelineResult<Vec<EmployerJson>> {
        let range = self.resolve(months)?;
        let rows = self.store.employer_rows(&self.fingerprint, range)?;
        Ok(rows.iter().map(employer_json).collect())
    }

    pub fn venues(&self, months: MonthSelection) -> PipelineResult<Vec<VenueJson>> {
        let range = self.resolve(months)?;
        let rows = self.store.venue_rows(&self.fingerprint, range)?;
        Ok(rows.iter().map(venue_json).collect())
    }

    pub fn city_timeline(&self) -> PipelineResult<Vec<CityJson>> {
        let rows = self.store.city_timeline(&self.fingerprint)?;
        Ok(rows.iter().map(city_json).collect())
    }

    pub fn cluster_profiles(&self) -> PipelineResult<Vec<crate::cluster::ClusterProfile>> {
        self.store.cluster_profiles(&self.fingerprint)
    }

    /// Both driver analyses, each truncated to the `top_n` strongest
    /// effects. The full rankings stay in the store.
    pub fn drivers(&self, top_n: Option<usize>) -> PipelineResult<DriverResponse> {
        let eta2 = self
            .store
            .driver_stats(&self.fingerprint, "cluster_separation", top_n)?;
        let importance = self
            .store
            .driver_stats(&self.fingerprint, "savings_predictors", top_n)?;
        Ok(DriverResponse {
            cluster_separation: ClusterSeparationJson {
                numeric_eta2: eta2
                    .into_iter()
                    .map(|FeatureEffect { feature, value }| Eta2Entry {
                        feature,
                        eta2: value,
                    })
                    .collect(),
            },
            savings_predictors: SavingsPredictorsJson {
                permutation_importance: importance
                    .into_iter()
                    .map(|FeatureEffect { feature, value }| ImportanceEntry {
                        feature,
                        importance_mean: value,
                    })
                    .collect(),
            },
        })
    }

    /// Turn a month selection into a store range, rejecting months the
    /// run never published. A month inside the processed span that was
    /// skipped (warm-up, thin data) is just as unknown as one outside
    /// it. A known month whose rows are filtered away later yields an
    /// empty result, not an error.
    fn resolve(&self, selection: MonthSelection) -> PipelineResult<Option<(Month, Month)>> {
        match selection {
            MonthSelection::All => Ok(None),
            MonthSelection::Single(month) => {
                if self.months.binary_search(&month).is_err() {
                    return Err(PipelineError::NoDataForPeriod { month });
                }
                Ok(Some((month, month)))
            }
            MonthSelection::Range(start, end) => {
                if !self.months.iter().any(|m| *m >= start && *m <= end) {
                    return Err(PipelineError::NoDataForPeriod { month: start });
                }
                Ok(Some((start, end)))
            }
        }
    }
}

fn resident_json(r: &ResidentMonthlyMetric) -> ResidentJson {
    ResidentJson {
        participant_id: r.participant_id.clone(),
        month: r.month,
        income: r.income,
        cost_of_living: r.cost_of_living,
        savings_rate: r.savings_rate,
        cluster: r.cluster,
        age: r.age,
        household_size: r.household_size,
        have_kids: r.have_kids,
        education_level: r.education_level.as_str().to_string(),
    }
}

fn employer_json(e: &EmployerMonthlyMetric) -> EmployerJson {
    EmployerJson {
        employer_id: e.employer_id.clone(),
        month: e.month,
        headcount: e.headcount,
        hires: e.hires,
        quits: e.quits,
        turnover_rate: e.turnover_rate,
        avg_tenure: e.avg_tenure_days,
        stability: e.stability.map(|s| s.as_str().to_string()),
    }
}

fn city_json(c: &CityMonthlyAggregate) -> CityJson {
    CityJson {
        month: c.month,
        gini_income: c.gini_income,
        gini_savings_rate: c.gini_savings_rate,
        sample_size: c.sample_size,
        avg_income: c.avg_income,
        avg_cost_of_living: c.avg_cost_of_living,
    }
}

fn venue_json(v: &VenueMonthlyMetric) -> VenueJson {
    VenueJson {
        venue_id: v.venue_id.clone(),
        venue_type: v.venue_type.as_str().to_string(),
        month: v.month,
        visits: v.visits,
        unique_visitors: v.unique_visitors,
        inferred_spend: v.inferred_spend,
        max_occupancy: v.max_occupancy,
        utilization: v.utilization,
    }
}
