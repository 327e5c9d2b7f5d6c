//! Pipeline configuration.
//!
//! Every threshold that used to live as a literal in the dashboard code
//! (45% turnover, 120/200-day tenure bands, warm-up skip) is a named,
//! injectable parameter here. Load from `data/pipeline_config.json`; in
//! tests use `PipelineConfig::default_test()`.

use crate::raw::TxnCategory;
use crate::types::Month;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Number of leading calendar months dropped as warm-up. The first
    /// month of the source simulation is incomplete by construction;
    /// set to 0 to keep everything.
    pub warmup_months: usize,
    /// A resident-month needs at least this many status snapshots to be
    /// aggregated; thinner months are excluded, not partially filled.
    pub min_snapshots_per_month: u32,
    /// Events outside this inclusive month range are rejected and
    /// counted. None accepts any month.
    pub expected_range: Option<(Month, Month)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Categories summed (as absolute values) into CostOfLiving.
    /// Wage and RentAdjustment never belong here.
    pub cost_categories: Vec<TxnCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Requested number of behavioral personas.
    pub k: usize,
    pub max_iterations: usize,
    /// Master seed for k-means++ init. The canonical post-fit ordering
    /// makes cluster ids independent of this seed on converged fits.
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityThresholds {
    /// Turnover above this (strictly) is the HighRisk side.
    pub turnover_high: f64,
    /// Tenure below this (strictly, in days) is the HighRisk side.
    pub tenure_low_days: f64,
    /// Tenure above this (strictly, in days) is the Stable side. The
    /// band between tenure_low_days and tenure_high_days classifies as
    /// Normal; the two boundaries are not complements.
    pub tenure_high_days: f64,
}

/// How Gini treats negative inputs (e.g. negative savings rates).
/// One rule, applied by the calculator itself for every input vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegativePolicy {
    /// Drop negative values before computing.
    Exclude,
    /// Clip negative values to zero.
    Clip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InequalityConfig {
    pub negative_policy: NegativePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Shuffles per feature when measuring permutation importance.
    pub permutation_repeats: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub aggregation: AggregationConfig,
    pub features: FeatureConfig,
    pub clustering: ClusterConfig,
    pub stability: StabilityThresholds,
    pub inequality: InequalityConfig,
    pub drivers: DriverConfig,
}

impl PipelineConfig {
    /// Load from a JSON config file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.clustering.k == 0 {
            anyhow::bail!("clustering.k must be at least 1");
        }
        if self.stability.tenure_low_days > self.stability.tenure_high_days {
            anyhow::bail!(
                "stability.tenure_low_days ({}) must not exceed tenure_high_days ({})",
                self.stability.tenure_low_days,
                self.stability.tenure_high_days
            );
        }
        for cat in &self.features.cost_categories {
            if matches!(cat, TxnCategory::Wage | TxnCategory::RentAdjustment) {
                anyhow::bail!("{} is not a cost-of-living category", cat.as_str());
            }
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            aggregation: AggregationConfig {
                warmup_months: 1,
                min_snapshots_per_month: 2,
                expected_range: None,
            },
            features: FeatureConfig {
                cost_categories: vec![
                    TxnCategory::Shelter,
                    TxnCategory::Food,
                    TxnCategory::Recreation,
                    TxnCategory::Education,
                ],
            },
            clustering: ClusterConfig {
                k: 3,
                max_iterations: 100,
                seed: 42,
            },
            stability: StabilityThresholds {
                turnover_high: 0.45,
                tenure_low_days: 120.0,
                tenure_high_days: 200.0,
            },
            inequality: InequalityConfig {
                negative_policy: NegativePolicy::Exclude,
            },
            drivers: DriverConfig {
                permutation_repeats: 5,
                seed: 7,
            },
        }
    }
}
