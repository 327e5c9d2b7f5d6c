//! Employer stability classification.
//!
//! Pure function of (turnover rate, average tenure) against two
//! independently configured boundaries. Moderate turnover with moderate
//! tenure lands in the Normal band between them, in neither extreme.
//!
//! Boundary convention (pinned by tests): strict comparisons on the
//! extreme sides. A turnover exactly at `turnover_high` is neither
//! HighRisk nor Stable-eligible on the turnover axis.

use crate::config::StabilityThresholds;
use crate::features::EmployerMonthlyMetric;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityCategory {
    HighRisk,
    Normal,
    Stable,
}

impl StabilityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StabilityCategory::HighRisk => "high_risk",
            StabilityCategory::Normal => "normal",
            StabilityCategory::Stable => "stable",
        }
    }
}

impl FromStr for StabilityCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_risk" => Ok(StabilityCategory::HighRisk),
            "normal" => Ok(StabilityCategory::Normal),
            "stable" => Ok(StabilityCategory::Stable),
            other => Err(format!("unknown stability category '{other}'")),
        }
    }
}

/// Classify one employer-month from its turnover rate and tenure.
pub fn classify(
    turnover_rate: f64,
    avg_tenure_days: f64,
    thresholds: &StabilityThresholds,
) -> StabilityCategory {
    if turnover_rate > thresholds.turnover_high && avg_tenure_days < thresholds.tenure_low_days {
        StabilityCategory::HighRisk
    } else if turnover_rate < thresholds.turnover_high
        && avg_tenure_days > thresholds.tenure_high_days
    {
        StabilityCategory::Stable
    } else {
        StabilityCategory::Normal
    }
}

/// Classify every row that has both inputs defined. Rows with an
/// undefined turnover rate or no resolvable tenure stay unclassified:
/// defaulting tenure to zero would bias employers toward HighRisk, and
/// defaulting turnover to zero would bias them toward Stable.
pub fn classify_rows(rows: &mut [EmployerMonthlyMetric], thresholds: &StabilityThresholds) {
    for row in rows {
        row.stability = match (row.turnover_rate, row.avg_tenure_days) {
            (Some(turnover), Some(tenure)) => Some(classify(turnover, tenure, thresholds)),
            _ => None,
        };
    }
}
