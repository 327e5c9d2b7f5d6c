//! Inequality indices: Gini coefficients and the city timeline.
//!
//! One negative-value rule lives here and nowhere else: the configured
//! policy (default: exclude) is applied by `gini` itself to every input
//! vector, so income and savings-rate distributions are always treated
//! identically.

use crate::config::{InequalityConfig, NegativePolicy};
use crate::features::ResidentMonthlyMetric;
use crate::types::Month;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// City-wide monthly aggregate derived purely from resident rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityMonthlyAggregate {
    pub month: Month,
    pub gini_income: f64,
    pub gini_savings_rate: f64,
    pub sample_size: u32,
    pub avg_income: f64,
    pub avg_cost_of_living: f64,
    pub avg_cost_shelter: f64,
    pub avg_cost_food: f64,
    pub avg_cost_recreation: f64,
    pub avg_cost_education: f64,
}

pub struct InequalityCalculator {
    cfg: InequalityConfig,
}

impl InequalityCalculator {
    pub fn new(cfg: InequalityConfig) -> Self {
        Self { cfg }
    }

    /// Gini coefficient over a value vector:
    /// G = (2·Σ i·yᵢ) / (n·Σyᵢ) − (n+1)/n, yᵢ ascending, i 1-indexed.
    ///
    /// Degenerate inputs (n ≤ 1, all equal, zero sum) return 0.0, never
    /// NaN. Negative values are handled by the configured policy before
    /// anything else.
    pub fn gini(&self, values: &[f64]) -> f64 {
        let mut values: Vec<f64> = match self.cfg.negative_policy {
            NegativePolicy::Exclude => values.iter().copied().filter(|v| *v >= 0.0).collect(),
            NegativePolicy::Clip => values.iter().map(|v| v.max(0.0)).collect(),
        };
        let n = values.len();
        if n <= 1 {
            return 0.0;
        }
        values.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN values"));

        let sum: f64 = values.iter().sum();
        if sum <= 0.0 {
            return 0.0;
        }

        let weighted: f64 = values
            .iter()
            .enumerate()
            .map(|(i, y)| (i as f64 + 1.0) * y)
            .sum();
        let n = n as f64;
        (2.0 * weighted) / (n * sum) - (n + 1.0) / n
    }

    /// One CityMonthlyAggregate per month, in chronological order.
    /// Savings-rate Gini uses defined rates only; sentinel rows still
    /// count toward sample_size and the spending averages.
    pub fn timeline(&self, residents: &[ResidentMonthlyMetric]) -> Vec<CityMonthlyAggregate> {
        let mut by_month: BTreeMap<Month, Vec<&ResidentMonthlyMetric>> = BTreeMap::new();
        for row in residents {
            by_month.entry(row.month).or_default().push(row);
        }

        by_month
            .into_iter()
            .map(|(month, rows)| {
                let n = rows.len() as f64;
                let incomes: Vec<f64> = rows.iter().map(|r| r.income).collect();
                let rates: Vec<f64> = rows.iter().filter_map(|r| r.savings_rate).collect();

                CityMonthlyAggregate {
                    month,
                    gini_income: self.gini(&incomes),
                    gini_savings_rate: self.gini(&rates),
                    sample_size: rows.len() as u32,
                    avg_income: incomes.iter().sum::<f64>() / n,
                    avg_cost_of_living: rows.iter().map(|r| r.cost_of_living).sum::<f64>() / n,
                    avg_cost_shelter: rows.iter().map(|r| r.cost_shelter).sum::<f64>() / n,
                    avg_cost_food: rows.iter().map(|r| r.cost_food).sum::<f64>() / n,
                    avg_cost_recreation: rows.iter().map(|r| r.cost_recreation).sum::<f64>() / n,
                    avg_cost_education: rows.iter().map(|r| r.cost_education).sum::<f64>() / n,
                }
            })
            .collect()
    }
}
