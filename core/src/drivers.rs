//! Driver analysis: which features separate the personas, and which
//! predict the savings rate.
//!
//! Both computations summarize the full resident population (one
//! representative row per participant), not a single month, so they are
//! cached alongside the monthly bundle and truncated by `top_n` only at
//! query time.

use crate::config::DriverConfig;
use crate::features::ResidentMonthlyMetric;
use crate::types::ParticipantId;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dashboard-facing feature names, in declaration order.
const FEATURES: [&str; 7] = [
    "Income",
    "CostOfLiving",
    "SavingsRate",
    "householdSize",
    "age",
    "haveKids",
    "educationLevel",
];

/// Index of SavingsRate in `FEATURES`; it is the regression target and
/// never a predictor.
const TARGET: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEffect {
    pub feature: String,
    pub value: f64,
}

/// Ranked effect sizes for both analyses, full length (no truncation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverReport {
    pub cluster_separation: Vec<FeatureEffect>,
    pub savings_predictors: Vec<FeatureEffect>,
}

/// One representative row per participant: per-month means for the
/// monetary features, static demographics, assigned cluster.
struct ParticipantRow {
    features: [f64; FEATURES.len()],
    cluster: Option<u32>,
}

pub struct DriverAnalyzer {
    cfg: DriverConfig,
}

impl DriverAnalyzer {
    pub fn new(cfg: DriverConfig) -> Self {
        Self { cfg }
    }

    pub fn analyze(&self, residents: &[ResidentMonthlyMetric]) -> DriverReport {
        let rows = build_rows(residents);
        DriverReport {
            cluster_separation: self.cluster_separation(&rows),
            savings_predictors: self.savings_predictors(&rows),
        }
    }

    /// Eta² per feature: between-cluster sum of squares over total sum
    /// of squares, ranked descending.
    fn cluster_separation(&self, rows: &[ParticipantRow]) -> Vec<FeatureEffect> {
        let clustered: Vec<&ParticipantRow> = rows.iter().filter(|r| r.cluster.is_some()).collect();
        if clustered.len() < 2 {
            return Vec::new();
        }

        let mut effects: Vec<FeatureEffect> = FEATURES
            .iter()
            .enumerate()
            .map(|(f, name)| {
                let values: Vec<f64> = clustered.iter().map(|r| r.features[f]).collect();
                let grand_mean = values.iter().sum::<f64>() / values.len() as f64;
                let total_ss: f64 = values.iter().map(|v| (v - grand_mean).powi(2)).sum();

                let mut groups: BTreeMap<u32, (f64, u32)> = BTreeMap::new();
                for row in &clustered {
                    let entry = groups
                        .entry(row.cluster.expect("filtered to clustered rows"))
                        .or_insert((0.0, 0));
                    entry.0 += row.features[f];
                    entry.1 += 1;
                }
                let between_ss: f64 = groups
                    .values()
                    .map(|(sum, n)| {
                        let mean = sum / *n as f64;
                        *n as f64 * (mean - grand_mean).powi(2)
                    })
                    .sum();

                let eta2 = if total_ss > 1e-12 {
                    between_ss / total_ss
                } else {
                    0.0
                };
                FeatureEffect {
                    feature: (*name).to_string(),
                    value: eta2,
                }
            })
            .collect();

        effects.sort_by(|a, b| b.value.partial_cmp(&a.value).expect("non-NaN eta2"));
        effects
    }

    /// Permutation importance against an OLS baseline predicting the
    /// savings rate: mean ΔR² over deterministic shuffles per feature,
    /// ranked descending.
    fn savings_predictors(&self, rows: &[ParticipantRow]) -> Vec<FeatureEffect> {
        let predictors: Vec<usize> = (0..FEATURES.len()).filter(|f| *f != TARGET).collect();
        let n = rows.len();
        if n <= predictors.len() + 1 {
            return Vec::new();
        }

        let x: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| predictors.iter().map(|f| r.features[*f]).collect())
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| r.features[TARGET]).collect();

        let model = match OlsModel::fit(&x, &y) {
            Some(model) => model,
            None => return Vec::new(),
        };
        let baseline_r2 = model.r_squared(&x, &y);

        let mut rng = Pcg64Mcg::seed_from_u64(self.cfg.seed);
        let mut effects: Vec<FeatureEffect> = predictors
            .iter()
            .enumerate()
            .map(|(col, f)| {
                let mut delta_sum = 0.0;
                for _ in 0..self.cfg.permutation_repeats {
                    let mut shuffled = x.clone();
                    permute_column(&mut shuffled, col, &mut rng);
                    delta_sum += baseline_r2 - model.r_squared(&shuffled, &y);
                }
                FeatureEffect {
                    feature: FEATURES[*f].to_string(),
                    value: delta_sum / self.cfg.permutation_repeats as f64,
                }
            })
            .collect();

        effects.sort_by(|a, b| b.value.partial_cmp(&a.value).expect("non-NaN importance"));
        effects
    }
}

fn build_rows(residents: &[ResidentMonthlyMetric]) -> Vec<ParticipantRow> {
    struct Acc {
        income: f64,
        cost: f64,
        savings: f64,
        savings_n: u32,
        months: u32,
        household_size: u32,
        age: u32,
        have_kids: bool,
        education: f64,
        cluster: Option<u32>,
    }

    let mut by_participant: BTreeMap<&ParticipantId, Acc> = BTreeMap::new();
    for row in residents {
        let acc = by_participant.entry(&row.participant_id).or_insert(Acc {
            income: 0.0,
            cost: 0.0,
            savings: 0.0,
            savings_n: 0,
            months: 0,
            household_size: row.household_size,
            age: row.age,
            have_kids: row.have_kids,
            education: row.education_level.ordinal(),
            cluster: row.cluster,
        });
        acc.income += row.income;
        acc.cost += row.cost_of_living;
        acc.months += 1;
        if let Some(rate) = row.savings_rate {
            acc.savings += rate;
            acc.savings_n += 1;
        }
        if acc.cluster.is_none() {
            acc.cluster = row.cluster;
        }
    }

    by_participant
        .into_values()
        .filter(|acc| acc.savings_n > 0)
        .map(|acc| ParticipantRow {
            features: [
                acc.income / acc.months as f64,
                acc.cost / acc.months as f64,
                acc.savings / acc.savings_n as f64,
                acc.household_size as f64,
                acc.age as f64,
                if acc.have_kids { 1.0 } else { 0.0 },
                acc.education,
            ],
            cluster: acc.cluster,
        })
        .collect()
}

fn permute_column(x: &mut [Vec<f64>], col: usize, rng: &mut Pcg64Mcg) {
    // Fisher-Yates over the column values.
    for i in (1..x.len()).rev() {
        let j = rng.gen_range(0..=i);
        let tmp = x[i][col];
        x[i][col] = x[j][col];
        x[j][col] = tmp;
    }
}

/// Ordinary least squares with an intercept; a small ridge term keeps
/// the normal equations solvable under collinearity.
struct OlsModel {
    /// Coefficients, intercept first.
    beta: Vec<f64>,
}

impl OlsModel {
    fn fit(x: &[Vec<f64>], y: &[f64]) -> Option<Self> {
        let n = x.len();
        let p = x[0].len() + 1; // intercept column

        // Normal equations: (XᵀX + λI) β = Xᵀy.
        let mut xtx = vec![vec![0.0; p]; p];
        let mut xty = vec![0.0; p];
        for (row, target) in x.iter().zip(y) {
            let mut design = Vec::with_capacity(p);
            design.push(1.0);
            design.extend_from_slice(row);
            for i in 0..p {
                xty[i] += design[i] * target;
                for j in 0..p {
                    xtx[i][j] += design[i] * design[j];
                }
            }
        }
        let ridge = 1e-8 * n as f64;
        for (i, row) in xtx.iter_mut().enumerate() {
            row[i] += ridge;
        }

        solve(xtx, xty).map(|beta| Self { beta })
    }

    fn predict(&self, row: &[f64]) -> f64 {
        self.beta[0]
            + row
                .iter()
                .zip(&self.beta[1..])
                .map(|(x, b)| x * b)
                .sum::<f64>()
    }

    fn r_squared(&self, x: &[Vec<f64>], y: &[f64]) -> f64 {
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
        if ss_tot <= 1e-12 {
            return 0.0;
        }
        let ss_res: f64 = x
            .iter()
            .zip(y)
            .map(|(row, target)| (target - self.predict(row)).powi(2))
            .sum();
        1.0 - ss_res / ss_tot
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|i, j| {
                a[*i][col]
                    .abs()
                    .partial_cmp(&a[*j][col].abs())
                    .expect("non-NaN pivot")
            })
            .expect("non-empty system");
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for col in (row + 1)..n {
            acc -= a[row][col] * x[col];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}
