//! Driver analysis: eta² cluster separation and permutation importance.

mod common;

use cityscope_core::config::DriverConfig;
use cityscope_core::drivers::DriverAnalyzer;
use cityscope_core::features::ResidentMonthlyMetric;
use cityscope_core::raw::EducationLevel;
use cityscope_core::types::Month;

fn analyzer() -> DriverAnalyzer {
    DriverAnalyzer::new(DriverConfig {
        permutation_repeats: 5,
        seed: 7,
    })
}

/// 30 residents whose savings rate is a pure linear function of income,
/// clustered into three income bands. Everything else varies in
/// patterns unrelated to income.
fn population() -> Vec<ResidentMonthlyMetric> {
    let month = Month::new(2022, 4);
    (0..30usize)
        .map(|i| {
            let income = 1000.0 + i as f64 * 100.0;
            ResidentMonthlyMetric {
                participant_id: format!("res-{i:02}"),
                month,
                income,
                cost_of_living: 700.0,
                cost_shelter: 700.0,
                cost_food: 0.0,
                cost_recreation: 0.0,
                cost_education: 0.0,
                savings_rate: Some(0.1 + income / 50_000.0),
                age: 25 + (i as u32 * 7) % 30,
                household_size: (i % 3) as u32 + 1,
                have_kids: i % 2 == 0,
                education_level: EducationLevel::ALL[i % 4],
                cluster: Some((i / 10) as u32),
            }
        })
        .collect()
}

#[test]
fn income_separates_the_income_banded_clusters() {
    let report = analyzer().analyze(&population());
    let eta2 = |name: &str| {
        report
            .cluster_separation
            .iter()
            .find(|e| e.feature == name)
            .unwrap_or_else(|| panic!("missing feature {name}"))
            .value
    };

    assert!(eta2("Income") > 0.8, "income defines the bands");
    assert!(eta2("haveKids") < 0.1, "kid parity is unrelated to the bands");

    // Ranking is descending by effect size.
    let values: Vec<f64> = report.cluster_separation.iter().map(|e| e.value).collect();
    assert!(values.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn known_strong_predictor_ranks_first_for_savings() {
    let report = analyzer().analyze(&population());
    assert_eq!(report.savings_predictors[0].feature, "Income");
    assert!(
        report.savings_predictors[0].value > 0.5,
        "breaking the income column must destroy most of the fit"
    );
    assert!(
        !report
            .savings_predictors
            .iter()
            .any(|e| e.feature == "SavingsRate"),
        "the target is never its own predictor"
    );
}

#[test]
fn analysis_is_deterministic() {
    let a = analyzer().analyze(&population());
    let b = analyzer().analyze(&population());
    let flat = |r: &cityscope_core::drivers::DriverReport| -> Vec<(String, f64)> {
        r.cluster_separation
            .iter()
            .chain(&r.savings_predictors)
            .map(|e| (e.feature.clone(), e.value))
            .collect()
    };
    assert_eq!(flat(&a), flat(&b));
}

#[test]
fn eta2_covers_every_feature_including_the_target() {
    let report = analyzer().analyze(&population());
    assert_eq!(report.cluster_separation.len(), 7);
    assert!(report
        .cluster_separation
        .iter()
        .any(|e| e.feature == "SavingsRate"));
    // Six predictors: the full feature set minus the target.
    assert_eq!(report.savings_predictors.len(), 6);
}

#[test]
fn too_few_rows_yield_empty_reports_not_garbage() {
    let rows: Vec<ResidentMonthlyMetric> = population().into_iter().take(3).collect();
    let report = analyzer().analyze(&rows);
    assert!(report.savings_predictors.is_empty());
}
