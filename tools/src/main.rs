//! pipeline-runner: headless demo runner for the cityscope pipeline.
//!
//! Generates a deterministic synthetic raw log, runs the full pipeline
//! against it, and prints the published analytics.
//!
//! Usage:
//!   pipeline-runner --seed 42 --months 6 --residents 200 --db run.db

use anyhow::Result;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use cityscope_core::config::PipelineConfig;
use cityscope_core::fingerprint::DataFingerprint;
use cityscope_core::pipeline::Pipeline;
use cityscope_core::query::{MonthSelection, QueryService, ResidentFilter};
use cityscope_core::raw::{
    CheckIn, EducationLevel, FinancialTransaction, MemoryIngestor, ParticipantAttributes,
    RawEvent, StatusSnapshot, TxnCategory, VenueInfo, VenueType,
};
use cityscope_core::store::MetricStore;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let months = parse_arg(&args, "--months", 6u32);
    let residents = parse_arg(&args, "--residents", 200usize);
    let employers = parse_arg(&args, "--employers", 12usize);
    let venues = parse_arg(&args, "--venues", 8usize);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str())
        .unwrap_or("data/pipeline_config.json");

    println!("cityscope pipeline-runner");
    println!("  seed:      {seed}");
    println!("  months:    {months}");
    println!("  residents: {residents}");
    println!("  employers: {employers}");
    println!("  venues:    {venues}");
    println!("  db:        {db}");
    println!();

    let cfg = match PipelineConfig::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("config {config_path} unusable ({e}), using built-in defaults");
            PipelineConfig::default_test()
        }
    };

    let mut store = MetricStore::open(db)?;
    store.migrate()?;

    let mut ingestor = generate_city(seed, months, residents, employers, venues);
    let report = Pipeline::new(cfg).run(&mut ingestor, &mut store)?;

    println!("=== RUN SUMMARY ===");
    println!("  fingerprint:   {}", report.fingerprint);
    println!("  cache hit:     {}", report.cache_hit);
    println!("  months:        {}", report.months.len());
    println!("  skipped:       {}", report.skipped.len());
    println!("  degraded:      {}", report.degraded);
    println!("  resident rows: {}", report.resident_rows);
    println!("  employer rows: {}", report.employer_rows);
    println!("  venue rows:    {}", report.venue_rows);
    println!();

    print_analytics(&store)?;
    Ok(())
}

fn print_analytics(store: &MetricStore) -> Result<()> {
    let query = QueryService::latest(store)?;

    println!("=== CITY TIMELINE ===");
    for row in query.city_timeline()? {
        println!(
            "  {} | gini(income): {:.3} | gini(savings): {:.3} | avg income: ${:.0} | n={}",
            row.month, row.gini_income, row.gini_savings_rate, row.avg_income, row.sample_size
        );
    }

    println!();
    println!("=== PERSONAS ===");
    for profile in query.cluster_profiles()? {
        println!(
            "  [{}] {} | members: {} | income: ${:.0} | savings rate: {:.2}",
            profile.cluster_id,
            profile.label,
            profile.member_count,
            profile.centroid.income,
            profile.centroid.savings_rate,
        );
    }

    println!();
    println!("=== TOP DRIVERS ===");
    let drivers = query.drivers(Some(3))?;
    for entry in &drivers.cluster_separation.numeric_eta2 {
        println!("  separation | {:<16} eta2 = {:.3}", entry.feature, entry.eta2);
    }
    for entry in &drivers.savings_predictors.permutation_importance {
        println!(
            "  savings    | {:<16} importance = {:.4}",
            entry.feature, entry.importance_mean
        );
    }

    println!();
    println!("=== EMPLOYER STABILITY (last month) ===");
    if let Some(last) = query.months().last().copied() {
        for row in query.employers(MonthSelection::Single(last))? {
            println!(
                "  {} | headcount: {} | turnover: {} | {}",
                row.employer_id,
                row.headcount,
                row.turnover_rate
                    .map(|t| format!("{t:.2}"))
                    .unwrap_or_else(|| "n/a".to_string()),
                row.stability.unwrap_or_else(|| "unclassified".to_string()),
            );
        }
    }

    let all = query.residents(&ResidentFilter::all())?;
    println!();
    println!("  resident rows queried: {}", all.display.len());
    Ok(())
}

/// Deterministic synthetic city: identical arguments always produce the
/// identical raw log, so reruns hit the processed cache.
fn generate_city(
    seed: u64,
    months: u32,
    residents: usize,
    employers: usize,
    venues: usize,
) -> MemoryIngestor {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2022, 3, 1).expect("valid date");

    let venue_infos: Vec<VenueInfo> = (0..venues)
        .map(|v| VenueInfo {
            venue_id: format!("venue-{v:03}"),
            venue_type: if v % 2 == 0 {
                VenueType::Restaurant
            } else {
                VenueType::Pub
            },
            max_occupancy: rng.gen_range(20..120),
        })
        .collect();

    let participants: Vec<ParticipantAttributes> = (0..residents)
        .map(|p| ParticipantAttributes {
            participant_id: format!("res-{p:04}"),
            age: rng.gen_range(18..75),
            household_size: rng.gen_range(1..6),
            have_kids: rng.gen_bool(0.4),
            education_level: EducationLevel::ALL[rng.gen_range(0..4)],
        })
        .collect();

    // Per-resident economic personality, fixed for the whole run.
    let wages: Vec<f64> = (0..residents)
        .map(|_| rng.gen_range(1_800.0..9_000.0))
        .collect();
    let mut jobs: Vec<Option<usize>> = (0..residents)
        .map(|_| {
            if rng.gen_bool(0.85) {
                Some(rng.gen_range(0..employers))
            } else {
                None
            }
        })
        .collect();

    let mut events = Vec::new();
    for m in 0..months {
        let month_start = add_months(start, m);
        for (p, attrs) in participants.iter().enumerate() {
            let wage = wages[p];

            // Job churn: a small monthly chance to quit or switch.
            if m > 0 && rng.gen_bool(0.06) {
                jobs[p] = if rng.gen_bool(0.7) {
                    Some(rng.gen_range(0..employers))
                } else {
                    None
                };
            }
            let job_id = jobs[p].map(|e| format!("emp-{e:02}"));

            // Four status snapshots spread across the month.
            for week in 0..4u32 {
                let ts = at(month_start, 1 + week * 7, 8, 0);
                events.push(RawEvent::Status(StatusSnapshot {
                    timestamp: ts,
                    participant_id: attrs.participant_id.clone(),
                    balance: wage * rng.gen_range(0.5..3.0),
                    job_id: job_id.clone(),
                }));
            }

            if job_id.is_some() {
                events.push(RawEvent::Transaction(FinancialTransaction {
                    timestamp: at(month_start, 25, 17, 0),
                    participant_id: attrs.participant_id.clone(),
                    category: TxnCategory::Wage,
                    amount: wage,
                }));
            }

            let shelter = wage * rng.gen_range(0.25..0.45);
            let food = wage * rng.gen_range(0.08..0.20);
            let recreation = wage * rng.gen_range(0.02..0.15);
            for (category, amount) in [
                (TxnCategory::Shelter, shelter),
                (TxnCategory::Food, food),
                (TxnCategory::Recreation, recreation),
            ] {
                events.push(RawEvent::Transaction(FinancialTransaction {
                    timestamp: at(month_start, rng.gen_range(2..28), 12, 0),
                    participant_id: attrs.participant_id.clone(),
                    category,
                    amount: -amount,
                }));
            }

            for _ in 0..rng.gen_range(0..5u32) {
                let venue = &venue_infos[rng.gen_range(0..venues)];
                events.push(RawEvent::CheckIn(CheckIn {
                    timestamp: at(month_start, rng.gen_range(1..28), 19, 30),
                    participant_id: attrs.participant_id.clone(),
                    venue_id: venue.venue_id.clone(),
                    venue_type: venue.venue_type,
                }));
            }
        }
    }

    let fingerprint = DataFingerprint::from_string(format!(
        "demo-city:{seed}:{months}:{residents}:{employers}:{venues}"
    ));
    MemoryIngestor::new(events, participants, venue_infos, fingerprint)
}

fn add_months(start: NaiveDate, offset: u32) -> NaiveDate {
    let zero_based = start.month0() + offset;
    let year = start.year() + (zero_based / 12) as i32;
    NaiveDate::from_ymd_opt(year, zero_based % 12 + 1, 1).expect("valid month")
}

fn at(month_start: NaiveDate, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    month_start
        .with_day(day)
        .expect("day within month")
        .and_hms_opt(hour, minute, 0)
        .expect("valid time")
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
