//! SQLite persistence for processed metrics.
//!
//! RULE: Only this module talks to the database.
//! Pipeline stages and the query service call store methods; they never
//! execute SQL directly.
//!
//! Every row is keyed by the run fingerprint. A run becomes visible in a
//! single transaction that inserts all of its rows and flips
//! `published`; readers can never observe a half-written run.

use crate::cluster::{ClusterCentroid, ClusterProfile};
use crate::drivers::{DriverReport, FeatureEffect};
use crate::error::PipelineResult;
use crate::features::{EmployerMonthlyMetric, ResidentMonthlyMetric, VenueMonthlyMetric};
use crate::inequality::CityMonthlyAggregate;
use crate::pipeline::ProcessedBundle;
use crate::types::Month;
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;

/// Metadata for the pipeline_run row written at publish time.
pub struct RunMeta {
    pub fingerprint: String,
    pub started_at: String,
    pub completed_at: String,
    pub degraded: bool,
    pub engine_version: String,
}

/// A pipeline_run row as read back.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fingerprint: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub published: bool,
    pub degraded: bool,
    pub engine_version: String,
    pub skipped_months_json: String,
}

pub struct MetricStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for a file
}

impl MetricStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database. For in-memory
    /// databases this returns a fresh, isolated database.
    pub fn reopen(&self) -> PipelineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_schema.sql"))?;
        Ok(())
    }

    // ── Run lifecycle ──────────────────────────────────────────

    pub fn is_published(&self, fingerprint: &str) -> PipelineResult<bool> {
        let published: Option<i64> = self
            .conn
            .query_row(
                "SELECT published FROM pipeline_run WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(published == Some(1))
    }

    /// Fingerprint of the most recently published run, if any.
    pub fn latest_published(&self) -> PipelineResult<Option<String>> {
        let fp: Option<String> = self
            .conn
            .query_row(
                "SELECT fingerprint FROM pipeline_run
                 WHERE published = 1
                 ORDER BY completed_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fp)
    }

    pub fn run_summary(&self, fingerprint: &str) -> PipelineResult<Option<RunSummary>> {
        let summary = self
            .conn
            .query_row(
                "SELECT fingerprint, started_at, completed_at, published,
                        degraded, engine_version, skipped_months
                 FROM pipeline_run WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    Ok(RunSummary {
                        fingerprint: row.get(0)?,
                        started_at: row.get(1)?,
                        completed_at: row.get(2)?,
                        published: row.get::<_, i64>(3)? == 1,
                        degraded: row.get::<_, i64>(4)? == 1,
                        engine_version: row.get(5)?,
                        skipped_months_json: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    /// Write an entire processed run and mark it published, in one
    /// transaction. Either every row lands or none does.
    pub fn publish(&mut self, meta: &RunMeta, bundle: &ProcessedBundle) -> PipelineResult<()> {
        let skipped_json = serde_json::to_string(&bundle.skipped)?;
        let centroids: Vec<(u32, String, u32, String)> = bundle
            .profiles
            .iter()
            .map(|p| {
                serde_json::to_string(&p.centroid)
                    .map(|json| (p.cluster_id, p.label.clone(), p.member_count, json))
            })
            .collect::<Result<_, _>>()?;

        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO pipeline_run
                (fingerprint, started_at, completed_at, published, degraded,
                 engine_version, skipped_months)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
             ON CONFLICT(fingerprint) DO UPDATE SET
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                published = 1,
                degraded = excluded.degraded,
                engine_version = excluded.engine_version,
                skipped_months = excluded.skipped_months",
            params![
                meta.fingerprint,
                meta.started_at,
                meta.completed_at,
                if meta.degraded { 1i32 } else { 0i32 },
                meta.engine_version,
                skipped_json,
            ],
        )?;

        for r in &bundle.residents {
            tx.execute(
                "INSERT INTO resident_metric (
                    fingerprint, participant_id, month,
                    income, cost_of_living, cost_shelter, cost_food,
                    cost_recreation, cost_education, savings_rate,
                    age, household_size, have_kids, education_level, cluster
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                params![
                    meta.fingerprint,
                    r.participant_id,
                    r.month.to_string(),
                    r.income,
                    r.cost_of_living,
                    r.cost_shelter,
                    r.cost_food,
                    r.cost_recreation,
                    r.cost_education,
                    r.savings_rate,
                    r.age,
                    r.household_size,
                    if r.have_kids { 1i32 } else { 0i32 },
                    r.education_level.as_str(),
                    r.cluster,
                ],
            )?;
        }

        for e in &bundle.employers {
            tx.execute(
                "INSERT INTO employer_metric (
                    fingerprint, employer_id, month, headcount, hires, quits,
                    turnover_rate, avg_tenure_days, stability
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    meta.fingerprint,
                    e.employer_id,
                    e.month.to_string(),
                    e.headcount,
                    e.hires,
                    e.quits,
                    e.turnover_rate,
                    e.avg_tenure_days,
                    e.stability.map(|s| s.as_str()),
                ],
            )?;
        }

        for v in &bundle.venues {
            tx.execute(
                "INSERT INTO venue_metric (
                    fingerprint, venue_id, venue_type, month, visits,
                    unique_visitors, inferred_spend, max_occupancy, utilization
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    meta.fingerprint,
                    v.venue_id,
                    v.venue_type.as_str(),
                    v.month.to_string(),
                    v.visits,
                    v.unique_visitors,
                    v.inferred_spend,
                    v.max_occupancy,
                    v.utilization,
                ],
            )?;
        }

        for c in &bundle.city {
            tx.execute(
                "INSERT INTO city_aggregate (
                    fingerprint, month, gini_income, gini_savings_rate,
                    sample_size, avg_income, avg_cost_of_living,
                    avg_cost_shelter, avg_cost_food, avg_cost_recreation,
                    avg_cost_education
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    meta.fingerprint,
                    c.month.to_string(),
                    c.gini_income,
                    c.gini_savings_rate,
                    c.sample_size,
                    c.avg_income,
                    c.avg_cost_of_living,
                    c.avg_cost_shelter,
                    c.avg_cost_food,
                    c.avg_cost_recreation,
                    c.avg_cost_education,
                ],
            )?;
        }

        for (cluster_id, label, member_count, centroid_json) in &centroids {
            tx.execute(
                "INSERT INTO cluster_profile
                    (fingerprint, cluster_id, label, member_count, centroid_json)
                 VALUES (?1,?2,?3,?4,?5)",
                params![meta.fingerprint, cluster_id, label, member_count, centroid_json],
            )?;
        }

        insert_driver_stats(
            &tx,
            &meta.fingerprint,
            "cluster_separation",
            &bundle.drivers.cluster_separation,
        )?;
        insert_driver_stats(
            &tx,
            &meta.fingerprint,
            "savings_predictors",
            &bundle.drivers.savings_predictors,
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Remove every trace of a run (used before recomputing a
    /// fingerprint that was never published).
    pub fn discard(&self, fingerprint: &str) -> PipelineResult<()> {
        for table in [
            "resident_metric",
            "employer_metric",
            "venue_metric",
            "city_aggregate",
            "cluster_profile",
            "driver_stat",
            "pipeline_run",
        ] {
            self.conn.execute(
                &format!("DELETE FROM {table} WHERE fingerprint = ?1"),
                params![fingerprint],
            )?;
        }
        Ok(())
    }

    // ── Readers ────────────────────────────────────────────────

    /// Qualifying months of a run, in chronological order.
    pub fn months(&self, fingerprint: &str) -> PipelineResult<Vec<Month>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT month FROM resident_metric
             WHERE fingerprint = ?1 ORDER BY month ASC",
        )?;
        let months = stmt
            .query_map(params![fingerprint], |row| {
                parse_text::<Month>(0, &row.get::<_, String>(0)?)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(months)
    }

    pub fn resident_rows(
        &self,
        fingerprint: &str,
        range: Option<(Month, Month)>,
        have_kids: Option<bool>,
        cluster: Option<u32>,
    ) -> PipelineResult<Vec<ResidentMonthlyMetric>> {
        let mut stmt = self.conn.prepare(
            "SELECT participant_id, month, income, cost_of_living,
                    cost_shelter, cost_food, cost_recreation, cost_education,
                    savings_rate, age, household_size, have_kids,
                    education_level, cluster
             FROM resident_metric
             WHERE fingerprint = ?1
               AND (?2 IS NULL OR month >= ?2)
               AND (?3 IS NULL OR month <= ?3)
               AND (?4 IS NULL OR have_kids = ?4)
               AND (?5 IS NULL OR cluster = ?5)
             ORDER BY month ASC, participant_id ASC",
        )?;
        let rows = stmt
            .query_map(
                params![
                    fingerprint,
                    range.map(|(start, _)| start.to_string()),
                    range.map(|(_, end)| end.to_string()),
                    have_kids.map(|b| if b { 1i32 } else { 0i32 }),
                    cluster,
                ],
                |row| {
                    Ok(ResidentMonthlyMetric {
                        participant_id: row.get(0)?,
                        month: parse_text(1, &row.get::<_, String>(1)?)?,
                        income: row.get(2)?,
                        cost_of_living: row.get(3)?,
                        cost_shelter: row.get(4)?,
                        cost_food: row.get(5)?,
                        cost_recreation: row.get(6)?,
                        cost_education: row.get(7)?,
                        savings_rate: row.get(8)?,
                        age: row.get(9)?,
                        household_size: row.get(10)?,
                        have_kids: row.get::<_, i32>(11)? != 0,
                        education_level: parse_text(12, &row.get::<_, String>(12)?)?,
                        cluster: row.get(13)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn employer_rows(
        &self,
        fingerprint: &str,
        range: Option<(Month, Month)>,
    ) -> PipelineResult<Vec<EmployerMonthlyMetric>> {
        let mut stmt = self.conn.prepare(
            "SELECT employer_id, month, headcount, hires, quits,
                    turnover_rate, avg_tenure_days, stability
             FROM employer_metric
             WHERE fingerprint = ?1
               AND (?2 IS NULL OR month >= ?2)
               AND (?3 IS NULL OR month <= ?3)
             ORDER BY month ASC, employer_id ASC",
        )?;
        let rows = stmt
            .query_map(
                params![
                    fingerprint,
                    range.map(|(start, _)| start.to_string()),
                    range.map(|(_, end)| end.to_string()),
                ],
                |row| {
                    let stability: Option<String> = row.get(7)?;
                    Ok(EmployerMonthlyMetric {
                        employer_id: row.get(0)?,
                        month: parse_text(1, &row.get::<_, String>(1)?)?,
                        headcount: row.get(2)?,
                        hires: row.get(3)?,
                        quits: row.get(4)?,
                        turnover_rate: row.get(5)?,
                        avg_tenure_days: row.get(6)?,
                        stability: stability.map(|s| parse_text(7, &s)).transpose()?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn venue_rows(
        &self,
        fingerprint: &str,
        range: Option<(Month, Month)>,
    ) -> PipelineResult<Vec<VenueMonthlyMetric>> {
        let mut stmt = self.conn.prepare(
            "SELECT venue_id, venue_type, month, visits, unique_visitors,
                    inferred_spend, max_occupancy, utilization
             FROM venue_metric
             WHERE fingerprint = ?1
               AND (?2 IS NULL OR month >= ?2)
               AND (?3 IS NULL OR month <= ?3)
             ORDER BY month ASC, venue_id ASC",
        )?;
        let rows = stmt
            .query_map(
                params![
                    fingerprint,
                    range.map(|(start, _)| start.to_string()),
                    range.map(|(_, end)| end.to_string()),
                ],
                |row| {
                    Ok(VenueMonthlyMetric {
                        venue_id: row.get(0)?,
                        venue_type: parse_text(1, &row.get::<_, String>(1)?)?,
                        month: parse_text(2, &row.get::<_, String>(2)?)?,
                        visits: row.get(3)?,
                        unique_visitors: row.get(4)?,
                        inferred_spend: row.get(5)?,
                        max_occupancy: row.get(6)?,
                        utilization: row.get(7)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn city_timeline(&self, fingerprint: &str) -> PipelineResult<Vec<CityMonthlyAggregate>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, gini_income, gini_savings_rate, sample_size,
                    avg_income, avg_cost_of_living, avg_cost_shelter,
                    avg_cost_food, avg_cost_recreation, avg_cost_education
             FROM city_aggregate
             WHERE fingerprint = ?1 ORDER BY month ASC",
        )?;
        let rows = stmt
            .query_map(params![fingerprint], |row| {
                Ok(CityMonthlyAggregate {
                    month: parse_text(0, &row.get::<_, String>(0)?)?,
                    gini_income: row.get(1)?,
                    gini_savings_rate: row.get(2)?,
                    sample_size: row.get(3)?,
                    avg_income: row.get(4)?,
                    avg_cost_of_living: row.get(5)?,
                    avg_cost_shelter: row.get(6)?,
                    avg_cost_food: row.get(7)?,
                    avg_cost_recreation: row.get(8)?,
                    avg_cost_education: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn cluster_profiles(&self, fingerprint: &str) -> PipelineResult<Vec<ClusterProfile>> {
        let mut stmt = self.conn.prepare(
            "SELECT cluster_id, label, member_count, centroid_json
             FROM cluster_profile
             WHERE fingerprint = ?1 ORDER BY cluster_id ASC",
        )?;
        let raw = stmt
            .query_map(params![fingerprint], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut profiles = Vec::with_capacity(raw.len());
        for (cluster_id, label, member_count, centroid_json) in raw {
            let centroid: ClusterCentroid = serde_json::from_str(&centroid_json)?;
            profiles.push(ClusterProfile {
                cluster_id,
                label,
                member_count,
                centroid,
            });
        }
        Ok(profiles)
    }

    /// Ranked effects for one analysis, truncated to `top_n` if given.
    pub fn driver_stats(
        &self,
        fingerprint: &str,
        analysis: &str,
        top_n: Option<usize>,
    ) -> PipelineResult<Vec<FeatureEffect>> {
        let mut stmt = self.conn.prepare(
            "SELECT feature, value FROM driver_stat
             WHERE fingerprint = ?1 AND analysis = ?2
             ORDER BY rank ASC LIMIT ?3",
        )?;
        let effects = stmt
            .query_map(
                params![fingerprint, analysis, top_n.map(|n| n as i64).unwrap_or(-1)],
                |row| {
                    Ok(FeatureEffect {
                        feature: row.get(0)?,
                        value: row.get(1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(effects)
    }

    pub fn driver_report(&self, fingerprint: &str) -> PipelineResult<DriverReport> {
        Ok(DriverReport {
            cluster_separation: self.driver_stats(fingerprint, "cluster_separation", None)?,
            savings_predictors: self.driver_stats(fingerprint, "savings_predictors", None)?,
        })
    }

    // ── Test helpers ───────────────────────────────────────────

    pub fn resident_row_count(&self, fingerprint: &str) -> PipelineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM resident_metric WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

fn insert_driver_stats(
    tx: &rusqlite::Transaction<'_>,
    fingerprint: &str,
    analysis: &str,
    effects: &[FeatureEffect],
) -> PipelineResult<()> {
    for (rank, effect) in effects.iter().enumerate() {
        tx.execute(
            "INSERT INTO driver_stat (fingerprint, analysis, feature, rank, value)
             VALUES (?1,?2,?3,?4,?5)",
            params![fingerprint, analysis, effect.feature, rank as i64, effect.value],
        )?;
    }
    Ok(())
}

fn parse_text<T: FromStr<Err = String>>(idx: usize, s: &str) -> rusqlite::Result<T> {
    s.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}
