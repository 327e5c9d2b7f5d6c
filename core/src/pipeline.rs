//! Pipeline orchestration: one fingerprint in, one published run out.
//!
//! Stage order is fixed: aggregate, features, cluster, stability,
//! inequality, drivers, publish. Everything up to publish is computed in
//! memory; the store writes the whole run in a single transaction, so a
//! failed run leaves no published rows behind.

use crate::aggregate::{MonthlyAggregator, SkippedMonth};
use crate::cluster::{ClusterAssigner, ClusterProfile};
use crate::config::PipelineConfig;
use crate::drivers::{DriverAnalyzer, DriverReport};
use crate::error::{PipelineError, PipelineResult};
use crate::features::{
    EmployerMonthlyMetric, FeatureBuilder, ResidentMonthlyMetric, VenueMonthlyMetric,
};
use crate::inequality::{CityMonthlyAggregate, InequalityCalculator};
use crate::raw::RawLogIngestor;
use crate::stability;
use crate::store::{MetricStore, RunMeta};
use crate::types::Month;
use std::collections::HashMap;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a completed run publishes.
pub struct ProcessedBundle {
    pub residents: Vec<ResidentMonthlyMetric>,
    pub employers: Vec<EmployerMonthlyMetric>,
    pub venues: Vec<VenueMonthlyMetric>,
    pub city: Vec<CityMonthlyAggregate>,
    pub profiles: Vec<ClusterProfile>,
    pub drivers: DriverReport,
    pub skipped: Vec<SkippedMonth>,
    pub degraded: bool,
}

/// What `Pipeline::run` reports back to the caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub fingerprint: String,
    pub cache_hit: bool,
    pub months: Vec<Month>,
    pub skipped: Vec<SkippedMonth>,
    pub degraded: bool,
    pub resident_rows: usize,
    pub employer_rows: usize,
    pub venue_rows: usize,
}

pub struct Pipeline {
    cfg: PipelineConfig,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Self {
        Self { cfg }
    }

    /// Run the full pipeline against one raw dataset. If the dataset's
    /// fingerprint is already published the stored results are reused
    /// untouched; otherwise any stale partial rows for that fingerprint
    /// are discarded and the run is recomputed from scratch.
    pub fn run(
        &self,
        ingestor: &mut dyn RawLogIngestor,
        store: &mut MetricStore,
    ) -> PipelineResult<RunReport> {
        let fingerprint = ingestor.fingerprint()?;
        let fp = fingerprint.as_str().to_string();

        if store.is_published(&fp)? {
            log::info!("fingerprint {fp}: cache hit, reusing published run");
            let months = store.months(&fp)?;
            let summary = store.run_summary(&fp)?.ok_or_else(|| {
                PipelineError::StaleCacheFingerprint {
                    expected: fp.clone(),
                    found: "missing pipeline_run row".to_string(),
                }
            })?;
            let skipped: Vec<SkippedMonth> =
                serde_json::from_str(&summary.skipped_months_json)?;
            return Ok(RunReport {
                resident_rows: store.resident_row_count(&fp)? as usize,
                employer_rows: store.employer_rows(&fp, None)?.len(),
                venue_rows: store.venue_rows(&fp, None)?.len(),
                fingerprint: fp,
                cache_hit: true,
                months,
                skipped,
                degraded: summary.degraded,
            });
        }

        // Unpublished leftovers from an interrupted run are garbage.
        store.discard(&fp)?;
        let started_at = chrono::Utc::now().to_rfc3339();
        log::info!("fingerprint {fp}: starting full recompute");

        let result = self.compute(ingestor);
        let bundle = match result {
            Ok(bundle) => bundle,
            Err(e) => {
                store.discard(&fp)?;
                return Err(e);
            }
        };

        let meta = RunMeta {
            fingerprint: fp.clone(),
            started_at,
            completed_at: chrono::Utc::now().to_rfc3339(),
            degraded: bundle.degraded,
            engine_version: ENGINE_VERSION.to_string(),
        };
        store.publish(&meta, &bundle)?;
        log::info!(
            "fingerprint {fp}: published {} resident rows over {} months",
            bundle.residents.len(),
            bundle.city.len()
        );

        Ok(RunReport {
            fingerprint: fp,
            cache_hit: false,
            months: bundle.city.iter().map(|c| c.month).collect(),
            skipped: bundle.skipped.clone(),
            degraded: bundle.degraded,
            resident_rows: bundle.residents.len(),
            employer_rows: bundle.employers.len(),
            venue_rows: bundle.venues.len(),
        })
    }

    /// All in-memory stages; nothing here touches the store.
    fn compute(&self, ingestor: &mut dyn RawLogIngestor) -> PipelineResult<ProcessedBundle> {
        let attributes: HashMap<_, _> = stage("ingest", ingestor.participants())?
            .into_iter()
            .map(|a| (a.participant_id.clone(), a))
            .collect();
        let venue_info: HashMap<_, _> = stage("ingest", ingestor.venues())?
            .into_iter()
            .map(|v| (v.venue_id.clone(), v))
            .collect();

        let aggregator = MonthlyAggregator::new(self.cfg.aggregation.clone());
        let events = stage("ingest", ingestor.events())?;
        let agg = stage("aggregate", aggregator.run(events))?;

        let features = FeatureBuilder::new(self.cfg.features.clone());
        let mut feature_set = features.build(&agg, &attributes, &venue_info);

        let assigner = ClusterAssigner::new(self.cfg.clustering.clone());
        let outcome = stage("cluster", assigner.assign(&mut feature_set.residents))?;

        stability::classify_rows(&mut feature_set.employers, &self.cfg.stability);

        let inequality = InequalityCalculator::new(self.cfg.inequality.clone());
        let city = inequality.timeline(&feature_set.residents);

        let drivers = DriverAnalyzer::new(self.cfg.drivers.clone());
        let report = drivers.analyze(&feature_set.residents);

        Ok(ProcessedBundle {
            residents: feature_set.residents,
            employers: feature_set.employers,
            venues: feature_set.venues,
            city,
            profiles: outcome.profiles,
            drivers: report,
            skipped: agg.skipped,
            degraded: outcome.degraded,
        })
    }
}

/// Attach the failing stage to any error bubbling out of it.
fn stage<T>(name: &'static str, result: PipelineResult<T>) -> PipelineResult<T> {
    result.map_err(|e| match e {
        // Domain outcomes keep their identity; callers match on them.
        e @ (PipelineError::NoDataForPeriod { .. }
        | PipelineError::DegenerateClustering { .. }) => e,
        other => PipelineError::CorruptPipelineRun {
            stage: name,
            source: Box::new(other),
        },
    })
}
