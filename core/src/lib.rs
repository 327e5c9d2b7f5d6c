//! cityscope-core: the aggregation and derived-analytics engine behind
//! the Cityscope dashboards.
//!
//! The engine turns a multi-year, 5-minute-resolution simulation log of
//! a synthetic city (status snapshots, financial transactions, venue
//! check-ins) into compact monthly per-entity metrics:
//!
//!   1. MonthlyAggregator    - one streaming pass, month buckets
//!   2. FeatureBuilder       - typed metric rows, sentinels for undefined ratios
//!   3. ClusterAssigner      - persistent behavioral personas (k-means)
//!   4. StabilityClassifier  - employer HighRisk / Normal / Stable bands
//!   5. InequalityCalculator - Gini timeline
//!   6. DriverAnalyzer       - eta² separation + permutation importance
//!   7. MetricStore          - fingerprint-keyed cache, atomic publish
//!   8. QueryService         - filtered reads for the API layer
//!
//! RULES:
//!   - Only the store module talks to SQLite.
//!   - All randomness flows through seeded Pcg64Mcg streams.
//!   - Derived rows are rebuilt wholesale per run; a failed run never
//!     publishes and the previous cache stays authoritative.

pub mod aggregate;
pub mod cluster;
pub mod config;
pub mod drivers;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod inequality;
pub mod pipeline;
pub mod query;
pub mod raw;
pub mod stability;
pub mod store;
pub mod types;
