use crate::types::Month;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No qualifying records for period {month}")]
    NoDataForPeriod { month: Month },

    #[error("Degenerate clustering: requested k={requested}, only {usable} usable residents")]
    DegenerateClustering { requested: usize, usable: usize },

    #[error("Stale cache fingerprint: expected {expected}, found {found}")]
    StaleCacheFingerprint { expected: String, found: String },

    #[error("Pipeline run aborted in stage '{stage}': {source}")]
    CorruptPipelineRun {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
