//! Typed raw-input model and the ingestor boundary.
//!
//! The raw log reader (CSV/Parquet mechanics) lives outside this crate;
//! it hands us typed rows through the `RawLogIngestor` trait. Everything
//! here is read-only input: the pipeline never mutates raw events.

use crate::error::PipelineResult;
use crate::fingerprint::DataFingerprint;
use crate::types::{EmployerId, ParticipantId, VenueId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Per-transaction category as recorded in the financial journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnCategory {
    Wage,
    Shelter,
    Food,
    Recreation,
    Education,
    RentAdjustment,
}

impl TxnCategory {
    pub const ALL: [TxnCategory; 6] = [
        TxnCategory::Wage,
        TxnCategory::Shelter,
        TxnCategory::Food,
        TxnCategory::Recreation,
        TxnCategory::Education,
        TxnCategory::RentAdjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnCategory::Wage => "Wage",
            TxnCategory::Shelter => "Shelter",
            TxnCategory::Food => "Food",
            TxnCategory::Recreation => "Recreation",
            TxnCategory::Education => "Education",
            TxnCategory::RentAdjustment => "RentAdjustment",
        }
    }
}

/// Periodic resident state sample (5-minute resolution in the raw log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: NaiveDateTime,
    pub participant_id: ParticipantId,
    pub balance: f64,
    /// Current employer, if employed at sample time.
    pub job_id: Option<EmployerId>,
}

/// One financial journal row. Amounts are signed: wages positive,
/// spending negative, rent adjustments either sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialTransaction {
    pub timestamp: NaiveDateTime,
    pub participant_id: ParticipantId,
    pub category: TxnCategory,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueType {
    Restaurant,
    Pub,
}

impl VenueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueType::Restaurant => "Restaurant",
            VenueType::Pub => "Pub",
        }
    }
}

impl std::str::FromStr for VenueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Restaurant" => Ok(VenueType::Restaurant),
            "Pub" => Ok(VenueType::Pub),
            other => Err(format!("unknown venue type '{other}'")),
        }
    }
}

/// One check-in journal row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIn {
    pub timestamp: NaiveDateTime,
    pub participant_id: ParticipantId,
    pub venue_id: VenueId,
    pub venue_type: VenueType,
}

/// The union of all raw log rows the aggregator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawEvent {
    Status(StatusSnapshot),
    Transaction(FinancialTransaction),
    CheckIn(CheckIn),
}

impl RawEvent {
    pub fn timestamp(&self) -> &NaiveDateTime {
        match self {
            RawEvent::Status(s) => &s.timestamp,
            RawEvent::Transaction(t) => &t.timestamp,
            RawEvent::CheckIn(c) => &c.timestamp,
        }
    }
}

/// Highest attained education level, as recorded in participant metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EducationLevel {
    Low,
    HighSchoolOrCollege,
    Bachelors,
    Graduate,
}

impl EducationLevel {
    pub const ALL: [EducationLevel; 4] = [
        EducationLevel::Low,
        EducationLevel::HighSchoolOrCollege,
        EducationLevel::Bachelors,
        EducationLevel::Graduate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EducationLevel::Low => "Low",
            EducationLevel::HighSchoolOrCollege => "HighSchoolOrCollege",
            EducationLevel::Bachelors => "Bachelors",
            EducationLevel::Graduate => "Graduate",
        }
    }

    /// Ordinal used when a driver analysis needs one numeric axis.
    pub fn ordinal(&self) -> f64 {
        match self {
            EducationLevel::Low => 0.0,
            EducationLevel::HighSchoolOrCollege => 1.0,
            EducationLevel::Bachelors => 2.0,
            EducationLevel::Graduate => 3.0,
        }
    }

    /// Index into the one-hot block of the clustering feature vector.
    pub fn one_hot_index(&self) -> usize {
        match self {
            EducationLevel::Low => 0,
            EducationLevel::HighSchoolOrCollege => 1,
            EducationLevel::Bachelors => 2,
            EducationLevel::Graduate => 3,
        }
    }
}

impl std::str::FromStr for EducationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(EducationLevel::Low),
            "HighSchoolOrCollege" => Ok(EducationLevel::HighSchoolOrCollege),
            "Bachelors" => Ok(EducationLevel::Bachelors),
            "Graduate" => Ok(EducationLevel::Graduate),
            other => Err(format!("unknown education level '{other}'")),
        }
    }
}

/// Static demographic attributes; these do not change per month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantAttributes {
    pub participant_id: ParticipantId,
    pub age: u32,
    pub household_size: u32,
    pub have_kids: bool,
    pub education_level: EducationLevel,
}

/// Static venue metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueInfo {
    pub venue_id: VenueId,
    pub venue_type: VenueType,
    pub max_occupancy: u32,
}

/// The external collaborator that yields typed rows from raw sources.
///
/// `events` may be called once per pipeline run; implementations stream
/// from disk and must not require the whole log in memory.
pub trait RawLogIngestor {
    fn events(&mut self) -> PipelineResult<Box<dyn Iterator<Item = PipelineResult<RawEvent>> + '_>>;

    fn participants(&mut self) -> PipelineResult<Vec<ParticipantAttributes>>;

    fn venues(&mut self) -> PipelineResult<Vec<VenueInfo>>;

    /// Identity of the raw input. Identical inputs must fingerprint
    /// identically across runs, never derived from wall-clock time.
    fn fingerprint(&self) -> PipelineResult<DataFingerprint>;
}

/// In-memory ingestor used by tests and the demo runner.
pub struct MemoryIngestor {
    events: Vec<RawEvent>,
    participants: Vec<ParticipantAttributes>,
    venues: Vec<VenueInfo>,
    fingerprint: DataFingerprint,
}

impl MemoryIngestor {
    pub fn new(
        events: Vec<RawEvent>,
        participants: Vec<ParticipantAttributes>,
        venues: Vec<VenueInfo>,
        fingerprint: DataFingerprint,
    ) -> Self {
        Self {
            events,
            participants,
            venues,
            fingerprint,
        }
    }
}

impl RawLogIngestor for MemoryIngestor {
    fn events(&mut self) -> PipelineResult<Box<dyn Iterator<Item = PipelineResult<RawEvent>> + '_>> {
        Ok(Box::new(self.events.iter().cloned().map(Ok)))
    }

    fn participants(&mut self) -> PipelineResult<Vec<ParticipantAttributes>> {
        Ok(self.participants.clone())
    }

    fn venues(&mut self) -> PipelineResult<Vec<VenueInfo>> {
        Ok(self.venues.clone())
    }

    fn fingerprint(&self) -> PipelineResult<DataFingerprint> {
        Ok(self.fingerprint.clone())
    }
}
