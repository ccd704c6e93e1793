use chrono::NaiveDate;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("invalid lineage code: {0}")]
    InvalidLineage(String),

    #[error("invalid ISO alpha-2 country code: {0}")]
    InvalidAlpha2(String),

    #[error("invalid ISO alpha-3 country code: {0}")]
    InvalidAlpha3(String),

    #[error("invalid subdivision code: {0}")]
    InvalidSubdivision(String),

    #[error("unknown location: {0}")]
    UnknownLocation(String),

    #[error("source unavailable: {url}: {reason}")]
    SourceUnavailable { url: String, reason: String },

    #[error("no partition under {prefix} within the last {days_checked} days")]
    PartitionNotFound { prefix: String, days_checked: u32 },

    #[error("lineage column already merged: {0}")]
    DuplicateSeries(String),

    #[error("duplicate observation for {date} in series {series}")]
    DuplicateObservation { series: String, date: NaiveDate },

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("reference data error: {0}")]
    Reference(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("missing configuration value: {0}")]
    MissingConfig(String),

    #[error("invalid configuration value for {name}: {reason}")]
    InvalidConfig { name: String, reason: String },
}

impl EtlError {
    /// Whether this failure is confined to the entity being processed.
    /// Entity faults are logged and skipped by the batch loops; anything
    /// else propagates and ends the run.
    pub fn is_entity_fault(&self) -> bool {
        matches!(
            self,
            EtlError::SourceUnavailable { .. }
                | EtlError::UnknownLocation(_)
                | EtlError::InvalidLineage(_)
                | EtlError::InvalidAlpha2(_)
                | EtlError::InvalidAlpha3(_)
                | EtlError::InvalidSubdivision(_)
                | EtlError::DuplicateObservation { .. }
        )
    }
}
