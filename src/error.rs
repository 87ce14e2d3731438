//! Error taxonomy for the reporting subsystem.
//!
//! Store failures are transient by contract: callers on patient-care paths
//! log them and move on, and the scheduler's next run is the retry. Only the
//! export surface reports a failure to the end user, and only the "nothing
//! to export" case.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid facility id: {0:?}")]
    InvalidFacility(String),

    #[error("document read failed: {0}")]
    Read(String),

    #[error("document write failed: {0}")]
    Write(String),

    #[error("document serialization failed: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no slot reports to export for facility {0}")]
    Empty(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("export buffer error: {0}")]
    Buffer(String),
}
