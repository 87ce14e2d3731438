//! Pulseboard reporting core
//!
//! Time-bucketed aggregation and backfill for healthcare facility
//! dashboards: a 6-hour slot calendar on the facility-local clock, per-slot
//! metrics aggregated from the live patient census, gap-free forward-filled
//! slot series, per-facility scheduling, and CSV export of the assembled
//! series.
//!
//! The rendering layer, auth, and the concrete document database live
//! elsewhere; this crate talks to the database through the abstract
//! [`store::ReportStore`] contract.

pub mod aggregate;
pub mod backfill;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod scheduler;
pub mod slots;
pub mod store;

pub use aggregate::Aggregator;
pub use backfill::{BackfillEngine, BackfillOutcome};
pub use config::ReportingPolicy;
pub use error::{ExportError, StoreError};
pub use export::{export_features, export_raw, CsvExport};
pub use models::{CapacityConfig, DiseaseCategory, PatientRecord, PatientStatus, SlotReport};
pub use scheduler::{DomainEvent, Reporting};
pub use slots::{next_slot_boundary, SlotId, SLOT_HOURS};
pub use store::{CensusProvider, MemoryCensus, MemoryStore, ReportStore};
