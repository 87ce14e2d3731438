//! Domain data models: patient census records, facility capacity, and the
//! per-slot report documents derived from them.

pub mod patient;
pub mod report;

pub use patient::{CapacityConfig, DiseaseCategory, PatientRecord, PatientStatus};
pub use report::{decode_report, LegacySlotReport, SlotReport, StoredReport};
