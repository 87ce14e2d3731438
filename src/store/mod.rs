//! Report store adapter: the abstract contract over the remote document
//! database, plus read-only census access.
//!
//! The concrete database client is an external collaborator. This subsystem
//! only needs per-facility collections of JSON documents with key-ordered
//! listing, point reads, upsert-with-merge, and change notification.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::models::{CapacityConfig, PatientRecord};

pub mod memory;

pub use memory::{MemoryCensus, MemoryStore};

/// Collection name under which slot reports are persisted, one document per
/// slot, keyed by the slot identifier string.
pub const REPORTS_COLLECTION: &str = "slot_reports";

/// Change notification emitted on every successful upsert.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: String,
    pub key: String,
}

/// Persistent per-facility document store.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// All documents in a collection, ordered by key.
    async fn list(
        &self,
        facility_id: &str,
        collection: &str,
    ) -> Result<Vec<(String, Value)>, StoreError>;

    /// Point read of one document.
    async fn get(
        &self,
        facility_id: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Write one document. With `merge`, top-level fields of `value`
    /// overwrite and fields absent from it are preserved; without, the
    /// document is replaced wholesale.
    async fn upsert(
        &self,
        facility_id: &str,
        collection: &str,
        key: &str,
        value: Value,
        merge: bool,
    ) -> Result<(), StoreError>;

    /// Subscribe to additions and updates in a facility's collection.
    fn subscribe(&self, facility_id: &str, collection: &str) -> broadcast::Receiver<ChangeEvent>;
}

/// Read-only snapshot access to a facility's patient census and capacity
/// configuration. This subsystem never mutates either.
#[async_trait]
pub trait CensusProvider: Send + Sync {
    async fn patients(&self, facility_id: &str) -> Result<Vec<PatientRecord>, StoreError>;
    async fn capacity(&self, facility_id: &str) -> Result<CapacityConfig, StoreError>;
}

/// Format check on facility identifiers before they become store namespaces.
/// The only authorization-adjacent validation in scope.
pub fn validate_facility_id(facility_id: &str) -> Result<(), StoreError> {
    let well_formed = !facility_id.is_empty()
        && facility_id.len() <= 64
        && facility_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(StoreError::InvalidFacility(facility_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facility_id_format() {
        assert!(validate_facility_id("st-marys_icu-3").is_ok());
        assert!(validate_facility_id("").is_err());
        assert!(validate_facility_id("a/b").is_err());
        assert!(validate_facility_id("ward 7").is_err());
        assert!(validate_facility_id(&"x".repeat(65)).is_err());
    }
}
