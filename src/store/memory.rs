//! In-memory store and census, backing the demo binary and the test suite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StoreError;
use crate::models::{CapacityConfig, PatientRecord, PatientStatus};
use crate::store::{validate_facility_id, CensusProvider, ChangeEvent, ReportStore};

const CHANNEL_CAPACITY: usize = 64;

/// Document store over per-(facility, collection) ordered maps. `BTreeMap`
/// gives the key-ordered listing the slot series relies on.
#[derive(Default)]
pub struct MemoryStore {
    namespaces: DashMap<String, BTreeMap<String, Value>>,
    channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(facility_id: &str, collection: &str) -> String {
        format!("{facility_id}/{collection}")
    }

    fn notify(&self, facility_id: &str, collection: &str, key: &str) {
        let ns = Self::namespace(facility_id, collection);
        if let Some(sender) = self.channels.get(&ns) {
            // Send only fails when no subscriber is listening.
            let _ = sender.send(ChangeEvent {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn list(
        &self,
        facility_id: &str,
        collection: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        validate_facility_id(facility_id)?;
        let ns = Self::namespace(facility_id, collection);
        Ok(self
            .namespaces
            .get(&ns)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn get(
        &self,
        facility_id: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        validate_facility_id(facility_id)?;
        let ns = Self::namespace(facility_id, collection);
        Ok(self
            .namespaces
            .get(&ns)
            .and_then(|docs| docs.get(key).cloned()))
    }

    async fn upsert(
        &self,
        facility_id: &str,
        collection: &str,
        key: &str,
        value: Value,
        merge: bool,
    ) -> Result<(), StoreError> {
        validate_facility_id(facility_id)?;
        let ns = Self::namespace(facility_id, collection);
        let mut docs = self.namespaces.entry(ns).or_default();
        match docs.get_mut(key) {
            Some(existing) if merge => shallow_merge(existing, value),
            _ => {
                docs.insert(key.to_string(), value);
            }
        }
        drop(docs);
        debug!(facility_id, collection, key, merge, "document upserted");
        self.notify(facility_id, collection, key);
        Ok(())
    }

    fn subscribe(&self, facility_id: &str, collection: &str) -> broadcast::Receiver<ChangeEvent> {
        let ns = Self::namespace(facility_id, collection);
        self.channels
            .entry(ns)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

/// Top-level object merge: incoming fields overwrite, fields absent from the
/// incoming document are preserved. Non-object values replace wholesale.
fn shallow_merge(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(patch)) => {
            for (field, value) in patch {
                base.insert(field, value);
            }
        }
        (slot, other) => *slot = other,
    }
}

/// In-memory patient census and capacity configuration, with the mutation
/// helpers an admissions UI would call.
#[derive(Default)]
pub struct MemoryCensus {
    patients: DashMap<String, Vec<PatientRecord>>,
    capacities: DashMap<String, CapacityConfig>,
}

impl MemoryCensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_capacity(&self, facility_id: &str, capacity: CapacityConfig) {
        self.capacities.insert(facility_id.to_string(), capacity);
    }

    pub fn admit(&self, record: PatientRecord) {
        self.patients
            .entry(record.facility_id.clone())
            .or_default()
            .push(record);
    }

    pub fn set_status(&self, facility_id: &str, patient_id: uuid::Uuid, status: PatientStatus) {
        if let Some(mut records) = self.patients.get_mut(facility_id) {
            if let Some(record) = records.iter_mut().find(|r| r.id == patient_id) {
                record.status = status;
            }
        }
    }

    pub fn discharge(
        &self,
        facility_id: &str,
        patient_id: uuid::Uuid,
        date: chrono::NaiveDate,
    ) {
        if let Some(mut records) = self.patients.get_mut(facility_id) {
            if let Some(record) = records.iter_mut().find(|r| r.id == patient_id) {
                record.status = PatientStatus::Discharged;
                record.discharge_date = Some(date);
            }
        }
    }
}

#[async_trait]
impl CensusProvider for MemoryCensus {
    async fn patients(&self, facility_id: &str) -> Result<Vec<PatientRecord>, StoreError> {
        validate_facility_id(facility_id)?;
        Ok(self
            .patients
            .get(facility_id)
            .map(|records| records.value().clone())
            .unwrap_or_default())
    }

    async fn capacity(&self, facility_id: &str) -> Result<CapacityConfig, StoreError> {
        validate_facility_id(facility_id)?;
        Ok(self
            .capacities
            .get(facility_id)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }
}
