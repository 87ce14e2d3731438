//! Gap detection and forward-fill over the slot report series.
//!
//! After a run, every 6-hour boundary between the facility's earliest slot
//! report and the current slot has exactly one document. Synthesized slots
//! are whole-document copies of the nearest earlier report with only slot
//! identity, timestamp, and provenance rewritten, and are written with
//! full-replace semantics. The current slot is always a real aggregation,
//! never a stale copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::Aggregator;
use crate::config::ReportingPolicy;
use crate::error::StoreError;
use crate::models::report::decode_report;
use crate::models::SlotReport;
use crate::slots::SlotId;
use crate::store::{validate_facility_id, ReportStore, REPORTS_COLLECTION};

/// What one backfill invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOutcome {
    /// Gap slots synthesized by forward-fill.
    pub synthesized: u32,
    /// Existing slots adopted as baselines during the walk.
    pub adopted: u32,
    /// Whether the current slot needed a live aggregation.
    pub aggregated_current: bool,
    pub current_slot: SlotId,
}

pub struct BackfillEngine {
    store: Arc<dyn ReportStore>,
    aggregator: Arc<Aggregator>,
    policy: ReportingPolicy,
}

impl BackfillEngine {
    pub fn new(
        store: Arc<dyn ReportStore>,
        aggregator: Arc<Aggregator>,
        policy: ReportingPolicy,
    ) -> Self {
        Self { store, aggregator, policy }
    }

    /// Walk the slot series from the earliest report to `now`, filling every
    /// gap. Steps are idempotent: re-encountering an existing slot adopts it
    /// as the new baseline without rewriting it, so re-running after a
    /// failure is safe and expected.
    #[instrument(skip(self), fields(facility = %facility_id))]
    pub async fn run(
        &self,
        facility_id: &str,
        now: NaiveDateTime,
    ) -> Result<BackfillOutcome, StoreError> {
        validate_facility_id(facility_id)?;
        let current_slot = SlotId::at(now);
        let mut outcome = BackfillOutcome {
            synthesized: 0,
            adopted: 0,
            aggregated_current: false,
            current_slot: current_slot.clone(),
        };

        // One snapshot of the series for the whole walk. Keys that do not
        // parse are legacy labels with no place on the calendar; they are
        // left in the store but excluded from date arithmetic.
        let existing: BTreeMap<String, Value> = self
            .store
            .list(facility_id, REPORTS_COLLECTION)
            .await?
            .into_iter()
            .collect();

        let mut baseline: Option<(NaiveDateTime, SlotReport)> = None;
        for (key, value) in &existing {
            let slot = SlotId::from_raw(key.clone());
            match slot.window_start() {
                Some(start) => {
                    if let Some(report) = decode_report(value.clone(), &self.policy) {
                        baseline = Some((start, report));
                        break;
                    }
                }
                None => debug!(key, "skipping opaque slot key"),
            }
        }

        let Some(current_start) = current_slot.window_start() else {
            // Unreachable for generated ids; bail out defensibly anyway.
            warn!("current slot id failed to parse");
            return Ok(outcome);
        };

        let Some((first_start, mut last_known)) = baseline else {
            // First observation of this facility: aggregate the current slot
            // and stop. The first-ever slot needs no predecessor.
            info!("no prior slot reports, aggregating current slot");
            self.aggregator
                .aggregate_slot(facility_id, &current_slot, false)
                .await?;
            outcome.aggregated_current = true;
            return Ok(outcome);
        };

        let mut cursor = first_start;
        loop {
            cursor += chrono::Duration::hours(crate::slots::SLOT_HOURS as i64);
            if cursor >= current_start {
                break;
            }
            let slot = SlotId::at(cursor);
            if let Some(doc) = existing.get(slot.as_str()) {
                // Adoption, not a rewrite.
                if let Some(report) = decode_report(doc.clone(), &self.policy) {
                    last_known = report;
                    outcome.adopted += 1;
                }
                continue;
            }
            let Some(copy) = last_known.copied_forward(&slot) else {
                continue;
            };
            let document = serde_json::to_value(&copy)?;
            // Full replace: the copy is a complete synthetic snapshot.
            self.store
                .upsert(facility_id, REPORTS_COLLECTION, slot.as_str(), document, false)
                .await?;
            outcome.synthesized += 1;
            last_known = copy;
        }

        if !existing.contains_key(current_slot.as_str()) {
            self.aggregator
                .aggregate_slot(facility_id, &current_slot, false)
                .await?;
            outcome.aggregated_current = true;
        }

        if outcome.synthesized > 0 {
            info!(
                synthesized = outcome.synthesized,
                adopted = outcome.adopted,
                "backfilled slot series"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::sample_report;
    use crate::models::{CapacityConfig, PatientRecord, PatientStatus};
    use crate::store::{MemoryCensus, MemoryStore};
    use uuid::Uuid;

    const FACILITY: &str = "district-7";

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    async fn seed_report(store: &MemoryStore, slot: &str, auto_filled: bool) {
        let report = sample_report(slot, auto_filled);
        store
            .upsert(
                FACILITY,
                REPORTS_COLLECTION,
                slot,
                serde_json::to_value(&report).unwrap(),
                false,
            )
            .await
            .unwrap();
    }

    fn engine(store: &Arc<MemoryStore>, census: &Arc<MemoryCensus>) -> BackfillEngine {
        let policy = ReportingPolicy::default();
        let aggregator = Arc::new(Aggregator::new(
            store.clone(),
            census.clone(),
            policy.clone(),
        ));
        BackfillEngine::new(store.clone(), aggregator, policy)
    }

    async fn series(store: &MemoryStore) -> Vec<(String, SlotReport)> {
        let policy = ReportingPolicy::default();
        store
            .list(FACILITY, REPORTS_COLLECTION)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|(k, v)| decode_report(v, &policy).map(|r| (k, r)))
            .collect()
    }

    #[tokio::test]
    async fn three_quarter_day_gap_scenario() {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        census.set_capacity(FACILITY, CapacityConfig { total_beds: 20, ..Default::default() });
        seed_report(&store, "2026-01-01_00", false).await;

        let outcome = engine(&store, &census)
            .run(FACILITY, dt("2026-01-01 18:30:00"))
            .await
            .unwrap();

        assert_eq!(outcome.synthesized, 2);
        assert!(outcome.aggregated_current);
        let reports = series(&store).await;
        let keys: Vec<&str> = reports.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["2026-01-01_00", "2026-01-01_06", "2026-01-01_12", "2026-01-01_18"]
        );
        assert!(!reports[0].1.auto_filled);
        assert!(reports[1].1.auto_filled);
        assert!(reports[2].1.auto_filled);
        assert!(!reports[3].1.auto_filled, "current slot is a live aggregation");
        // forward-fill copies data, not identity
        assert_eq!(reports[1].1.occupied_beds, reports[0].1.occupied_beds);
        assert_eq!(reports[1].1.slot_hour, "06");
    }

    #[tokio::test]
    async fn empty_series_aggregates_current_only() {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        census.set_capacity(FACILITY, CapacityConfig { total_beds: 10, ..Default::default() });

        let outcome = engine(&store, &census)
            .run(FACILITY, dt("2026-02-10 03:00:00"))
            .await
            .unwrap();

        assert_eq!(outcome.synthesized, 0);
        assert!(outcome.aggregated_current);
        let reports = series(&store).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "2026-02-10_00");
        assert!(!reports[0].1.auto_filled);
    }

    #[tokio::test]
    async fn interior_gaps_fill_from_nearest_earlier_baseline() {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        census.set_capacity(FACILITY, CapacityConfig { total_beds: 20, ..Default::default() });

        seed_report(&store, "2026-01-01_00", false).await;
        // gap at _06
        seed_report(&store, "2026-01-01_12", false).await;
        // gap at _18 and 01-02_00

        let outcome = engine(&store, &census)
            .run(FACILITY, dt("2026-01-02 07:00:00"))
            .await
            .unwrap();

        assert_eq!(outcome.synthesized, 3);
        assert_eq!(outcome.adopted, 1);
        let reports = series(&store).await;
        let keys: Vec<&str> = reports.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "2026-01-01_00",
                "2026-01-01_06",
                "2026-01-01_12",
                "2026-01-01_18",
                "2026-01-02_00",
                "2026-01-02_06",
            ]
        );
        // the slot after the adopted _12 copies from _12, not from _00's chain
        assert!(!reports[2].1.auto_filled);
        assert!(reports[3].1.auto_filled);
    }

    #[tokio::test]
    async fn gapless_spacing_property() {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        census.set_capacity(FACILITY, CapacityConfig { total_beds: 20, ..Default::default() });
        seed_report(&store, "2026-01-30_12", false).await;

        engine(&store, &census)
            .run(FACILITY, dt("2026-02-02 01:15:00"))
            .await
            .unwrap();

        let reports = series(&store).await;
        let starts: Vec<NaiveDateTime> = reports
            .iter()
            .map(|(k, _)| SlotId::from_raw(k.clone()).window_start().unwrap())
            .collect();
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], chrono::Duration::hours(6));
        }
        assert_eq!(*starts.first().unwrap(), dt("2026-01-30 12:00:00"));
        assert_eq!(*starts.last().unwrap(), dt("2026-02-02 00:00:00"));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        census.set_capacity(FACILITY, CapacityConfig { total_beds: 20, ..Default::default() });
        seed_report(&store, "2026-01-01_00", false).await;

        let eng = engine(&store, &census);
        let now = dt("2026-01-01 18:30:00");
        eng.run(FACILITY, now).await.unwrap();
        let after_first = series(&store).await;
        let second = eng.run(FACILITY, now).await.unwrap();
        let after_second = series(&store).await;

        assert_eq!(second.synthesized, 0);
        assert_eq!(after_first.len(), after_second.len());
        for ((k1, r1), (k2, r2)) in after_first.iter().zip(after_second.iter()) {
            assert_eq!(k1, k2);
            assert_eq!(r1.auto_filled, r2.auto_filled);
        }
    }

    #[tokio::test]
    async fn opaque_keys_are_excluded_from_the_walk() {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        census.set_capacity(FACILITY, CapacityConfig { total_beds: 20, ..Default::default() });

        store
            .upsert(
                FACILITY,
                REPORTS_COLLECTION,
                "!!corrupted-key",
                serde_json::json!({ "occupiedBeds": 3 }),
                false,
            )
            .await
            .unwrap();
        seed_report(&store, "2026-01-01_06", false).await;

        let outcome = engine(&store, &census)
            .run(FACILITY, dt("2026-01-01 19:00:00"))
            .await
            .unwrap();

        // walk started from the first parseable slot, corrupted key untouched
        assert_eq!(outcome.synthesized, 1);
        let raw = store
            .get(FACILITY, REPORTS_COLLECTION, "!!corrupted-key")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw, serde_json::json!({ "occupiedBeds": 3 }));
    }

    #[tokio::test]
    async fn current_slot_reflects_live_census_not_copy() {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        census.set_capacity(FACILITY, CapacityConfig { total_beds: 10, ..Default::default() });
        // stale report says 12 occupied; live census has one patient
        seed_report(&store, "2026-01-01_00", false).await;
        census.admit(PatientRecord {
            id: Uuid::new_v4(),
            facility_id: FACILITY.into(),
            name: "Only Patient".into(),
            admission_date: "2026-01-01".parse().unwrap(),
            discharge_date: None,
            status: PatientStatus::Admitted,
            diagnosis: "observation".into(),
            needs_icu: false,
        });

        engine(&store, &census)
            .run(FACILITY, dt("2026-01-01 13:00:00"))
            .await
            .unwrap();

        let reports = series(&store).await;
        let current = &reports.last().unwrap().1;
        assert_eq!(current.slot_id.as_str(), "2026-01-01_12");
        assert_eq!(current.occupied_beds, 1, "live data, not the stale 12");
        assert!(!current.auto_filled);
        // the filled _06 slot still carries the stale copy
        assert_eq!(reports[1].1.occupied_beds, 12);
        assert!(reports[1].1.auto_filled);
    }
}
