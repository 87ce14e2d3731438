//! Metrics aggregation: one slot report computed from the live census.
//!
//! Each aggregation pass reads a single consistent snapshot of its inputs
//! (census, capacity, predecessor report), derives everything from that
//! snapshot, and performs one merge-upsert. Re-running with unchanged inputs
//! is idempotent, so concurrent triggers for the same slot are benign under
//! last-write-wins.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{instrument, warn};

use crate::config::ReportingPolicy;
use crate::error::StoreError;
use crate::models::report::{decode_report, growth, ratio};
use crate::models::{CapacityConfig, DiseaseCategory, PatientRecord, PatientStatus, SlotReport};
use crate::slots::{SlotId, SLOT_HOURS};
use crate::store::{validate_facility_id, CensusProvider, ReportStore, REPORTS_COLLECTION};

pub struct Aggregator {
    store: Arc<dyn ReportStore>,
    census: Arc<dyn CensusProvider>,
    policy: ReportingPolicy,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn ReportStore>,
        census: Arc<dyn CensusProvider>,
        policy: ReportingPolicy,
    ) -> Self {
        Self { store, census, policy }
    }

    pub fn policy(&self) -> &ReportingPolicy {
        &self.policy
    }

    /// Aggregate one slot from the current census and merge-upsert the
    /// resulting report. Returns the report, or `None` for a target slot
    /// whose identifier does not parse (logged, not an error).
    #[instrument(skip(self), fields(facility = %facility_id, slot = %slot))]
    pub async fn aggregate_slot(
        &self,
        facility_id: &str,
        slot: &SlotId,
        scheduled_run: bool,
    ) -> Result<Option<SlotReport>, StoreError> {
        validate_facility_id(facility_id)?;
        let Some(window_start) = slot.window_start() else {
            warn!("target slot id is opaque, skipping aggregation");
            return Ok(None);
        };

        // Single input snapshot for the whole pass.
        let patients = self.census.patients(facility_id).await?;
        let capacity = self.census.capacity(facility_id).await?;
        let previous = self.previous_report(facility_id, window_start).await?;

        let report = compute_report(
            slot,
            window_start,
            &patients,
            &capacity,
            previous.as_ref(),
            &self.policy,
            scheduled_run,
        );
        let document = serde_json::to_value(&report)?;
        self.store
            .upsert(facility_id, REPORTS_COLLECTION, slot.as_str(), document, true)
            .await?;
        Ok(Some(report))
    }

    /// Aggregation for fire-and-forget callers on patient-care paths: any
    /// failure is logged and swallowed. The scheduler's next run is the
    /// retry mechanism; no backoff here.
    pub async fn aggregate_slot_logged(&self, facility_id: &str, slot: &SlotId, scheduled_run: bool) {
        if let Err(err) = self.aggregate_slot(facility_id, slot, scheduled_run).await {
            warn!(
                facility = facility_id,
                slot = %slot,
                error = %err,
                "slot aggregation failed, next scheduled run will retry"
            );
        }
    }

    async fn previous_report(
        &self,
        facility_id: &str,
        window_start: NaiveDateTime,
    ) -> Result<Option<SlotReport>, StoreError> {
        let predecessor = SlotId::at(window_start - Duration::hours(SLOT_HOURS as i64));
        let doc = self
            .store
            .get(facility_id, REPORTS_COLLECTION, predecessor.as_str())
            .await?;
        Ok(doc.and_then(|value| decode_report(value, &self.policy)))
    }
}

/// Pure derivation of one slot report from a snapshot of inputs. Shared by
/// live aggregation; backfill copies forward instead of recomputing.
pub(crate) fn compute_report(
    slot: &SlotId,
    window_start: NaiveDateTime,
    patients: &[PatientRecord],
    capacity: &CapacityConfig,
    previous: Option<&SlotReport>,
    policy: &ReportingPolicy,
    scheduled_run: bool,
) -> SlotReport {
    let active: Vec<&PatientRecord> = patients
        .iter()
        .filter(|p| p.active_at(window_start))
        .collect();

    let occupied_beds = active.len() as u32;
    let icu_occupied = active.iter().filter(|p| p.needs_icu).count() as u32;
    let emergency_cases = active
        .iter()
        .filter(|p| p.status == PatientStatus::Critical)
        .count() as u32;
    let count_disease = |category: DiseaseCategory| {
        active.iter().filter(|p| category.matches(&p.diagnosis)).count() as u32
    };
    let flu_cases = count_disease(DiseaseCategory::Flu);
    let dengue_cases = count_disease(DiseaseCategory::Dengue);
    let covid_cases = count_disease(DiseaseCategory::Covid);

    // Same-day movement comes from the whole census, not the point-in-time
    // subset: a patient admitted and discharged within the day counts once
    // in each column.
    let slot_date = window_start.date();
    let new_admissions = patients
        .iter()
        .filter(|p| p.admission_date == slot_date)
        .count() as u32;
    let discharges = patients
        .iter()
        .filter(|p| p.status == PatientStatus::Discharged && p.discharge_date == Some(slot_date))
        .count() as u32;

    let bed_utilization = ratio(occupied_beds, capacity.total_beds);
    let icu_stress_index = ratio(icu_occupied, capacity.icu_beds);
    let emergency_load = ratio(emergency_cases, capacity.emergency_threshold).min(1.0);
    let risk_score = policy.icu_weight * icu_stress_index
        + policy.bed_weight * bed_utilization
        + policy.emergency_weight * emergency_load;

    let previous_count =
        |category: DiseaseCategory| previous.map(|p| p.disease_count(category)).unwrap_or(0);
    let flu_growth_rate = growth(flu_cases, previous_count(DiseaseCategory::Flu));
    let dengue_growth_rate = growth(dengue_cases, previous_count(DiseaseCategory::Dengue));
    let covid_growth_rate = growth(covid_cases, previous_count(DiseaseCategory::Covid));
    let disease_spike = [flu_growth_rate, dengue_growth_rate, covid_growth_rate]
        .iter()
        .any(|rate| *rate > policy.disease_spike_threshold);

    SlotReport {
        slot_id: slot.clone(),
        date: slot_date.format("%Y-%m-%d").to_string(),
        slot_hour: format!("{:02}", window_start.hour()),
        timestamp: window_start,
        occupied_beds,
        icu_occupied,
        flu_cases,
        dengue_cases,
        covid_cases,
        emergency_cases,
        new_admissions,
        discharges,
        total_beds: capacity.total_beds,
        icu_beds: capacity.icu_beds,
        available_beds: capacity.total_beds.saturating_sub(occupied_beds),
        bed_utilization,
        icu_stress_index,
        flu_growth_rate,
        dengue_growth_rate,
        covid_growth_rate,
        risk_score,
        over_capacity: bed_utilization > policy.over_capacity_watermark,
        icu_critical: icu_stress_index > policy.icu_critical_watermark,
        disease_spike,
        auto_filled: false,
        scheduled_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCensus, MemoryStore};
    use uuid::Uuid;

    const FACILITY: &str = "general-1";

    fn patient(
        admitted: &str,
        status: PatientStatus,
        diagnosis: &str,
        needs_icu: bool,
    ) -> PatientRecord {
        PatientRecord {
            id: Uuid::new_v4(),
            facility_id: FACILITY.into(),
            name: "Case".into(),
            admission_date: admitted.parse().unwrap(),
            discharge_date: None,
            status,
            diagnosis: diagnosis.into(),
            needs_icu,
        }
    }

    fn capacity(total: u32, icu: u32, emergency: u32) -> CapacityConfig {
        CapacityConfig {
            total_beds: total,
            icu_beds: icu,
            emergency_threshold: emergency,
            oxygen_units: 20,
            ventilators: 5,
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<MemoryCensus>, Aggregator) {
        let store = Arc::new(MemoryStore::new());
        let census = Arc::new(MemoryCensus::new());
        let aggregator = Aggregator::new(
            store.clone(),
            census.clone(),
            ReportingPolicy::default(),
        );
        (store, census, aggregator)
    }

    #[tokio::test]
    async fn single_admission_scenario() {
        let (_store, census, aggregator) = setup();
        census.set_capacity(FACILITY, capacity(100, 10, 5));
        census.admit(patient("2026-01-05", PatientStatus::Admitted, "Flu", false));

        let slot = SlotId::from_raw("2026-01-05_12");
        let report = aggregator
            .aggregate_slot(FACILITY, &slot, false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.occupied_beds, 1);
        assert_eq!(report.available_beds, 99);
        assert!((report.bed_utilization - 0.01).abs() < 1e-9);
        assert_eq!(report.new_admissions, 1);
        assert_eq!(report.discharges, 0);
        assert_eq!(report.flu_cases, 1);
        assert!(!report.auto_filled);
    }

    #[tokio::test]
    async fn zero_capacity_never_divides() {
        let (_store, census, aggregator) = setup();
        census.set_capacity(FACILITY, capacity(0, 0, 0));
        census.admit(patient("2026-01-05", PatientStatus::Critical, "covid", true));

        let report = aggregator
            .aggregate_slot(FACILITY, &SlotId::from_raw("2026-01-05_06"), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.bed_utilization, 0.0);
        assert_eq!(report.icu_stress_index, 0.0);
        assert_eq!(report.risk_score, 0.0);
        assert!(report.bed_utilization.is_finite());
    }

    #[tokio::test]
    async fn ratios_stay_in_unit_interval_within_capacity() {
        let (_store, census, aggregator) = setup();
        census.set_capacity(FACILITY, capacity(10, 2, 3));
        census.admit(patient("2026-01-04", PatientStatus::Admitted, "flu", true));
        census.admit(patient("2026-01-04", PatientStatus::Admitted, "dengue", false));

        let report = aggregator
            .aggregate_slot(FACILITY, &SlotId::from_raw("2026-01-05_00"), false)
            .await
            .unwrap()
            .unwrap();

        assert!((0.0..=1.0).contains(&report.bed_utilization));
        assert!((0.0..=1.0).contains(&report.icu_stress_index));
        assert!((0.0..=1.0).contains(&report.risk_score));
    }

    #[tokio::test]
    async fn over_subscription_raises_alerts() {
        let (_store, census, aggregator) = setup();
        census.set_capacity(FACILITY, capacity(2, 1, 1));
        for _ in 0..4 {
            census.admit(patient("2026-01-04", PatientStatus::Critical, "dengue fever", true));
        }

        let report = aggregator
            .aggregate_slot(FACILITY, &SlotId::from_raw("2026-01-05_00"), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.available_beds, 0);
        assert!(report.over_capacity);
        assert!(report.icu_critical);
        // the risk score's emergency term is clamped even when saturated
        assert!(report.risk_score.is_finite());
    }

    #[test]
    fn growth_guard_against_zero_previous() {
        let prev = SlotReport {
            flu_cases: 0,
            ..crate::models::report::sample_report("2026-01-05_00", false)
        };
        let next = compute_report(
            &SlotId::from_raw("2026-01-05_06"),
            "2026-01-05T06:00:00".parse().unwrap(),
            &census_records(5),
            &capacity(50, 5, 5),
            Some(&prev),
            &ReportingPolicy::default(),
            false,
        );
        assert_eq!(next.flu_cases, 5);
        assert_eq!(next.flu_growth_rate, 0.0);
        assert!(next.flu_growth_rate.is_finite());
    }

    fn census_records(n: usize) -> Vec<PatientRecord> {
        (0..n)
            .map(|_| patient("2026-01-05", PatientStatus::Admitted, "flu", false))
            .collect()
    }

    #[test]
    fn spike_detection_uses_growth_threshold() {
        let prev = SlotReport {
            flu_cases: 2,
            ..crate::models::report::sample_report("2026-01-05_00", false)
        };
        let next = compute_report(
            &SlotId::from_raw("2026-01-05_06"),
            "2026-01-05T06:00:00".parse().unwrap(),
            &census_records(3),
            &capacity(50, 5, 5),
            Some(&prev),
            &ReportingPolicy::default(),
            false,
        );
        // (3 - 2) / 2 = 0.5 > 0.4
        assert!((next.flu_growth_rate - 0.5).abs() < 1e-9);
        assert!(next.disease_spike);
    }

    #[tokio::test]
    async fn aggregation_is_idempotent() {
        let (store, census, aggregator) = setup();
        census.set_capacity(FACILITY, capacity(30, 4, 3));
        census.admit(patient("2026-01-05", PatientStatus::Admitted, "Dengue", false));
        census.admit(patient("2026-01-04", PatientStatus::Critical, "COVID-19", true));

        let slot = SlotId::from_raw("2026-01-05_12");
        let first = aggregator
            .aggregate_slot(FACILITY, &slot, false)
            .await
            .unwrap()
            .unwrap();
        let doc_first = store
            .get(FACILITY, REPORTS_COLLECTION, slot.as_str())
            .await
            .unwrap()
            .unwrap();
        let second = aggregator
            .aggregate_slot(FACILITY, &slot, false)
            .await
            .unwrap()
            .unwrap();
        let doc_second = store
            .get(FACILITY, REPORTS_COLLECTION, slot.as_str())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(doc_first, doc_second);
    }

    #[tokio::test]
    async fn capacity_change_rebases_only_new_slots() {
        let (_store, census, aggregator) = setup();
        census.set_capacity(FACILITY, capacity(100, 10, 5));
        census.admit(patient("2026-01-05", PatientStatus::Admitted, "flu", false));

        let early = aggregator
            .aggregate_slot(FACILITY, &SlotId::from_raw("2026-01-05_00"), false)
            .await
            .unwrap()
            .unwrap();
        census.set_capacity(FACILITY, capacity(50, 10, 5));
        let late = aggregator
            .aggregate_slot(FACILITY, &SlotId::from_raw("2026-01-05_06"), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(early.total_beds, 100);
        assert!((early.bed_utilization - 0.01).abs() < 1e-9);
        assert_eq!(late.total_beds, 50);
        assert!((late.bed_utilization - 0.02).abs() < 1e-9);
        // occupancy counts are capacity-independent
        assert_eq!(early.occupied_beds, late.occupied_beds);
    }

    #[tokio::test]
    async fn opaque_slot_is_a_no_op() {
        let (store, _census, aggregator) = setup();
        let result = aggregator
            .aggregate_slot(FACILITY, &SlotId::from_raw("legacy!label"), false)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store
            .list(FACILITY, REPORTS_COLLECTION)
            .await
            .unwrap()
            .is_empty());
    }
}
