//! Slot report documents: the per-(facility, slot) aggregate written to the
//! store, plus the normalization path for legacy documents written by the
//! previous dashboard generation.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::ReportingPolicy;
use crate::models::DiseaseCategory;
use crate::slots::SlotId;

/// One aggregate document per (facility, slot). Keyed in the store by the
/// slot identifier string; lexicographic key order is chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotReport {
    pub slot_id: SlotId,
    /// Calendar date of the slot window, `"YYYY-MM-DD"`.
    pub date: String,
    /// Zero-padded hour label, one of `"00"`, `"06"`, `"12"`, `"18"`.
    pub slot_hour: String,
    /// Window start for live aggregation; synthesized window start for
    /// backfilled documents.
    pub timestamp: NaiveDateTime,

    // Raw counts
    pub occupied_beds: u32,
    pub icu_occupied: u32,
    pub flu_cases: u32,
    pub dengue_cases: u32,
    pub covid_cases: u32,
    pub emergency_cases: u32,
    pub new_admissions: u32,
    pub discharges: u32,

    // Capacity snapshot at aggregation time
    pub total_beds: u32,
    pub icu_beds: u32,

    // Derived
    pub available_beds: u32,
    pub bed_utilization: f64,
    pub icu_stress_index: f64,
    pub flu_growth_rate: f64,
    pub dengue_growth_rate: f64,
    pub covid_growth_rate: f64,
    pub risk_score: f64,

    // Threshold alerts
    pub over_capacity: bool,
    pub icu_critical: bool,
    pub disease_spike: bool,

    // Provenance
    /// True iff this document was synthesized by the backfill engine rather
    /// than computed from live patient data.
    pub auto_filled: bool,
    /// True iff this document was written by the periodic scheduler rather
    /// than a patient-mutation trigger.
    pub scheduled_run: bool,
}

impl SlotReport {
    pub fn disease_count(&self, category: DiseaseCategory) -> u32 {
        match category {
            DiseaseCategory::Flu => self.flu_cases,
            DiseaseCategory::Dengue => self.dengue_cases,
            DiseaseCategory::Covid => self.covid_cases,
        }
    }

    pub fn growth_rate(&self, category: DiseaseCategory) -> f64 {
        match category {
            DiseaseCategory::Flu => self.flu_growth_rate,
            DiseaseCategory::Dengue => self.dengue_growth_rate,
            DiseaseCategory::Covid => self.covid_growth_rate,
        }
    }

    /// Forward-fill copy for a gap slot: every field carries over except the
    /// slot identity, timestamp, and provenance flags.
    ///
    /// `None` if the target identifier does not parse (opaque labels are
    /// never synthesized into).
    pub fn copied_forward(&self, slot: &SlotId) -> Option<SlotReport> {
        let start = slot.window_start()?;
        let mut next = self.clone();
        next.slot_id = slot.clone();
        next.date = start.date().format("%Y-%m-%d").to_string();
        next.slot_hour = format!("{:02}", start.hour());
        next.timestamp = start;
        next.auto_filled = true;
        next.scheduled_run = false;
        Some(next)
    }
}

/// Slot document written by the previous dashboard generation: camelCase
/// keys, raw counts only, no derived fields or provenance. Everything is
/// defaulted so that partially written or damaged documents still load as
/// zero-valued counts instead of failing the read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacySlotReport {
    pub slot_id: String,
    pub date: String,
    pub slot_hour: String,
    pub timestamp: Option<NaiveDateTime>,
    pub occupied_beds: u32,
    pub icu_occupied: u32,
    pub flu_cases: u32,
    pub dengue_cases: u32,
    pub covid_cases: u32,
    pub emergency_cases: u32,
    pub new_admissions: u32,
    pub discharges: u32,
    pub total_beds: u32,
    pub icu_beds: u32,
    pub auto_filled: bool,
    pub scheduled_run: bool,
}

/// Wire shape of a stored slot document. Normalization to the current schema
/// happens exactly once, on read; consumers never see a legacy shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredReport {
    Current(SlotReport),
    Legacy(LegacySlotReport),
}

impl StoredReport {
    /// Upgrade to the current schema. Legacy documents get their derived
    /// fields recomputed from the surviving raw counts under the given
    /// policy, with growth rates zeroed (the predecessor they were computed
    /// against is unknown).
    pub fn normalize(self, policy: &ReportingPolicy) -> SlotReport {
        match self {
            StoredReport::Current(report) => report,
            StoredReport::Legacy(legacy) => {
                let slot_id = SlotId::from_raw(legacy.slot_id);
                let timestamp = legacy
                    .timestamp
                    .or_else(|| slot_id.window_start())
                    .unwrap_or_default();
                let bed_utilization = ratio(legacy.occupied_beds, legacy.total_beds);
                let icu_stress_index = ratio(legacy.icu_occupied, legacy.icu_beds);
                // Legacy docs carry no emergency threshold; treat load as 0.
                let risk_score = policy.icu_weight * icu_stress_index
                    + policy.bed_weight * bed_utilization;
                SlotReport {
                    date: legacy.date,
                    slot_hour: legacy.slot_hour,
                    timestamp,
                    occupied_beds: legacy.occupied_beds,
                    icu_occupied: legacy.icu_occupied,
                    flu_cases: legacy.flu_cases,
                    dengue_cases: legacy.dengue_cases,
                    covid_cases: legacy.covid_cases,
                    emergency_cases: legacy.emergency_cases,
                    new_admissions: legacy.new_admissions,
                    discharges: legacy.discharges,
                    total_beds: legacy.total_beds,
                    icu_beds: legacy.icu_beds,
                    available_beds: legacy.total_beds.saturating_sub(legacy.occupied_beds),
                    bed_utilization,
                    icu_stress_index,
                    flu_growth_rate: 0.0,
                    dengue_growth_rate: 0.0,
                    covid_growth_rate: 0.0,
                    risk_score,
                    over_capacity: bed_utilization > policy.over_capacity_watermark,
                    icu_critical: icu_stress_index > policy.icu_critical_watermark,
                    disease_spike: false,
                    auto_filled: legacy.auto_filled,
                    scheduled_run: legacy.scheduled_run,
                    slot_id,
                }
            }
        }
    }
}

/// Decode one stored document into the current schema.
///
/// Returns `None` only for values that are not JSON objects at all; any
/// object decodes, via the legacy fallback if necessary.
pub fn decode_report(value: serde_json::Value, policy: &ReportingPolicy) -> Option<SlotReport> {
    serde_json::from_value::<StoredReport>(value)
        .ok()
        .map(|stored| stored.normalize(policy))
}

/// `numerator / denominator`, defined as 0 (not NaN or infinity) when the
/// denominator is 0.
pub(crate) fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        f64::from(numerator) / f64::from(denominator)
    }
}

/// Period-over-period growth, defined as 0 when the previous count is 0.
pub(crate) fn growth(current: u32, previous: u32) -> f64 {
    if previous == 0 {
        0.0
    } else {
        (f64::from(current) - f64::from(previous)) / f64::from(previous)
    }
}

/// Fully populated report for use across the crate's test modules.
#[cfg(test)]
pub(crate) fn sample_report(slot: &str, auto_filled: bool) -> SlotReport {
    let slot_id = SlotId::from_raw(slot);
    let start = slot_id.window_start().unwrap();
    SlotReport {
        slot_id,
        date: start.date().format("%Y-%m-%d").to_string(),
        slot_hour: format!("{:02}", start.hour()),
        timestamp: start,
        occupied_beds: 12,
        icu_occupied: 2,
        flu_cases: 4,
        dengue_cases: 0,
        covid_cases: 1,
        emergency_cases: 1,
        new_admissions: 3,
        discharges: 1,
        total_beds: 50,
        icu_beds: 8,
        available_beds: 38,
        bed_utilization: 0.24,
        icu_stress_index: 0.25,
        flu_growth_rate: 0.0,
        dengue_growth_rate: 0.0,
        covid_growth_rate: 0.0,
        risk_score: 0.2,
        over_capacity: false,
        icu_critical: false,
        disease_spike: false,
        auto_filled,
        scheduled_run: false,
    }
}
