use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current status of one episode of care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientStatus {
    Admitted,
    Critical,
    Discharged,
    Pending,
}

/// One patient's episode of care. Records are never deleted; the census is
/// the sole source of truth for occupancy, and slot reports are always a
/// derived cache over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: Uuid,
    pub facility_id: String,
    pub name: String,
    /// Admission date on the facility-local calendar.
    pub admission_date: NaiveDate,
    pub discharge_date: Option<NaiveDate>,
    pub status: PatientStatus,
    /// Free text, e.g. "Severe Dengue with warning signs".
    pub diagnosis: String,
    pub needs_icu: bool,
}

impl PatientRecord {
    /// Point-in-time occupancy test against a slot window start.
    ///
    /// A patient occupies a bed at `window_start` if admitted on or before
    /// that date and not yet discharged by it. This reconstructs historical
    /// slots correctly even after later discharges; it is not "currently
    /// admitted right now".
    pub fn active_at(&self, window_start: NaiveDateTime) -> bool {
        let day = window_start.date();
        if self.admission_date > day {
            return false;
        }
        if self.status != PatientStatus::Discharged {
            return true;
        }
        match self.discharge_date {
            None => true,
            Some(discharged) => discharged > day,
        }
    }
}

/// Disease categories tracked in slot reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiseaseCategory {
    Flu,
    Dengue,
    Covid,
}

impl DiseaseCategory {
    pub const ALL: [DiseaseCategory; 3] =
        [DiseaseCategory::Flu, DiseaseCategory::Dengue, DiseaseCategory::Covid];

    pub fn label(&self) -> &'static str {
        match self {
            DiseaseCategory::Flu => "flu",
            DiseaseCategory::Dengue => "dengue",
            DiseaseCategory::Covid => "covid",
        }
    }

    /// Case-insensitive substring match against free-text diagnosis. Applied
    /// uniformly everywhere a diagnosis is categorized.
    pub fn matches(&self, diagnosis: &str) -> bool {
        diagnosis.to_ascii_lowercase().contains(self.label())
    }
}

/// Facility capacity as set by an admin. Mutable at any time; each slot
/// report snapshots the capacity it was computed against, so later changes
/// re-base new ratios without touching historical documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityConfig {
    pub total_beds: u32,
    pub icu_beds: u32,
    /// Emergency case count at which the facility considers itself saturated.
    pub emergency_threshold: u32,
    pub oxygen_units: u32,
    pub ventilators: u32,
}
