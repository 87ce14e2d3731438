//! CSV exporters over the backfilled slot series.
//!
//! Two transforms with a deliberate freshness asymmetry: the raw export is
//! for humans who expect "now" in the last row, so it forces a fresh
//! aggregation of the current slot before reading the series; the feature
//! export feeds batch ML jobs where export speed matters more than the
//! in-progress slot, so it reads whatever is persisted.

use chrono::{Datelike, NaiveDate, Timelike};

use crate::error::ExportError;
use crate::scheduler::Reporting;

/// A rendered export: CSV payload plus the filename to suggest for download.
#[derive(Debug, Clone)]
pub struct CsvExport {
    pub filename: String,
    pub payload: String,
}

const RAW_COLUMNS: [&str; 27] = [
    "slot_id",
    "date",
    "slot_hour",
    "timestamp",
    "occupied_beds",
    "icu_occupied",
    "flu_cases",
    "dengue_cases",
    "covid_cases",
    "emergency_cases",
    "new_admissions",
    "discharges",
    "total_beds",
    "icu_beds",
    "available_beds",
    "bed_utilization",
    "icu_stress_index",
    "flu_growth_rate",
    "dengue_growth_rate",
    "covid_growth_rate",
    "risk_score",
    "over_capacity",
    "icu_critical",
    "disease_spike",
    "auto_filled",
    "scheduled_run",
    "facility_id",
];

const FEATURE_COLUMNS: [&str; 16] = [
    "slot_hour",
    "day_of_week",
    "occupied_beds",
    "icu_occupied",
    "flu_cases",
    "dengue_cases",
    "covid_cases",
    "emergency_cases",
    "new_admissions",
    "discharges",
    "bed_utilization",
    "icu_stress_index",
    "flu_growth_rate",
    "dengue_growth_rate",
    "covid_growth_rate",
    "risk_score",
];

/// Human-facing export: every slot, identifiers and counts and ratios as-is.
/// Forces a current-slot refresh first. Fields containing the delimiter,
/// quotes, or newlines come out quoted per RFC 4180; fields the document
/// never had render empty.
pub async fn export_raw(
    reporting: &Reporting,
    facility_id: &str,
    today: NaiveDate,
) -> Result<CsvExport, ExportError> {
    reporting.force_refresh(facility_id).await?;
    let series = reporting.series(facility_id).await?;
    if series.is_empty() {
        return Err(ExportError::Empty(facility_id.to_string()));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(RAW_COLUMNS)?;
    for report in &series {
        writer.write_record([
            report.slot_id.as_str().to_string(),
            report.date.clone(),
            report.slot_hour.clone(),
            report.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            report.occupied_beds.to_string(),
            report.icu_occupied.to_string(),
            report.flu_cases.to_string(),
            report.dengue_cases.to_string(),
            report.covid_cases.to_string(),
            report.emergency_cases.to_string(),
            report.new_admissions.to_string(),
            report.discharges.to_string(),
            report.total_beds.to_string(),
            report.icu_beds.to_string(),
            report.available_beds.to_string(),
            report.bed_utilization.to_string(),
            report.icu_stress_index.to_string(),
            report.flu_growth_rate.to_string(),
            report.dengue_growth_rate.to_string(),
            report.covid_growth_rate.to_string(),
            report.risk_score.to_string(),
            report.over_capacity.to_string(),
            report.icu_critical.to_string(),
            report.disease_spike.to_string(),
            report.auto_filled.to_string(),
            report.scheduled_run.to_string(),
            facility_id.to_string(),
        ])?;
    }

    Ok(CsvExport {
        filename: raw_filename(facility_id, today),
        payload: into_payload(writer)?,
    })
}

/// Machine-facing export: numeric-only rows for downstream statistical and
/// ML consumption. The slot identifier is decomposed into `(slot_hour,
/// day_of_week)` integers; ratios are fixed to 4 decimal places. Reads the
/// persisted series without refreshing. Slots under opaque identifiers have
/// no calendar position and are skipped.
pub async fn export_features(
    reporting: &Reporting,
    facility_id: &str,
    today: NaiveDate,
) -> Result<CsvExport, ExportError> {
    let series = reporting.series(facility_id).await?;
    if series.is_empty() {
        return Err(ExportError::Empty(facility_id.to_string()));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(FEATURE_COLUMNS)?;
    for report in &series {
        let Some(window_start) = report.slot_id.window_start() else {
            continue;
        };
        writer.write_record([
            window_start.hour().to_string(),
            window_start.weekday().num_days_from_monday().to_string(),
            report.occupied_beds.to_string(),
            report.icu_occupied.to_string(),
            report.flu_cases.to_string(),
            report.dengue_cases.to_string(),
            report.covid_cases.to_string(),
            report.emergency_cases.to_string(),
            report.new_admissions.to_string(),
            report.discharges.to_string(),
            format!("{:.4}", report.bed_utilization),
            format!("{:.4}", report.icu_stress_index),
            format!("{:.4}", report.flu_growth_rate),
            format!("{:.4}", report.dengue_growth_rate),
            format!("{:.4}", report.covid_growth_rate),
            format!("{:.4}", report.risk_score),
        ])?;
    }

    Ok(CsvExport {
        filename: feature_filename(facility_id, today),
        payload: into_payload(writer)?,
    })
}

fn raw_filename(facility_id: &str, today: NaiveDate) -> String {
    format!("{facility_id}_slot_reports_{}.csv", today.format("%Y%m%d"))
}

fn feature_filename(facility_id: &str, today: NaiveDate) -> String {
    format!("{facility_id}_features_{}.csv", today.format("%Y%m%d"))
}

fn into_payload(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Buffer(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| ExportError::Buffer(err.to_string()))
}
