//! Reporting policy constants.
//!
//! The risk weighting and alert watermarks were hardcoded throughout the
//! original dashboard; here they live in one configurable struct so live
//! aggregation and backfill share identical derivation rules.

use serde::{Deserialize, Serialize};

/// Tunable policy for derived metrics and threshold alerts.
///
/// The three risk weights must sum to 1.0; [`ReportingPolicy::default`]
/// carries the documented 0.4 / 0.3 / 0.3 split (ICU stress, bed
/// utilization, emergency load).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingPolicy {
    /// Weight of the ICU stress index in the composite risk score.
    pub icu_weight: f64,
    /// Weight of bed utilization in the composite risk score.
    pub bed_weight: f64,
    /// Weight of normalized emergency load in the composite risk score.
    pub emergency_weight: f64,
    /// Bed utilization above this raises the over-capacity alert.
    pub over_capacity_watermark: f64,
    /// ICU stress above this raises the ICU-critical alert.
    pub icu_critical_watermark: f64,
    /// Any disease growth rate above this raises the disease-spike alert.
    pub disease_spike_threshold: f64,
}

impl Default for ReportingPolicy {
    fn default() -> Self {
        Self {
            icu_weight: 0.4,
            bed_weight: 0.3,
            emergency_weight: 0.3,
            over_capacity_watermark: 0.85,
            icu_critical_watermark: 0.90,
            disease_spike_threshold: 0.40,
        }
    }
}

impl ReportingPolicy {
    /// Load the policy from `PULSEBOARD_*` environment variables, falling
    /// back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            icu_weight: env_f64("PULSEBOARD_ICU_WEIGHT", base.icu_weight),
            bed_weight: env_f64("PULSEBOARD_BED_WEIGHT", base.bed_weight),
            emergency_weight: env_f64("PULSEBOARD_EMERGENCY_WEIGHT", base.emergency_weight),
            over_capacity_watermark: env_f64(
                "PULSEBOARD_OVER_CAPACITY_WATERMARK",
                base.over_capacity_watermark,
            ),
            icu_critical_watermark: env_f64(
                "PULSEBOARD_ICU_CRITICAL_WATERMARK",
                base.icu_critical_watermark,
            ),
            disease_spike_threshold: env_f64(
                "PULSEBOARD_DISEASE_SPIKE_THRESHOLD",
                base.disease_spike_threshold,
            ),
        }
    }
}

fn env_f64(key: &str, fallback: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}
