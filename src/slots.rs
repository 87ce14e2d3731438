//! Slot calendar: the fixed partition of facility-local time into 6-hour buckets.
//!
//! A slot is identified by the wire string `"YYYY-MM-DD_HH"` with `HH` one of
//! `00`, `06`, `12`, `18`. The zero-padded fixed-width encoding is the wire
//! contract: lexicographic order over slot identifiers equals chronological
//! order, and the store's key-ordered listing relies on it.

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Width of one slot window, in hours. Slots start at local midnight.
pub const SLOT_HOURS: u32 = 6;

/// Identifier of one 6-hour reporting window on the facility-local clock.
///
/// Construction is total: any string can be wrapped via [`SlotId::from_raw`]
/// so that legacy keys already in the store never fail to load. Identifiers
/// that do not parse are treated as opaque labels; [`SlotId::window_start`]
/// returns `None` for them and callers exclude them from date arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(String);

impl SlotId {
    /// The slot containing the given facility-local instant.
    ///
    /// Uses the local wall-clock hour, not UTC, so slot boundaries do not
    /// drift across timezones.
    pub fn at(instant: NaiveDateTime) -> Self {
        let bucket = (instant.hour() / SLOT_HOURS) * SLOT_HOURS;
        SlotId(format!("{}_{:02}", instant.date().format("%Y-%m-%d"), bucket))
    }

    /// Wrap a raw store key without validating it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        SlotId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local date-time at the start of this slot's window.
    ///
    /// `None` if the identifier is malformed (missing separator, unparsable
    /// date, hour not on a 6-hour boundary). Never panics.
    pub fn window_start(&self) -> Option<NaiveDateTime> {
        let (date_part, hour_part) = self.0.split_once('_')?;
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
        let hour: u32 = hour_part.parse().ok()?;
        if hour >= 24 || hour % SLOT_HOURS != 0 {
            return None;
        }
        date.and_hms_opt(hour, 0, 0)
    }

    /// Calendar date of the slot window, if the identifier parses.
    pub fn date(&self) -> Option<NaiveDate> {
        self.window_start().map(|w| w.date())
    }

    /// Zero-padded hour label (`"00"`, `"06"`, `"12"`, `"18"`).
    pub fn hour_label(&self) -> Option<String> {
        self.window_start().map(|w| format!("{:02}", w.hour()))
    }

    /// The identifier one slot window after this one.
    pub fn next(&self) -> Option<SlotId> {
        self.window_start()
            .map(|w| SlotId::at(w + Duration::hours(SLOT_HOURS as i64)))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Smallest slot-window start strictly greater than the given instant.
///
/// Rolls over correctly at the 18:00 boundary into the next day, month, or
/// year; chrono's date arithmetic carries the overflow.
pub fn next_slot_boundary(instant: NaiveDateTime) -> NaiveDateTime {
    let current_start = SlotId::at(instant)
        .window_start()
        .unwrap_or(instant);
    current_start + Duration::hours(SLOT_HOURS as i64)
}
