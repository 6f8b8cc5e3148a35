//! Read-side projections of records owned by the external memory store.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest known state of a stored memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Opaque identifier, stable across updates.
    pub id: String,
    /// Natural-language content.
    #[serde(rename = "memory")]
    pub text: String,
    /// Creation timestamp as written by the store.
    pub created_at: Option<String>,
    /// Last update timestamp as written by the store.
    pub updated_at: Option<String>,
}

/// Timestamps of the most recent log row for one memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordTimestamps {
    /// `created_at` column.
    pub created_at: Option<String>,
    /// `updated_at` column.
    pub updated_at: Option<String>,
}

/// One event returned by the external store after an add call.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AddEvent {
    /// Memory id affected by the event.
    pub id: String,
    /// Memory text after the event.
    pub memory: String,
    /// Event kind (`ADD`, `UPDATE`, `DELETE`, `NONE`).
    pub event: Option<String>,
}

impl AddEvent {
    /// Whether this event leaves indexable text behind.
    #[must_use]
    pub fn is_indexable(&self) -> bool {
        if self.id.is_empty() || self.memory.is_empty() {
            return false;
        }
        !matches!(
            self.event.as_deref().map(str::to_ascii_uppercase).as_deref(),
            Some("DELETE" | "NONE")
        )
    }
}

/// Result envelope of an add call: `{"results": [...]}` or a bare list.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum AddEvents {
    /// `{"results": [...]}`.
    Wrapped {
        /// Events.
        results: Vec<AddEvent>,
    },
    /// `[...]`.
    Bare(Vec<AddEvent>),
}

impl AddEvents {
    /// Flatten into the event list.
    #[must_use]
    pub fn into_events(self) -> Vec<AddEvent> {
        match self {
            Self::Wrapped { results } | Self::Bare(results) => results,
        }
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"];

/// Parse a store timestamp. Naive values are read as UTC.
///
/// Returns `None` for empty or unrecognised input.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
