//! Server timestamp shapes and their canonical epoch-millisecond form.
//!
//! The backend is not consistent about how it hands back a clock value: a
//! freshly written record round-trips with a structured server-timestamp
//! object, an exported record may carry an RFC 3339 date, an already
//! normalized record carries plain millis, and a record written this instant
//! has no resolved value at all. [`Stamp`] covers all four shapes and
//! [`Stamp::millis`] collapses any of them to one sortable integer without
//! ever failing — rendering must not block on server confirmation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::now_millis;

/// One server timestamp, in whichever shape the backend delivered it.
///
/// Deserialization is untagged: a `{seconds, nanos}` object, an RFC 3339
/// string, a bare integer, or `null`/absent all parse.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Stamp {
    /// Structured server-timestamp object, as stored by the backend.
    Server { seconds: i64, nanos: u32 },
    /// An RFC 3339 date value.
    Date(DateTime<Utc>),
    /// Already epoch milliseconds.
    Millis(i64),
    /// Not yet resolved — the server clock value has not round-tripped.
    #[default]
    Unset,
}

impl Stamp {
    /// Canonical epoch milliseconds.
    ///
    /// Precedence: the server object's own arithmetic, else the date value's
    /// instant, else a plain integer as-is. `Unset` falls back to the current
    /// local time as a placeholder; the authoritative push supersedes it.
    pub fn millis(&self) -> i64 {
        match self {
            Stamp::Server { seconds, nanos } => seconds * 1_000 + i64::from(nanos / 1_000_000),
            Stamp::Date(dt) => dt.timestamp_millis(),
            Stamp::Millis(ms) => *ms,
            Stamp::Unset => now_millis(),
        }
    }

    /// Companion display accessor: same precedence as [`Stamp::millis`], but
    /// returns a date value for formatting.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        match self {
            Stamp::Date(dt) => *dt,
            other => DateTime::from_timestamp_millis(other.millis()).unwrap_or_else(Utc::now),
        }
    }

    /// Whether a server clock value is present (in any shape).
    pub fn is_set(&self) -> bool {
        !matches!(self, Stamp::Unset)
    }

    /// Collapse to the canonical `Millis` form in place.
    ///
    /// Applied to every incoming record at ingest so that an `Unset`
    /// placeholder is pinned once instead of drifting on every read.
    pub fn resolve(&mut self) {
        *self = Stamp::Millis(self.millis());
    }
}
