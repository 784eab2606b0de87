// crates/opscore-core/src/time.rs
// ============================================================================
// Module: Ops Core Time Model
// Description: Canonical timestamp representation for events, leases, and projections.
// Purpose: Provide a single replayable time type; the core never reads the
//          wall clock on its own, callers thread `Timestamp` values through.
// Dependencies: time, serde
// ============================================================================

//! ## Overview
//! Every domain computation in this workspace (lease expiry, trust windows,
//! approval TTLs) takes an explicit `Timestamp` parameter rather than calling
//! [`std::time::SystemTime::now`] internally. This keeps the projector and
//! lease state machines deterministic and replayable under test; only the
//! engine façade (the layer that would sit behind an HTTP handler) calls
//! [`Timestamp::now`].

use std::cmp::Ordering;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Canonical timestamp used across the event store, leases, and projections.
///
/// # Invariants
/// - Always UTC; construction normalizes any offset to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time in UTC.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an existing `OffsetDateTime`, normalizing it to UTC.
    #[must_use]
    pub fn from_offset(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    /// Returns the inner `OffsetDateTime`.
    #[must_use]
    pub const fn as_offset(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns a timestamp `seconds` in the future of `self`.
    #[must_use]
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + Duration::seconds(seconds))
    }

    /// Returns the whole-second difference `self - other`.
    #[must_use]
    pub fn seconds_since(&self, other: &Self) -> i64 {
        (self.0 - other.0).whole_seconds()
    }

    /// Parses an RFC 3339 timestamp string.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is not valid RFC 3339.
    pub fn parse_rfc3339(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).map(Self::from_offset)
    }

    /// Renders the timestamp as an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting fails (only possible for out-of-range values).
    pub fn to_rfc3339(&self) -> Result<String, time::error::Format> {
        self.0.format(&Rfc3339)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;

    #[test]
    fn plus_seconds_moves_forward() {
        let t0 = Timestamp::now();
        let t1 = t0.plus_seconds(30);
        assert_eq!(t1.seconds_since(&t0), 30);
        assert!(t1 > t0);
    }

    #[test]
    fn rfc3339_round_trips() {
        let t0 = Timestamp::now();
        let rendered = t0.to_rfc3339().expect("format");
        let parsed = Timestamp::parse_rfc3339(&rendered).expect("parse");
        assert_eq!(parsed.seconds_since(&t0), 0);
    }
}
