//! Monotonic logical timestamp (spec §3: "All timestamps are monotonic
//! logical timestamps issued by the Store").

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 64-bit seconds since epoch plus nanos, per spec §6 "Persisted formats".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    pub fn to_chrono(self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.secs, self.nanos)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn from_chrono(dt: DateTime<Utc>) -> Self {
        Self {
            secs: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
        }
    }

    /// Nanoseconds since epoch, used for strict ordering comparisons.
    fn total_nanos(self) -> i128 {
        self.secs as i128 * 1_000_000_000 + self.nanos as i128
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_nanos().cmp(&other.total_nanos())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_chrono().to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_nanos_then_secs() {
        let a = Timestamp { secs: 10, nanos: 5 };
        let b = Timestamp { secs: 10, nanos: 6 };
        let c = Timestamp { secs: 11, nanos: 0 };
        assert!(a < b);
        assert!(b < c);
    }
}
