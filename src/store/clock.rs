//! Monotonic logical clock owned by the `Store` (spec §3, §5).
//!
//! Wall-clock time can run backward (NTP adjustment) or stall (clock
//! resolution); the Store must still hand out strictly increasing
//! timestamps so that two events in the same process are always orderable.

use crate::domain::Timestamp;
use chrono::Utc;
use parking_lot::Mutex;

pub struct LogicalClock {
    last: Mutex<Timestamp>,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Timestamp::from_chrono(Utc::now())),
        }
    }

    /// Returns a timestamp guaranteed to be strictly greater than every
    /// timestamp previously returned by this clock.
    pub fn tick(&self) -> Timestamp {
        let mut last = self.last.lock();
        let now = Timestamp::from_chrono(Utc::now());
        let next = if now > *last {
            now
        } else {
            bump(*last)
        };
        *last = next;
        next
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(t: Timestamp) -> Timestamp {
    if t.nanos < 999_999_999 {
        Timestamp {
            secs: t.secs,
            nanos: t.nanos + 1,
        }
    } else {
        Timestamp {
            secs: t.secs + 1,
            nanos: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_strictly_increasing() {
        let clock = LogicalClock::new();
        let mut prev = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }
}
