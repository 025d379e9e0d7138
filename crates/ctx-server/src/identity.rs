// crates/ctx-server/src/identity.rs
// Clock and id-generation capabilities

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Mutex;

/// Generate a new opaque identifier (UUID v4).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Clock capability. All timestamps are UTC with millisecond precision.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// RFC 3339 timestamp with millisecond precision, for TEXT columns.
    fn now_rfc3339(&self) -> String {
        self.now_utc().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock wrapper that guarantees strictly increasing timestamps.
///
/// Two messages created in the same millisecond would otherwise tie on
/// `created_at` and lose their total order; this bumps the later one
/// forward by 1 ms.
pub struct MonotonicClock {
    inner: Box<dyn Clock>,
    last_millis: Mutex<i64>,
}

impl MonotonicClock {
    pub fn new(inner: Box<dyn Clock>) -> Self {
        Self {
            inner,
            last_millis: Mutex::new(0),
        }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemClock))
    }
}

impl Clock for MonotonicClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let now = self.inner.now_utc();
        let mut last = self.last_millis.lock().unwrap_or_else(|e| e.into_inner());
        let millis = now.timestamp_millis().max(*last + 1);
        *last = millis;
        DateTime::from_timestamp_millis(millis).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_rfc3339_millis_format() {
        let ts = SystemClock.now_rfc3339();
        // e.g. 2026-08-01T12:34:56.789Z
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.split('.').count(), 2);
        assert_eq!(ts.split('.').next_back().map(|f| f.len()), Some(4)); // "789Z"
    }

    #[test]
    fn test_monotonic_clock_strictly_increasing() {
        let clock = MonotonicClock::system();
        let mut prev = clock.now_utc();
        for _ in 0..50 {
            let next = clock.now_utc();
            assert!(next > prev, "timestamps must strictly increase");
            prev = next;
        }
    }

    struct FrozenClock(DateTime<Utc>);
    impl Clock for FrozenClock {
        fn now_utc(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn test_monotonic_clock_advances_past_frozen_source() {
        let frozen = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let clock = MonotonicClock::new(Box::new(FrozenClock(frozen)));
        let a = clock.now_utc();
        let b = clock.now_utc();
        let c = clock.now_utc();
        assert_eq!(b.timestamp_millis() - a.timestamp_millis(), 1);
        assert_eq!(c.timestamp_millis() - b.timestamp_millis(), 1);
    }
}
