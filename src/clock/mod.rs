use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

mod mock;
pub use self::mock::Mock;

/// A source of wall-clock milliseconds.
///
/// The aggregator only requires that readings be non-decreasing per thread;
/// small jitter across threads is tolerated by the rotation protocol.
pub trait ClockSource {
    fn now_millis(&self) -> u64;
}

impl<T: ClockSource> ClockSource for Arc<T> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// The default clock.
///
/// Captures the unix epoch offset once at construction and advances it with
/// a monotonic source, so readings are wall-clock-valued but cannot step
/// backwards when the system clock is adjusted.
#[derive(Clone)]
pub struct SystemClock {
    anchor_ms: u64,
    source: quanta::Clock,
    origin: quanta::Instant,
}

impl SystemClock {
    pub fn new() -> SystemClock {
        let source = quanta::Clock::new();
        let origin = source.now();
        let anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        SystemClock {
            anchor_ms,
            source,
            origin,
        }
    }
}

impl Default for SystemClock {
    fn default() -> SystemClock {
        SystemClock::new()
    }
}

impl ClockSource for SystemClock {
    fn now_millis(&self) -> u64 {
        let elapsed = self.source.now().duration_since(self.origin);
        self.anchor_ms + elapsed.as_millis() as u64
    }
}
