use std::array;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::data::{MetricEvent, DEFAULT_MAX_RT};
use crate::ring::BucketPayload;

/// Per-bucket statistics: one atomic counter per event kind plus the minimum
/// response time seen since the last reset.
pub struct MetricBucket {
    counters: [AtomicI64; MetricEvent::COUNT],
    min_rt: AtomicI64,
}

impl MetricBucket {
    pub fn new() -> MetricBucket {
        MetricBucket {
            counters: array::from_fn(|_| AtomicI64::new(0)),
            min_rt: AtomicI64::new(DEFAULT_MAX_RT),
        }
    }

    /// Adds `count` to the counter for `event`.
    ///
    /// `Rt` samples additionally fold into the running minimum.
    pub fn add(&self, event: MetricEvent, count: i64) {
        self.counters[event as usize].fetch_add(count, Ordering::Relaxed);
        if event == MetricEvent::Rt {
            self.update_min_rt(count);
        }
    }

    fn update_min_rt(&self, rt: i64) {
        let mut current = self.min_rt.load(Ordering::Relaxed);
        loop {
            if rt >= current {
                break;
            }
            match self
                .min_rt
                .compare_exchange_weak(current, rt, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(x) => current = x,
            }
        }
    }

    pub fn get(&self, event: MetricEvent) -> i64 {
        self.counters[event as usize].load(Ordering::Relaxed)
    }

    /// Minimum `Rt` sample since the last reset, or [`DEFAULT_MAX_RT`] if
    /// none was recorded.
    pub fn min_rt(&self) -> i64 {
        self.min_rt.load(Ordering::Relaxed)
    }

    /// Clears every counter and restores the min-RT sentinel.
    ///
    /// Only the rotation protocol calls this, so no two threads reset the
    /// same bucket concurrently; readers may observe a partially-reset
    /// bucket and must tolerate it.
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.min_rt.store(DEFAULT_MAX_RT, Ordering::Relaxed);
    }
}

impl Default for MetricBucket {
    fn default() -> MetricBucket {
        MetricBucket::new()
    }
}

impl BucketPayload for MetricBucket {
    fn empty() -> MetricBucket {
        MetricBucket::new()
    }

    fn reset(&self) {
        MetricBucket::reset(self);
    }
}
