use std::sync::Arc;

use crate::clock::{ClockSource, SystemClock};
use crate::data::{BucketSnapshot, MetricBucket, MetricEvent, DEFAULT_MAX_RT};
use crate::ring::{BucketWrap, LeapArray};
use crate::sink::{ErrorSink, LogSink};

/// Sliding-window statistics over a ring of [`MetricBucket`]s.
///
/// Writers record events on the request hot path with [`add_count`]; readers
/// sum the in-window buckets with [`count`] and friends. Resolver faults are
/// reported to the error sink and never surface to the caller: a monitoring
/// fault must not fail the guarded request.
///
/// [`add_count`]: BucketLeapArray::add_count
/// [`count`]: BucketLeapArray::count
pub struct BucketLeapArray<C: ClockSource = SystemClock> {
    data: LeapArray<MetricBucket>,
    clock: C,
    sink: Arc<dyn ErrorSink>,
}

impl BucketLeapArray<SystemClock> {
    /// Creates an aggregator of `sample_count` buckets spanning a window of
    /// `interval_ms`, reading the system clock.
    ///
    /// Both must be positive and `sample_count` must divide `interval_ms`
    /// evenly.
    pub fn new(sample_count: u32, interval_ms: u32) -> BucketLeapArray<SystemClock> {
        Self::with_clock(sample_count, interval_ms, SystemClock::new())
    }
}

impl<C: ClockSource> BucketLeapArray<C> {
    /// Creates an aggregator reading time from `clock`.
    pub fn with_clock(sample_count: u32, interval_ms: u32, clock: C) -> BucketLeapArray<C> {
        Self::with_parts(sample_count, interval_ms, clock, Arc::new(LogSink))
    }

    /// Creates an aggregator with every collaborator injected.
    pub fn with_parts(
        sample_count: u32,
        interval_ms: u32,
        clock: C,
        sink: Arc<dyn ErrorSink>,
    ) -> BucketLeapArray<C> {
        BucketLeapArray {
            data: LeapArray::new(sample_count, interval_ms),
            clock,
            sink,
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.data.sample_count()
    }

    pub fn interval_ms(&self) -> u32 {
        self.data.interval_ms()
    }

    pub fn bucket_length_ms(&self) -> u32 {
        self.data.bucket_length_ms()
    }

    /// Window length in seconds.
    pub fn interval_seconds(&self) -> f64 {
        f64::from(self.data.interval_ms()) / 1000.0
    }

    /// Records `count` occurrences of `event` in the bucket covering now.
    ///
    /// `count` is typically positive; negative values simply accumulate. On
    /// a resolver fault the sample is dropped.
    pub fn add_count(&self, event: MetricEvent, count: i64) {
        self.add_count_with_time(self.clock.now_millis(), event, count);
    }

    pub(crate) fn add_count_with_time(&self, now: u64, event: MetricEvent, count: i64) {
        match self.data.current_bucket_of_time(now) {
            Ok(bucket) => bucket.value().add(event, count),
            Err(err) => self.sink.error(&err, "add_count", now),
        }
    }

    /// Sum of `event` across the buckets inside the window ending now.
    pub fn count(&self, event: MetricEvent) -> i64 {
        self.count_with_time(self.clock.now_millis(), event)
    }

    /// Sum of `event` across the buckets inside the window ending at `now`.
    ///
    /// A resolver fault degrades to a partial-window read instead of
    /// failing.
    pub fn count_with_time(&self, now: u64, event: MetricEvent) -> i64 {
        // Refresh the current slot first so a quiet stretch does not leave a
        // stale bucket counted inside the window.
        if let Err(err) = self.data.current_bucket_of_time(now) {
            self.sink.error(&err, "count", now);
        }

        self.data
            .values_with_time(now)
            .iter()
            .map(|bucket| bucket.value().get(event))
            .sum()
    }

    /// Minimum response time across every live bucket in the ring, or
    /// [`DEFAULT_MAX_RT`] when no sample has been recorded.
    ///
    /// The scan covers the whole ring, not only the in-window slots.
    pub fn min_rt(&self) -> i64 {
        let now = self.clock.now_millis();
        if let Err(err) = self.data.current_bucket_of_time(now) {
            self.sink.error(&err, "min_rt", now);
        }

        self.data
            .iter()
            .map(|bucket| bucket.value().min_rt())
            .min()
            .unwrap_or(DEFAULT_MAX_RT)
    }

    /// The in-window buckets at `now`, refreshing the current slot first.
    ///
    /// Callers must treat the returned slots as read-only.
    pub fn values(&self, now: u64) -> Vec<&BucketWrap<MetricBucket>> {
        if let Err(err) = self.data.current_bucket_of_time(now) {
            self.sink.error(&err, "values", now);
        }
        self.data.values_with_time(now)
    }

    /// The in-window buckets at `now` whose start also satisfies
    /// `predicate(bucket_start, now)`.
    pub fn values_conditional<F>(&self, now: u64, predicate: F) -> Vec<&BucketWrap<MetricBucket>>
    where
        F: Fn(u64, u64) -> bool,
    {
        self.data.values_conditional(now, predicate)
    }

    /// Serialisable projection of the in-window buckets at `now`.
    pub fn snapshots(&self, now: u64) -> Vec<BucketSnapshot> {
        self.values(now)
            .into_iter()
            .map(|bucket| BucketSnapshot::new(bucket.bucket_start(), bucket.value()))
            .collect()
    }
}
