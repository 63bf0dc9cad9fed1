use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors surfaced by the current-bucket resolver.
///
/// These never reach callers of the aggregate API; the aggregator reports
/// them to its error sink and degrades (writes drop, reads continue).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StatError {
    /// The caller's time maps to a slot that has already been rotated past
    /// it, i.e. the clock moved backwards or the caller is badly lagging.
    #[error("time {now} is behind the bucket starting at {bucket_start}")]
    ClockBackwards { now: u64, bucket_start: u64 },

    /// The ring reached a state construction should have made impossible.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(&'static str),
}

/// Capability the ring requires of its per-slot payload.
pub trait BucketPayload {
    /// A payload with no recorded data.
    fn empty() -> Self;

    /// Clears the payload in place for reuse by a new time span.
    fn reset(&self);
}

/// A slot in the ring: the millisecond at which its span begins plus the
/// payload accumulating within that span.
///
/// Slots are allocated once and live for the lifetime of the ring. Rotation
/// republishes `bucket_start` and resets the payload in place; the slot
/// itself is never freed or moved.
#[derive(Debug)]
pub struct BucketWrap<P> {
    bucket_start: AtomicU64,
    value: P,
}

impl<P> BucketWrap<P> {
    /// Millisecond timestamp at which this slot's span begins, floor-aligned
    /// to the bucket length.
    pub fn bucket_start(&self) -> u64 {
        self.bucket_start.load(Ordering::Acquire)
    }

    /// The slot's payload. Writers may still be adding to it.
    pub fn value(&self) -> &P {
        &self.value
    }
}

/// A fixed ring of time buckets whose slots are repurposed as time advances.
///
/// `sample_count` slots of `bucket_length_ms` each cover a sliding window of
/// `interval_ms`. The slot responsible for a given time is resolved without
/// locks: a stale slot is claimed by a compare-and-swap on its start
/// timestamp, and the winner resets the payload.
pub struct LeapArray<P> {
    array: Box<[BucketWrap<P>]>,
    sample_count: u32,
    bucket_length_ms: u32,
    interval_ms: u32,
}

impl<P: BucketPayload> LeapArray<P> {
    /// Creates a ring of `sample_count` buckets spanning `interval_ms`.
    ///
    /// Both must be positive and `sample_count` must divide `interval_ms`
    /// evenly.
    pub fn new(sample_count: u32, interval_ms: u32) -> LeapArray<P> {
        assert!(sample_count > 0, "sample_count must be positive");
        assert!(interval_ms > 0, "interval_ms must be positive");
        assert!(
            interval_ms % sample_count == 0,
            "interval_ms must be evenly divisible by sample_count"
        );
        let bucket_length_ms = interval_ms / sample_count;

        // Slot i starts life owning the span [i * L, (i + 1) * L), so the
        // first touch of any slot goes through the same CAS path as every
        // later rotation.
        let array = (0..sample_count)
            .map(|i| BucketWrap {
                bucket_start: AtomicU64::new(u64::from(i) * u64::from(bucket_length_ms)),
                value: P::empty(),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        LeapArray {
            array,
            sample_count,
            bucket_length_ms,
            interval_ms,
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn bucket_length_ms(&self) -> u32 {
        self.bucket_length_ms
    }

    fn time_idx(&self, now: u64) -> usize {
        ((now / u64::from(self.bucket_length_ms)) % u64::from(self.sample_count)) as usize
    }

    fn bucket_start_of(&self, now: u64) -> u64 {
        now - now % u64::from(self.bucket_length_ms)
    }

    /// Resolves the slot responsible for `now`, rotating a stale slot into
    /// the current span if needed.
    ///
    /// A lagging `now` is served from its slot as long as the slot still
    /// carries the matching span; once the slot has been rotated past the
    /// caller's time this fails with [`StatError::ClockBackwards`].
    pub fn current_bucket_of_time(&self, now: u64) -> Result<&BucketWrap<P>, StatError> {
        let idx = self.time_idx(now);
        if idx >= self.array.len() {
            return Err(StatError::InternalInconsistency(
                "time index outside the ring",
            ));
        }
        let start = self.bucket_start_of(now);
        let slot = &self.array[idx];

        loop {
            let old_start = slot.bucket_start.load(Ordering::Acquire);
            if old_start == start {
                return Ok(slot);
            } else if start > old_start {
                // The slot belongs to a prior revolution; claim it. AcqRel on
                // success keeps the payload reset below from being reordered
                // before the claim is visible.
                match slot.bucket_start.compare_exchange(
                    old_start,
                    start,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        slot.value.reset();
                        return Ok(slot);
                    }
                    // Another thread rotated first; reload and retry.
                    Err(_) => continue,
                }
            } else {
                return Err(StatError::ClockBackwards {
                    now,
                    bucket_start: old_start,
                });
            }
        }
    }

    /// Every slot whose span still falls within the window ending at `now`.
    ///
    /// Slots mid-rotation may or may not be included; callers tolerate both.
    pub fn values_with_time(&self, now: u64) -> Vec<&BucketWrap<P>> {
        self.values_conditional(now, |_, _| true)
    }

    /// In-window slots additionally filtered by `predicate(bucket_start, now)`.
    pub fn values_conditional<F>(&self, now: u64, predicate: F) -> Vec<&BucketWrap<P>>
    where
        F: Fn(u64, u64) -> bool,
    {
        let window = u64::from(self.interval_ms);
        self.array
            .iter()
            .filter(|slot| {
                let start = slot.bucket_start();
                start <= now && now - start < window && predicate(start, now)
            })
            .collect()
    }

    /// Every slot in the ring, in-window or not.
    pub fn iter(&self) -> impl Iterator<Item = &BucketWrap<P>> {
        self.array.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{BucketPayload, LeapArray, StatError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug)]
    struct Tally {
        hits: AtomicU64,
        resets: AtomicU64,
    }

    impl Tally {
        fn hit(&self) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        fn hits(&self) -> u64 {
            self.hits.load(Ordering::Relaxed)
        }

        fn resets(&self) -> u64 {
            self.resets.load(Ordering::Relaxed)
        }
    }

    impl BucketPayload for Tally {
        fn empty() -> Tally {
            Tally {
                hits: AtomicU64::new(0),
                resets: AtomicU64::new(0),
            }
        }

        fn reset(&self) {
            self.hits.store(0, Ordering::Relaxed);
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn ring() -> LeapArray<Tally> {
        LeapArray::new(4, 1000)
    }

    #[test]
    fn test_initial_layout() {
        let ring = ring();

        assert_eq!(ring.sample_count(), 4);
        assert_eq!(ring.interval_ms(), 1000);
        assert_eq!(ring.bucket_length_ms(), 250);

        let starts: Vec<u64> = ring.iter().map(|slot| slot.bucket_start()).collect();
        assert_eq!(starts, vec![0, 250, 500, 750]);
    }

    #[test]
    #[should_panic(expected = "sample_count must be positive")]
    fn test_zero_sample_count_rejected() {
        LeapArray::<Tally>::new(0, 1000);
    }

    #[test]
    #[should_panic(expected = "interval_ms must be positive")]
    fn test_zero_interval_rejected() {
        LeapArray::<Tally>::new(4, 0);
    }

    #[test]
    #[should_panic(expected = "evenly divisible")]
    fn test_remainder_interval_rejected() {
        LeapArray::<Tally>::new(3, 1000);
    }

    #[test]
    fn test_matching_slot_is_returned_without_reset() {
        let ring = ring();

        let slot = ring.current_bucket_of_time(100).unwrap();
        assert_eq!(slot.bucket_start(), 0);
        assert_eq!(slot.value().resets(), 0);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let ring = ring();

        let first = ring.current_bucket_of_time(1100).unwrap();
        assert_eq!(first.bucket_start(), 1000);
        assert_eq!(first.value().resets(), 1);

        let second = ring.current_bucket_of_time(1100).unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(second.value().resets(), 1);
    }

    #[test]
    fn test_rotation_clears_the_stale_payload() {
        let ring = ring();

        let slot = ring.current_bucket_of_time(0).unwrap();
        slot.value().hit();
        slot.value().hit();
        assert_eq!(slot.value().hits(), 2);

        // One full revolution later the same slot covers [1000, 1250).
        let rotated = ring.current_bucket_of_time(1000).unwrap();
        assert!(std::ptr::eq(slot, rotated));
        assert_eq!(rotated.bucket_start(), 1000);
        assert_eq!(rotated.value().hits(), 0);
        assert_eq!(rotated.value().resets(), 1);
    }

    #[test]
    fn test_lagging_time_with_matching_span_is_served() {
        let ring = ring();

        ring.current_bucket_of_time(1000).unwrap();

        // 999 maps to the slot still carrying [750, 1000); no fault.
        let slot = ring.current_bucket_of_time(999).unwrap();
        assert_eq!(slot.bucket_start(), 750);
    }

    #[test]
    fn test_rotated_past_time_fails_clock_backwards() {
        let ring = ring();

        let slot = ring.current_bucket_of_time(1999).unwrap();
        assert_eq!(slot.bucket_start(), 1750);

        let err = ring.current_bucket_of_time(999).unwrap_err();
        assert_eq!(
            err,
            StatError::ClockBackwards {
                now: 999,
                bucket_start: 1750,
            }
        );
    }

    #[test]
    fn test_window_filter_excludes_expired_and_future_slots() {
        let ring = ring();

        // Only slot 0 has started by t = 200; the rest are future-owned.
        let starts: Vec<u64> = ring
            .values_with_time(200)
            .iter()
            .map(|slot| slot.bucket_start())
            .collect();
        assert_eq!(starts, vec![0]);

        ring.current_bucket_of_time(1700).unwrap();
        for slot in ring.values_with_time(1700) {
            let start = slot.bucket_start();
            assert!(start > 700, "start {} fell out of the window", start);
            assert!(start <= 1700);
        }
    }

    #[test]
    fn test_boundary_bucket_is_out_of_window() {
        let ring = ring();

        ring.current_bucket_of_time(0).unwrap();
        // now - start == interval_ms is already outside.
        let included = ring
            .values_with_time(1000)
            .iter()
            .any(|slot| slot.bucket_start() == 0);
        assert!(!included);
    }

    #[test]
    fn test_values_conditional_sub_window() {
        let ring = ring();

        ring.current_bucket_of_time(1100).unwrap();
        let recent = ring.values_conditional(1100, |start, now| now - start < 250);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].bucket_start(), 1000);
    }

    #[test]
    fn test_bucket_starts_stay_aligned_and_unique() {
        let ring = ring();

        for now in [0u64, 123, 760, 1004, 1990, 2511, 3750, 4002] {
            let slot = ring.current_bucket_of_time(now).unwrap();
            assert_eq!(slot.bucket_start(), now - now % 250);

            let aligned = ring.iter().all(|s| s.bucket_start() % 250 == 0);
            assert!(aligned);

            let current = now - now % 250;
            let owners = ring
                .iter()
                .filter(|s| s.bucket_start() == current)
                .count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn test_racing_rotation_resets_exactly_once() {
        let ring = Arc::new(LeapArray::<Tally>::new(4, 1000));
        let mut handles = vec![];

        // All threads find the slot for t = 1100 stale and race the CAS.
        for _ in 0..8 {
            let ring = ring.clone();
            handles.push(thread::spawn(move || {
                let slot = ring.current_bucket_of_time(1100).unwrap();
                slot.value().hit();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let slot = ring.current_bucket_of_time(1100).unwrap();
        assert_eq!(slot.bucket_start(), 1000);
        assert_eq!(slot.value().resets(), 1);
        // A hit landing between the winning CAS and its reset is wiped; that
        // bounded loss is accepted by the rotation protocol.
        let hits = slot.value().hits();
        assert!(hits >= 1 && hits <= 8, "hits = {}", hits);
    }
}
