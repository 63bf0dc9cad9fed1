use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt::{self, Display};

pub mod bucket;

pub use self::bucket::MetricBucket;

/// Sentinel minimum-response-time value meaning "no sample recorded".
pub const DEFAULT_MAX_RT: i64 = i32::MAX as i64;

/// A metric dimension recorded per bucket.
///
/// `Rt` accumulates a running sum of response-time samples; the bucket keeps
/// the minimum sample in a separate register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MetricEvent {
    Pass,
    Block,
    Complete,
    Error,
    Rt,
}

impl MetricEvent {
    pub const COUNT: usize = 5;

    pub const ALL: [MetricEvent; Self::COUNT] = [
        MetricEvent::Pass,
        MetricEvent::Block,
        MetricEvent::Complete,
        MetricEvent::Error,
        MetricEvent::Rt,
    ];
}

impl Display for MetricEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MetricEvent::Pass => write!(f, "pass"),
            MetricEvent::Block => write!(f, "block"),
            MetricEvent::Complete => write!(f, "complete"),
            MetricEvent::Error => write!(f, "error"),
            MetricEvent::Rt => write!(f, "rt"),
        }
    }
}

/// A point-in-time view of a single bucket.
///
/// Unlike the live bucket, a snapshot is plain data: it can be held, compared
/// and serialized without observing concurrent writers.
#[derive(Clone, Debug)]
pub struct BucketSnapshot {
    bucket_start_ms: u64,
    counters: HashMap<MetricEvent, i64, FnvBuildHasher>,
    min_rt: i64,
}

impl BucketSnapshot {
    pub(crate) fn new(bucket_start_ms: u64, bucket: &MetricBucket) -> BucketSnapshot {
        let mut counters = HashMap::<MetricEvent, i64, FnvBuildHasher>::default();
        for event in MetricEvent::ALL {
            counters.insert(event, bucket.get(event));
        }

        BucketSnapshot {
            bucket_start_ms,
            counters,
            min_rt: bucket.min_rt(),
        }
    }

    /// Millisecond timestamp at which the captured bucket's span begins.
    pub fn bucket_start_ms(&self) -> u64 {
        self.bucket_start_ms
    }

    /// Gets the captured counter value for the given event.
    pub fn count(&self, event: MetricEvent) -> i64 {
        *self.counters.get(&event).unwrap_or(&0)
    }

    /// Gets the captured minimum response time.
    ///
    /// Returns [`DEFAULT_MAX_RT`] if the bucket held no `Rt` sample.
    pub fn min_rt(&self) -> i64 {
        self.min_rt
    }
}

impl Serialize for BucketSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let field_count = self.counters.len() + 2;
        let mut map = serializer.serialize_map(Some(field_count))?;
        map.serialize_entry("bucket_start_ms", &self.bucket_start_ms)?;
        for (event, value) in &self.counters {
            map.serialize_entry(&event.to_string(), value)?;
        }
        map.serialize_entry("min_rt", &self.min_rt)?;
        map.end()
    }
}
