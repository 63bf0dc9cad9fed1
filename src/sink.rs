use log::error;

use crate::ring::StatError;

/// Sink for resolver faults.
///
/// The aggregator never raises these to its caller; they are reported here
/// while the operation degrades (writes drop, reads continue with a partial
/// window).
pub trait ErrorSink: Send + Sync {
    /// Reports a fault raised while `op` was resolving the bucket for `now`.
    fn error(&self, err: &StatError, op: &'static str, now: u64);
}

/// The default sink: forwards to the `log` facade at error level.
pub struct LogSink;

impl ErrorSink for LogSink {
    fn error(&self, err: &StatError, op: &'static str, now: u64) {
        error!("{} failed to resolve the current bucket at now={}: {}", op, now, err);
    }
}

/// A sink that discards every fault.
pub struct NullSink;

impl ErrorSink for NullSink {
    fn error(&self, _err: &StatError, _op: &'static str, _now: u64) {}
}
