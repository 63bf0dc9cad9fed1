use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::ClockSource;

/// A clock driven manually by tests.
pub struct Mock {
    offset: AtomicU64,
}

impl Mock {
    pub fn new(offset: u64) -> Self {
        Self {
            offset: AtomicU64::new(offset),
        }
    }

    pub fn increment(&self, millis: u64) {
        self.offset.fetch_add(millis, Ordering::Release);
    }
}

impl ClockSource for Mock {
    fn now_millis(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }
}
