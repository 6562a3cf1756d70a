//! Metrics sink seam. The real aggregation backend is an external
//! collaborator; this module defines only the call shape the dispatcher
//! drives, plus a trivial in-memory sink used by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Records one outcome per handled request. Implementations must tolerate
/// concurrent recorders.
pub trait MetricsSink: Send + Sync {
    fn record(&self, duration: Duration, is_error: bool);
}

/// No-op sink used when no metrics backend is configured.
#[derive(Default)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn record(&self, _duration: Duration, _is_error: bool) {}
}

/// Counts handled requests and errors, for tests.
#[derive(Default)]
pub struct CountingMetricsSink {
    total: AtomicU64,
    errors: AtomicU64,
}

impl CountingMetricsSink {
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }
}

impl MetricsSink for CountingMetricsSink {
    fn record(&self, _duration: Duration, is_error: bool) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if is_error {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
}
