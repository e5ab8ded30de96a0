//! Time-throttled progress reporting.

use crate::namespace::Namespace;
use std::time::{Duration, Instant};
use tracing::info;

/// Reports copy progress for one namespace at most once per interval.
#[derive(Debug)]
pub struct ProgressMeter {
    nss: Namespace,
    interval: Duration,
    last_report: Instant,
    seen: u64,
}

impl ProgressMeter {
    /// Starts a meter for `nss`.
    #[must_use]
    pub fn new(nss: Namespace, interval: Duration) -> Self {
        Self {
            nss,
            interval,
            last_report: Instant::now(),
            seen: 0,
        }
    }

    /// Counts one processed document. Returns true if a report was logged.
    pub fn hit(&mut self) -> bool {
        self.seen += 1;
        self.maybe_report(Instant::now())
    }

    /// Number of documents counted.
    #[must_use]
    pub fn seen(&self) -> u64 {
        self.seen
    }

    fn maybe_report(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_report) < self.interval {
            return false;
        }
        self.last_report = now;
        info!(ns = %self.nss, seen = self.seen, "clone progress");
        true
    }
}
