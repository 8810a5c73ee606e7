//! Engine counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the multiplexer's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxStats {
    /// Logical requests received.
    pub requests: u64,
    /// Requests that joined an operation already in flight.
    pub coalesced: u64,
    /// Transport operations started.
    pub transports_started: u64,
    /// Abort calls issued to the transport.
    pub aborts: u64,
    /// Operations that fanned out to their subscribers.
    pub completions: u64,
    /// Completions discarded because their entry was gone or superseded.
    pub stale_completions: u64,
    /// Subscribers removed by cancellation.
    pub cancellations: u64,
    /// Keys with an operation currently in flight.
    pub in_flight: usize,
}

impl MuxStats {
    /// Share of requests that did not need their own transport operation.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.requests as f64
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub requests: AtomicU64,
    pub coalesced: AtomicU64,
    pub transports_started: AtomicU64,
    pub aborts: AtomicU64,
    pub completions: AtomicU64,
    pub stale_completions: AtomicU64,
    pub cancellations: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, in_flight: usize) -> MuxStats {
        MuxStats {
            requests: self.requests.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            transports_started: self.transports_started.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            stale_completions: self.stale_completions.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            in_flight,
        }
    }
}
