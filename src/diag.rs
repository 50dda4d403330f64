//! Diagnostic counters for the channels' leniency policy.
//!
//! Malformed frames, undeliverable sends, and fetch failures are dropped by
//! design — the server is trusted and transport hiccups recover on their own.
//! These counters make the drops observable without changing that behavior.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Diagnostics {
    malformed_frames: AtomicU64,
    pongs_swallowed: AtomicU64,
    dropped_sends: AtomicU64,
    fetch_failures: AtomicU64,
    leaked_interests: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DiagSnapshot {
    pub malformed_frames: u64,
    pub pongs_swallowed: u64,
    pub dropped_sends: u64,
    pub fetch_failures: u64,
    /// Attach interests a subscription could not release on drop.
    pub leaked_interests: u64,
}

impl Diagnostics {
    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.pongs_swallowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_send(&self) {
        self.dropped_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_leaked_interest(&self) {
        self.leaked_interests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagSnapshot {
        DiagSnapshot {
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            pongs_swallowed: self.pongs_swallowed.load(Ordering::Relaxed),
            dropped_sends: self.dropped_sends.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            leaked_interests: self.leaked_interests.load(Ordering::Relaxed),
        }
    }
}
