//! Frame traffic counters.
//!
//! Counters are relaxed atomics bumped from the engine thread; a snapshot is
//! a consistent-enough view for diagnostics, not an exact cut.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct SurfaceStats {
    negotiations: AtomicU64,
    allocation_failures: AtomicU64,
    frames_locked: AtomicU64,
    frames_displayed: AtomicU64,
    reads: AtomicU64,
}

impl SurfaceStats {
    pub(crate) fn record_negotiation(&self) {
        self.negotiations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock(&self) {
        self.frames_locked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_display(&self) {
        self.frames_displayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pin_failures: u64) -> SurfaceStatsSnapshot {
        SurfaceStatsSnapshot {
            negotiations: self.negotiations.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            frames_locked: self.frames_locked.load(Ordering::Relaxed),
            frames_displayed: self.frames_displayed.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            pin_failures,
        }
    }
}

/// Snapshot of a surface's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SurfaceStatsSnapshot {
    /// Successful format negotiations
    pub negotiations: u64,
    /// Negotiations rejected because a plane could not be allocated
    pub allocation_failures: u64,
    /// Engine `lock` calls that published plane pointers
    pub frames_locked: u64,
    /// Frames forwarded to the consumer
    pub frames_displayed: u64,
    /// Consumer reads bracketed by the gate
    pub reads: u64,
    /// Failed pin/unpin calls
    pub pin_failures: u64,
}
