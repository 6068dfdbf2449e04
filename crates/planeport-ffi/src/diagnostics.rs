//! Process-wide bookkeeping of surface handles.
//!
//! Every handle returned by `planeport_surface_create` is recorded here until
//! `planeport_surface_destroy` takes it out again. Destroy refuses a pointer
//! the registry does not hold, so a double destroy or a foreign pointer
//! becomes an error code instead of a double free.
//!
//! Tracking is by address only: a stale pointer whose address the allocator
//! has since handed to a newer surface is indistinguishable from it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use parking_lot::Mutex;

use crate::handle::PlaneportSurface;

/// Diagnostics snapshot (matches `PlaneportDiagnostics` in the C header).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneportDiagnostics {
    /// Surfaces created over the process lifetime
    pub surfaces_created: u64,
    /// Surfaces destroyed over the process lifetime
    pub surfaces_destroyed: u64,
    /// Most surfaces alive at once
    pub surfaces_peak: u64,
    /// Surfaces alive now
    pub surfaces_live: u64,
    /// Destroy calls refused because the pointer was not a live surface
    pub rejected_destroys: u64,
    /// Panics contained at the C boundary
    pub boundary_panics: u64,
}

#[derive(Default)]
struct Registry {
    live: HashSet<usize>,
    created: u64,
    destroyed: u64,
    peak: usize,
    rejected: u64,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::default()));
static BOUNDARY_PANICS: AtomicU64 = AtomicU64::new(0);

/// Records a freshly created surface. Returns `false` if the address is
/// already live, which means a handle leaked out of the registry.
pub fn register_surface(surface: *const PlaneportSurface) -> bool {
    let mut registry = REGISTRY.lock();
    if !registry.live.insert(surface as usize) {
        return false;
    }
    registry.created += 1;
    registry.peak = registry.peak.max(registry.live.len());
    true
}

/// Takes a surface out of the registry ahead of freeing it. Returns `false`
/// (and counts a rejected destroy) if `surface` is not live.
pub fn unregister_surface(surface: *const PlaneportSurface) -> bool {
    let mut registry = REGISTRY.lock();
    if registry.live.remove(&(surface as usize)) {
        registry.destroyed += 1;
        true
    } else {
        registry.rejected += 1;
        false
    }
}

pub(crate) fn record_boundary_panic() {
    BOUNDARY_PANICS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> PlaneportDiagnostics {
    let registry = REGISTRY.lock();
    PlaneportDiagnostics {
        surfaces_created: registry.created,
        surfaces_destroyed: registry.destroyed,
        surfaces_peak: registry.peak as u64,
        surfaces_live: registry.live.len() as u64,
        rejected_destroys: registry.rejected,
        boundary_panics: BOUNDARY_PANICS.load(Ordering::Relaxed),
    }
}
