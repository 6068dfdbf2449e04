//! C FFI layer for planeport-core.
//!
//! Provides `#[no_mangle] pub extern "C"` entry points matching
//! `include/planeport.h`. A host creates a surface, hands the returned engine
//! callbacks and opaque pointer to its native decoder, and reads frames
//! between `planeport_surface_begin_read` and `planeport_surface_end_read`.
//! All functions are thread-safe.

// FFI functions intentionally take raw pointers without `unsafe` on the fn signature.
// Each body null-checks its pointers inside ffi_boundary().
#![allow(clippy::not_unsafe_ptr_arg_deref)]
#![allow(clippy::macro_metavars_in_unsafe)]

pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod safety;

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use planeport_core::{
    BufferFormat, FrameSurface, SurfaceConfig, SurfaceState, SurfaceStatsSnapshot, VideoCallbacks,
};

pub use crate::diagnostics::PlaneportDiagnostics;
use crate::error::PlaneportError;
use crate::handle::{ForeignConsumer, PlaneportConsumerCallbacks, PlaneportPlane, PlaneportSurface};
use crate::safety::{ffi_boundary, ffi_boundary_or};

// =========================================================================
// State constants (matching include/planeport.h)
// =========================================================================

const PLANEPORT_STATE_DETACHED: i32 = 0;
const PLANEPORT_STATE_FORMAT_NEGOTIATED: i32 = 1;
const PLANEPORT_STATE_LOCKED: i32 = 2;
const PLANEPORT_STATE_UNLOCKED: i32 = 3;
const PLANEPORT_STATE_DISPLAYED: i32 = 4;
const PLANEPORT_STATE_CLEANED_UP: i32 = 5;
const PLANEPORT_STATE_FAILED: i32 = 6;

// =========================================================================
// Surface lifecycle
// =========================================================================

/// Creates a frame surface for the given chroma code.
///
/// `PLANEPORT_PIN_BUFFERS` / `PLANEPORT_GATE_MODE` in the environment
/// override `pin_buffers` and the default gate mode.
///
/// # Safety
/// - `chroma` must be a valid null-terminated C string naming a built-in
///   format (`RV32`, `RV24`, `RGBA`, `BGRA`, `YUY2`, `UYVY`, `I420`, `YV12`, `NV12`).
/// - `callbacks` must be NULL or point to a valid `PlaneportConsumerCallbacks`;
///   it is copied.
/// - `out_surface` must be a valid non-null pointer to a `*mut PlaneportSurface`.
#[no_mangle]
pub extern "C" fn planeport_surface_create(
    chroma: *const c_char,
    pin_buffers: bool,
    callbacks: *const PlaneportConsumerCallbacks,
    out_surface: *mut *mut PlaneportSurface,
) -> i32 {
    ffi_boundary("planeport_surface_create", || {
        if chroma.is_null() || out_surface.is_null() {
            return Err(PlaneportError::NullPtr);
        }

        // Null out first so callers always see NULL on failure
        unsafe {
            *out_surface = std::ptr::null_mut();
        }

        let code = unsafe { CStr::from_ptr(chroma) }
            .to_str()
            .map_err(|_| PlaneportError::InvalidArgument)?;
        let format = BufferFormat::from_chroma(code).ok_or_else(|| {
            tracing::error!("FFI: unknown chroma code {code:?}");
            PlaneportError::InvalidArgument
        })?;

        let callbacks = if callbacks.is_null() {
            PlaneportConsumerCallbacks {
                user_data: std::ptr::null_mut(),
                allocated_buffers: None,
                display: None,
                cleanup_buffers: None,
            }
        } else {
            unsafe { *callbacks }
        };

        let config = SurfaceConfig::new(format)
            .pin_buffers(pin_buffers)
            .with_env_overrides();
        let surface = FrameSurface::new(config, Arc::new(ForeignConsumer::new(callbacks)))?;

        let raw = Box::into_raw(Box::new(PlaneportSurface::new(surface)));
        if !diagnostics::register_surface(raw) {
            tracing::error!("FFI: new surface {raw:?} was already registered");
        }

        unsafe {
            *out_surface = raw;
        }
        Ok(())
    })
}

/// Destroys a surface: closes any open read, runs cleanup (firing
/// `cleanup_buffers` if a buffer set is live) and frees the handle.
///
/// The engine must have stopped calling the surface's callbacks first.
///
/// # Safety
/// - `surface` must be a valid non-null pointer to a `*mut PlaneportSurface`.
/// - After return, `*surface` is NULL.
#[no_mangle]
pub extern "C" fn planeport_surface_destroy(surface: *mut *mut PlaneportSurface) -> i32 {
    ffi_boundary("planeport_surface_destroy", || {
        if surface.is_null() {
            return Err(PlaneportError::NullPtr);
        }

        // Atomic swap: read the pointer and null it in one operation, so two
        // racing destroys cannot both reach Box::from_raw.
        let atomic = unsafe { AtomicPtr::from_ptr(surface) };
        let surface_ptr = atomic.swap(std::ptr::null_mut(), Ordering::AcqRel);

        if surface_ptr.is_null() {
            return Ok(()); // Already destroyed
        }

        if !diagnostics::unregister_surface(surface_ptr) {
            tracing::error!(
                "FFI: planeport_surface_destroy called with unknown pointer {:?} (possible double-free)",
                surface_ptr
            );
            return Err(PlaneportError::Internal);
        }

        let handle = unsafe { Box::from_raw(surface_ptr) };
        handle.end_read();
        handle.surface.cleanup();
        drop(handle);
        Ok(())
    })
}

// =========================================================================
// Engine wiring
// =========================================================================

/// Returns the callback table and opaque pointer to register with the
/// native engine's video output.
///
/// The opaque pointer stays valid until `planeport_surface_destroy`.
///
/// # Safety
/// - `surface` must be a valid non-null `PlaneportSurface` pointer.
/// - `out_callbacks` and `out_opaque` must be valid non-null pointers.
#[no_mangle]
pub extern "C" fn planeport_surface_engine_callbacks(
    surface: *const PlaneportSurface,
    out_callbacks: *mut VideoCallbacks,
    out_opaque: *mut *mut c_void,
) -> i32 {
    ffi_boundary("planeport_surface_engine_callbacks", || {
        let surface = check_not_null!(surface);
        if out_callbacks.is_null() || out_opaque.is_null() {
            return Err(PlaneportError::NullPtr);
        }
        unsafe {
            *out_callbacks = VideoCallbacks::trampolines();
            *out_opaque = surface.context.opaque();
        }
        Ok(())
    })
}

// =========================================================================
// Host reads
// =========================================================================

/// Blocks until the engine is not writing, then holds the handoff gate.
///
/// Must be paired with `planeport_surface_end_read`. Reads do not nest.
///
/// # Safety
/// `surface` must be a valid non-null `PlaneportSurface` pointer.
#[no_mangle]
pub extern "C" fn planeport_surface_begin_read(surface: *const PlaneportSurface) -> i32 {
    ffi_boundary("planeport_surface_begin_read", || {
        let surface = check_not_null!(surface);
        surface.begin_read()
    })
}

/// Releases the handoff gate taken by `planeport_surface_begin_read`.
///
/// No-op if no read is open or `surface` is NULL.
///
/// # Safety
/// `surface` must be a valid `PlaneportSurface` pointer (or NULL).
#[no_mangle]
pub extern "C" fn planeport_surface_end_read(surface: *const PlaneportSurface) {
    ffi_boundary_or("planeport_surface_end_read", (), || {
        if surface.is_null() {
            return;
        }
        let surface = unsafe { &*surface };
        surface.end_read();
    });
}

/// Describes plane `index` of the current buffer set.
///
/// Only valid between `begin_read` and `end_read`; the plane memory must not
/// be touched after `end_read`.
///
/// # Safety
/// - `surface` must be a valid non-null `PlaneportSurface` pointer.
/// - `out_plane` must be a valid non-null pointer to a `PlaneportPlane`.
#[no_mangle]
pub extern "C" fn planeport_surface_plane(
    surface: *const PlaneportSurface,
    index: u32,
    out_plane: *mut PlaneportPlane,
) -> i32 {
    ffi_boundary("planeport_surface_plane", || {
        let surface = check_not_null!(surface);
        if out_plane.is_null() {
            return Err(PlaneportError::NullPtr);
        }
        unsafe {
            *out_plane = PlaneportPlane::default();
        }
        let plane = surface.plane(index as usize)?;
        unsafe {
            *out_plane = plane;
        }
        Ok(())
    })
}

// =========================================================================
// State queries
// =========================================================================

/// Returns the current surface state.
///
/// # Safety
/// `surface` must be a valid `PlaneportSurface` pointer (or NULL).
#[no_mangle]
pub extern "C" fn planeport_surface_state(surface: *const PlaneportSurface) -> i32 {
    ffi_boundary_or("planeport_surface_state", PLANEPORT_STATE_FAILED, || {
        if surface.is_null() {
            return PLANEPORT_STATE_FAILED;
        }
        let surface = unsafe { &*surface };
        match surface.surface.state() {
            SurfaceState::Detached => PLANEPORT_STATE_DETACHED,
            SurfaceState::FormatNegotiated => PLANEPORT_STATE_FORMAT_NEGOTIATED,
            SurfaceState::Locked => PLANEPORT_STATE_LOCKED,
            SurfaceState::Unlocked => PLANEPORT_STATE_UNLOCKED,
            SurfaceState::Displayed => PLANEPORT_STATE_DISPLAYED,
            SurfaceState::CleanedUp => PLANEPORT_STATE_CLEANED_UP,
            SurfaceState::Failed => PLANEPORT_STATE_FAILED,
        }
    })
}

/// Interrupts the handoff gate: blocked and future reads fail with
/// `PLANEPORT_ERROR_INTERRUPTED` and the surface enters the failed state.
///
/// Stop the engine before calling this; an engine that locks an
/// interrupted surface aborts the process.
///
/// # Safety
/// `surface` must be a valid non-null `PlaneportSurface` pointer.
#[no_mangle]
pub extern "C" fn planeport_surface_interrupt(surface: *const PlaneportSurface) -> i32 {
    ffi_boundary("planeport_surface_interrupt", || {
        let surface = check_not_null!(surface);
        surface.surface.interrupt();
        Ok(())
    })
}

/// Fills a snapshot of the surface's frame counters.
///
/// # Safety
/// - `surface` must be a valid non-null `PlaneportSurface` pointer.
/// - `out` must be a valid non-null pointer to `PlaneportStats`.
#[no_mangle]
pub extern "C" fn planeport_surface_stats(
    surface: *const PlaneportSurface,
    out: *mut SurfaceStatsSnapshot,
) -> i32 {
    ffi_boundary("planeport_surface_stats", || {
        let surface = check_not_null!(surface);
        if out.is_null() {
            return Err(PlaneportError::NullPtr);
        }
        unsafe {
            *out = surface.surface.stats();
        }
        Ok(())
    })
}

// =========================================================================
// Diagnostics
// =========================================================================

/// Fills a snapshot of the process-wide surface bookkeeping.
///
/// # Safety
/// `out` must be a valid non-null pointer to `PlaneportDiagnostics`.
#[no_mangle]
pub extern "C" fn planeport_diagnostics_snapshot(out: *mut PlaneportDiagnostics) -> i32 {
    ffi_boundary("planeport_diagnostics_snapshot", || {
        if out.is_null() {
            return Err(PlaneportError::NullPtr);
        }
        unsafe {
            *out = diagnostics::snapshot();
        }
        Ok(())
    })
}
