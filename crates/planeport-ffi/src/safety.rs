//! Panic containment for the C entry points.
//!
//! A panic must never unwind into the host. Status-returning entry points run
//! their body in [`ffi_boundary`], value-returning ones in
//! [`ffi_boundary_or`]. A contained panic is logged under the entry point's
//! name and counted in the diagnostics snapshot.
//!
//! `AssertUnwindSafe` holds because handle and surface state sit behind
//! `parking_lot` locks, which do not poison and are released on unwind.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::diagnostics;
use crate::error::PlaneportError;

/// Runs a status-returning entry point, mapping the result to its raw code.
///
/// A panic yields `PLANEPORT_ERROR_INTERNAL`.
pub fn ffi_boundary<F>(entry: &'static str, f: F) -> i32
where
    F: FnOnce() -> Result<(), PlaneportError>,
{
    ffi_boundary_or(entry, PlaneportError::Internal.as_raw(), || match f() {
        Ok(()) => PlaneportError::Ok.as_raw(),
        Err(e) => {
            tracing::debug!("FFI: `{entry}` failed with {e:?}");
            e.as_raw()
        }
    })
}

/// Runs a value-returning entry point, returning `default` if it panics.
pub fn ffi_boundary_or<T, F>(entry: &'static str, default: T, f: F) -> T
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(panic) => {
            tracing::error!("FFI: `{entry}` panicked: {}", panic_message(&*panic));
            diagnostics::record_boundary_panic();
            default
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Dereferences a handle pointer, returning `PlaneportError::NullPtr` from
/// the enclosing closure if it is null.
///
/// # Safety
/// A non-null pointer must point to a live value with no outstanding
/// mutable reference while the yielded `&T` is in use.
#[macro_export]
macro_rules! check_not_null {
    ($ptr:expr) => {
        if $ptr.is_null() {
            return Err($crate::error::PlaneportError::NullPtr);
        } else {
            unsafe { &*$ptr }
        }
    };
}
