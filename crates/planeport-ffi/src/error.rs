//! Error codes for the FFI boundary.

use planeport_core::SurfaceError;

/// FFI error codes matching `include/planeport.h`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneportError {
    Ok = 0,
    NullPtr = 1,
    InvalidArgument = 2,
    AllocFailed = 3,
    Interrupted = 4,
    Unsupported = 5,
    Internal = 6,
}

impl From<SurfaceError> for PlaneportError {
    fn from(e: SurfaceError) -> Self {
        match e {
            SurfaceError::AllocationFailed { .. } => PlaneportError::AllocFailed,
            SurfaceError::GateInterrupted => PlaneportError::Interrupted,
            SurfaceError::UnsupportedPlatform(_) => PlaneportError::Unsupported,
            SurfaceError::InvalidFormat(_) | SurfaceError::NotNegotiated => {
                PlaneportError::InvalidArgument
            }
            SurfaceError::TargetNotReady(_) | SurfaceError::ConsumerPanicked(_) => {
                PlaneportError::Internal
            }
        }
    }
}

impl PlaneportError {
    /// Convert to the raw i32 for FFI return.
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}
