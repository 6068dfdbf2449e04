//! Error type shared by every pipeline component.

/// Errors raised by the frame surface pipeline.
///
/// Only the variants that stop a negotiation or a frame are represented here.
/// Degradations the pipeline tolerates (misaligned planes, pin failures) are
/// logged and never surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The host operating system has no memory pinner or surface adapter.
    UnsupportedPlatform(String),
    /// A plane buffer could not be allocated.
    AllocationFailed {
        /// Zero-based index of the plane that failed
        plane: usize,
        /// Requested size in bytes
        size: usize,
    },
    /// The configured format cannot describe a frame of the given geometry.
    InvalidFormat(String),
    /// A blocking wait on the handoff gate was interrupted.
    ///
    /// The lock state can no longer be trusted; the surface refuses any
    /// further frame traffic once this has been observed.
    GateInterrupted,
    /// The render target refused the video output.
    TargetNotReady(String),
    /// A frame operation arrived before any format was negotiated.
    NotNegotiated,
    /// The frame consumer panicked inside the named notification.
    ConsumerPanicked(&'static str),
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::UnsupportedPlatform(os) => {
                write!(f, "Unsupported operating system: {os}")
            }
            SurfaceError::AllocationFailed { plane, size } => {
                write!(f, "Failed to allocate plane {plane} ({size} bytes)")
            }
            SurfaceError::InvalidFormat(msg) => write!(f, "Invalid buffer format: {msg}"),
            SurfaceError::GateInterrupted => {
                write!(f, "Handoff gate wait was interrupted; lock state is inconsistent")
            }
            SurfaceError::TargetNotReady(msg) => write!(f, "Render target not ready: {msg}"),
            SurfaceError::NotNegotiated => write!(f, "No buffer format has been negotiated"),
            SurfaceError::ConsumerPanicked(callback) => {
                write!(f, "Frame consumer panicked in `{callback}`")
            }
        }
    }
}

impl std::error::Error for SurfaceError {}

impl SurfaceError {
    /// Returns true if the error leaves the pipeline unable to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SurfaceError::GateInterrupted | SurfaceError::UnsupportedPlatform(_)
        )
    }
}
