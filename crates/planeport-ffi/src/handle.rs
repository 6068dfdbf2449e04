//! FFI handle types.
//!
//! [`PlaneportSurface`] owns a [`FrameSurface`] plus the [`CallbackContext`]
//! whose opaque pointer the host hands to its engine. [`ForeignConsumer`]
//! forwards buffer notifications to C function pointers.

use std::ffi::c_void;
use std::sync::Arc;

use parking_lot::Mutex;

use planeport_core::{CallbackContext, FrameConsumer, FrameSurface, NegotiatedFormat, PlaneView};

use crate::error::PlaneportError;

/// One plane as seen from C (matches `PlaneportPlane` in the header).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneportPlane {
    pub data: *mut u8,
    /// Size in bytes, `pitch * lines`.
    pub len: usize,
    pub pitch: u32,
    pub lines: u32,
}

impl Default for PlaneportPlane {
    fn default() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
            pitch: 0,
            lines: 0,
        }
    }
}

impl From<&PlaneView> for PlaneportPlane {
    fn from(view: &PlaneView) -> Self {
        Self {
            data: view.as_ptr(),
            len: view.len(),
            pitch: view.pitch(),
            lines: view.lines(),
        }
    }
}

/// Negotiated format as seen from C (matches `PlaneportFormat`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneportFormat {
    /// Chroma code; only the first `chroma_len` bytes are significant.
    pub chroma: [u8; 4],
    pub chroma_len: u32,
    pub width: u32,
    pub height: u32,
    pub plane_count: u32,
}

impl From<&NegotiatedFormat> for PlaneportFormat {
    fn from(format: &NegotiatedFormat) -> Self {
        let code = format.format.chroma();
        let mut chroma = [0u8; 4];
        chroma[..code.len()].copy_from_slice(code.as_bytes());
        Self {
            chroma,
            chroma_len: code.len() as u32,
            width: format.width,
            height: format.height,
            plane_count: format.layout.plane_count() as u32,
        }
    }
}

pub type PlanesCallback =
    unsafe extern "C" fn(user_data: *mut c_void, planes: *const PlaneportPlane, count: usize);

pub type DisplayCallback = unsafe extern "C" fn(
    user_data: *mut c_void,
    planes: *const PlaneportPlane,
    count: usize,
    format: *const PlaneportFormat,
);

/// Host callbacks (matches `PlaneportConsumerCallbacks`). Any entry may be
/// NULL.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PlaneportConsumerCallbacks {
    pub user_data: *mut c_void,
    pub allocated_buffers: Option<PlanesCallback>,
    pub display: Option<DisplayCallback>,
    pub cleanup_buffers: Option<PlanesCallback>,
}

/// [`FrameConsumer`] backed by C function pointers.
pub(crate) struct ForeignConsumer {
    callbacks: PlaneportConsumerCallbacks,
}

impl ForeignConsumer {
    pub(crate) fn new(callbacks: PlaneportConsumerCallbacks) -> Self {
        Self { callbacks }
    }
}

// SAFETY: the host promises its callbacks and user_data may be used from the
// engine's decode thread (documented in the header).
unsafe impl Send for ForeignConsumer {}
unsafe impl Sync for ForeignConsumer {}

fn to_planes(buffers: &[PlaneView]) -> Vec<PlaneportPlane> {
    buffers.iter().map(PlaneportPlane::from).collect()
}

impl FrameConsumer for ForeignConsumer {
    fn allocated_buffers(&self, buffers: &[PlaneView]) {
        if let Some(cb) = self.callbacks.allocated_buffers {
            let planes = to_planes(buffers);
            unsafe { cb(self.callbacks.user_data, planes.as_ptr(), planes.len()) };
        }
    }

    fn display(&self, buffers: &[PlaneView], format: &NegotiatedFormat) {
        if let Some(cb) = self.callbacks.display {
            let planes = to_planes(buffers);
            let format = PlaneportFormat::from(format);
            unsafe { cb(self.callbacks.user_data, planes.as_ptr(), planes.len(), &format) };
        }
    }

    fn cleanup_buffers(&self, buffers: &[PlaneView]) {
        if let Some(cb) = self.callbacks.cleanup_buffers {
            let planes = to_planes(buffers);
            unsafe { cb(self.callbacks.user_data, planes.as_ptr(), planes.len()) };
        }
    }
}

/// Opaque surface handle exposed via FFI.
///
/// `context` keeps one strong reference parked for the engine; it is
/// released when the handle is destroyed.
pub struct PlaneportSurface {
    pub(crate) surface: Arc<FrameSurface>,
    pub(crate) context: CallbackContext,
    /// True between `begin_read` and `end_read`
    pub(crate) reading: Mutex<bool>,
}

impl PlaneportSurface {
    pub(crate) fn new(surface: FrameSurface) -> Self {
        let surface = Arc::new(surface);
        let context = CallbackContext::new(&surface);
        Self {
            surface,
            context,
            reading: Mutex::new(false),
        }
    }

    /// Takes the handoff gate for a host read.
    ///
    /// Reads do not nest: a second `begin_read` without `end_read` is an
    /// error, since the gate would deadlock against itself.
    pub(crate) fn begin_read(&self) -> Result<(), PlaneportError> {
        if *self.reading.lock() {
            return Err(PlaneportError::InvalidArgument);
        }
        self.surface.begin_read()?;
        *self.reading.lock() = true;
        Ok(())
    }

    /// Returns the gate taken by `begin_read`. No-op if no read is open.
    pub(crate) fn end_read(&self) {
        let mut reading = self.reading.lock();
        if std::mem::take(&mut *reading) {
            self.surface.end_read();
        }
    }

    pub(crate) fn plane(&self, index: usize) -> Result<PlaneportPlane, PlaneportError> {
        if !*self.reading.lock() {
            tracing::warn!("FFI: plane requested outside begin_read/end_read");
            return Err(PlaneportError::InvalidArgument);
        }
        let (views, _) = self
            .surface
            .current_buffers()
            .ok_or(PlaneportError::InvalidArgument)?;
        views
            .get(index)
            .map(PlaneportPlane::from)
            .ok_or(PlaneportError::InvalidArgument)
    }
}
