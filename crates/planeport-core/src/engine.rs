//! Native engine boundary.
//!
//! The engine calls plain C function pointers with an opaque context pointer,
//! from its own decode thread. A surface registers with an engine through a
//! fixed table of trampolines ([`VideoCallbacks::trampolines`]) and a
//! [`CallbackContext`]: one strong `Arc` reference turned into a raw pointer
//! that stays valid until the surface is detached.
//!
//! ```text
//! engine ──format/lock/unlock/display/cleanup(opaque)──▶ trampoline
//!                                                          │ &*opaque
//!                                                          ▼
//!                                                     FrameSurface
//! ```

use std::ffi::c_void;
use std::os::raw::{c_char, c_uint};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::adapter::WindowBinding;
use crate::error::SurfaceError;
use crate::format::MAX_PLANES;
use crate::safety::callback_boundary;
use crate::surface::FrameSurface;

/// `format(opaque**, chroma[4], width*, height*, pitches[5], lines[5]) -> planes`
pub type FormatCallback = unsafe extern "C" fn(
    opaque: *mut *mut c_void,
    chroma: *mut c_char,
    width: *mut c_uint,
    height: *mut c_uint,
    pitches: *mut c_uint,
    lines: *mut c_uint,
) -> c_uint;

/// `cleanup(opaque)`
pub type CleanupCallback = unsafe extern "C" fn(opaque: *mut c_void);

/// `lock(opaque, planes[5]) -> picture`
pub type LockCallback = unsafe extern "C" fn(opaque: *mut c_void, planes: *mut *mut c_void) -> *mut c_void;

/// `unlock(opaque, picture, planes[5])`
pub type UnlockCallback =
    unsafe extern "C" fn(opaque: *mut c_void, picture: *mut c_void, planes: *const *mut c_void);

/// `display(opaque, picture)`
pub type DisplayCallback = unsafe extern "C" fn(opaque: *mut c_void, picture: *mut c_void);

/// Function-pointer table handed to the engine's video output.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VideoCallbacks {
    pub format: FormatCallback,
    pub cleanup: CleanupCallback,
    pub lock: LockCallback,
    pub unlock: UnlockCallback,
    pub display: DisplayCallback,
}

impl VideoCallbacks {
    /// The trampolines dispatching to a [`FrameSurface`] behind the opaque
    /// pointer of a [`CallbackContext`].
    pub fn trampolines() -> Self {
        Self {
            format: format_trampoline,
            cleanup: cleanup_trampoline,
            lock: lock_trampoline,
            unlock: unlock_trampoline,
            display: display_trampoline,
        }
    }
}

/// A render target or media player that can feed decoded frames to
/// callbacks.
pub trait VideoOutputTarget: Send + Sync {
    /// Returns true if a video output may be attached right now.
    fn can_attach_video(&self) -> bool;

    /// Installs (`Some`) or removes (`None`) the engine's video callbacks.
    ///
    /// `opaque` is passed back verbatim as the first argument of every
    /// callback. After a `None` call returns, the engine must not invoke the
    /// previous callbacks again.
    fn set_video_callbacks(&self, callbacks: Option<&VideoCallbacks>, opaque: *mut c_void);

    /// Points the engine's own display path at a native window.
    fn set_window(&self, binding: WindowBinding) -> Result<(), SurfaceError> {
        Err(SurfaceError::TargetNotReady(format!(
            "target cannot render into {binding:?}"
        )))
    }
}

/// Strong surface reference parked behind a raw opaque pointer.
///
/// The pointer stays valid for as long as the context lives.
pub struct CallbackContext {
    surface: NonNull<FrameSurface>,
}

impl CallbackContext {
    pub fn new(surface: &Arc<FrameSurface>) -> Self {
        let raw = Arc::into_raw(Arc::clone(surface));
        Self {
            // SAFETY: Arc::into_raw never returns null.
            surface: unsafe { NonNull::new_unchecked(raw.cast_mut()) },
        }
    }

    /// The value to pass as the engine's opaque pointer.
    pub fn opaque(&self) -> *mut c_void {
        self.surface.as_ptr().cast()
    }
}

impl Drop for CallbackContext {
    fn drop(&mut self) {
        // SAFETY: balances the Arc::into_raw in new().
        drop(unsafe { Arc::from_raw(self.surface.as_ptr().cast_const()) });
    }
}

impl std::fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CallbackContext").field(&self.surface).finish()
    }
}

// SAFETY: the context is an owned Arc<FrameSurface> and FrameSurface is
// Send + Sync.
unsafe impl Send for CallbackContext {}
unsafe impl Sync for CallbackContext {}

/// A surface registered with a [`VideoOutputTarget`].
///
/// Detaching (explicitly or on drop) removes the callbacks from the target,
/// runs cleanup if the engine left a buffer set behind, and returns the
/// surface to [`SurfaceState::Detached`](crate::surface::SurfaceState::Detached).
pub struct AttachedSurface<T: VideoOutputTarget> {
    surface: Arc<FrameSurface>,
    target: Arc<T>,
    context: Option<CallbackContext>,
}

impl<T: VideoOutputTarget> AttachedSurface<T> {
    pub fn surface(&self) -> &Arc<FrameSurface> {
        &self.surface
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Unregisters from the target and hands the surface back.
    pub fn detach(mut self) -> Arc<FrameSurface> {
        self.release();
        Arc::clone(&self.surface)
    }

    fn release(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        self.target.set_video_callbacks(None, ptr::null_mut());
        self.surface.cleanup();
        self.surface.mark_detached();
        drop(context);
        tracing::debug!("Frame surface detached from video output");
    }
}

impl<T: VideoOutputTarget> Drop for AttachedSurface<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl FrameSurface {
    /// Registers this surface's callbacks with `target`.
    ///
    /// Fails with [`SurfaceError::TargetNotReady`] (and registers nothing) if
    /// the target does not accept a video output right now.
    pub fn attach<T: VideoOutputTarget>(
        self: &Arc<Self>,
        target: Arc<T>,
    ) -> Result<AttachedSurface<T>, SurfaceError> {
        if !target.can_attach_video() {
            tracing::warn!("Video output target refused the frame surface");
            return Err(SurfaceError::TargetNotReady(
                "target cannot accept a video output".to_string(),
            ));
        }

        let context = CallbackContext::new(self);
        let callbacks = VideoCallbacks::trampolines();
        target.set_video_callbacks(Some(&callbacks), context.opaque());
        tracing::info!(
            "Frame surface attached ({} output)",
            self.config().format.chroma()
        );

        Ok(AttachedSurface {
            surface: Arc::clone(self),
            target,
            context: Some(context),
        })
    }
}

/// # Safety
/// `opaque` must be null or come from a live [`CallbackContext`].
unsafe fn surface_from<'a>(opaque: *mut c_void) -> Option<&'a FrameSurface> {
    let surface = opaque.cast::<FrameSurface>().cast_const().as_ref();
    if surface.is_none() {
        tracing::error!("Engine callback invoked with a null context");
    }
    surface
}

unsafe extern "C" fn format_trampoline(
    opaque: *mut *mut c_void,
    chroma: *mut c_char,
    width: *mut c_uint,
    height: *mut c_uint,
    pitches: *mut c_uint,
    lines: *mut c_uint,
) -> c_uint {
    callback_boundary("format", 0, || {
        if opaque.is_null()
            || chroma.is_null()
            || width.is_null()
            || height.is_null()
            || pitches.is_null()
            || lines.is_null()
        {
            tracing::error!("Engine format callback received a null descriptor field");
            return 0;
        }
        let Some(surface) = surface_from(*opaque) else {
            return 0;
        };
        let (w, h) = (*width, *height);

        let layout = match surface.format(w, h) {
            Ok(layout) => layout,
            Err(e) => {
                tracing::error!("Rejecting {w}x{h} output: {e}");
                return 0;
            }
        };

        // Only the significant chroma bytes; the rest of the field is the
        // engine's.
        let code = surface.config().format.chroma();
        ptr::copy_nonoverlapping(code.as_bytes().as_ptr(), chroma.cast::<u8>(), code.len());
        for (i, (pitch, rows)) in layout.pitches().iter().zip(layout.lines()).enumerate().take(MAX_PLANES) {
            *pitches.add(i) = *pitch;
            *lines.add(i) = *rows;
        }

        layout.plane_count() as c_uint
    })
}

unsafe extern "C" fn cleanup_trampoline(opaque: *mut c_void) {
    callback_boundary("cleanup", (), || {
        if let Some(surface) = surface_from(opaque) {
            surface.cleanup();
        }
    })
}

unsafe extern "C" fn lock_trampoline(opaque: *mut c_void, planes: *mut *mut c_void) -> *mut c_void {
    callback_boundary("lock", ptr::null_mut(), || {
        let Some(surface) = surface_from(opaque) else {
            return ptr::null_mut();
        };
        if planes.is_null() {
            tracing::error!("Engine lock callback received a null plane array");
            return ptr::null_mut();
        }

        match surface.lock() {
            Ok(pointers) => {
                for (i, plane) in pointers.as_slice().iter().enumerate() {
                    *planes.add(i) = plane.cast();
                }
            }
            Err(SurfaceError::GateInterrupted) => {
                // The engine is about to write into plane memory and cannot
                // be told no; continuing would race the reader.
                tracing::error!("Handoff gate interrupted inside the engine's lock callback; aborting");
                std::process::abort();
            }
            Err(e) => {
                tracing::error!("Engine lock callback failed: {e}");
                for i in 0..MAX_PLANES {
                    *planes.add(i) = ptr::null_mut();
                }
            }
        }
        // Single picture; the engine only needs a non-dangling token.
        ptr::null_mut()
    })
}

unsafe extern "C" fn unlock_trampoline(opaque: *mut c_void, _picture: *mut c_void, _planes: *const *mut c_void) {
    callback_boundary("unlock", (), || {
        if let Some(surface) = surface_from(opaque) {
            surface.unlock();
        }
    })
}

unsafe extern "C" fn display_trampoline(opaque: *mut c_void, _picture: *mut c_void) {
    callback_boundary("display", (), || {
        if let Some(surface) = surface_from(opaque) {
            surface.display();
        }
    })
}
