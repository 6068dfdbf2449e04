//! Native window binding for the engine's own display path.
//!
//! When frames are not pulled through a [`FrameSurface`](crate::surface::FrameSurface),
//! the engine renders straight into a platform window. Which kind of handle
//! it takes depends on the host OS and is selected once with
//! [`SurfaceAdapter::detect`].

use std::ffi::c_void;

use crate::engine::VideoOutputTarget;
use crate::error::SurfaceError;

/// Window system the engine renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceAdapter {
    /// X11 window id
    Xlib,
    /// `HWND`
    Win32,
    /// `NSView`
    Cocoa,
}

/// A native window handle tagged with its window system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBinding {
    Xlib { window: u32 },
    Win32 { hwnd: *mut c_void },
    Cocoa { ns_view: *mut c_void },
}

impl SurfaceAdapter {
    /// Selects the adapter for the running operating system.
    pub fn detect() -> Result<Self, SurfaceError> {
        if cfg!(target_os = "macos") {
            Ok(SurfaceAdapter::Cocoa)
        } else if cfg!(windows) {
            Ok(SurfaceAdapter::Win32)
        } else if cfg!(any(
            target_os = "linux",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            Ok(SurfaceAdapter::Xlib)
        } else {
            Err(SurfaceError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ))
        }
    }

    /// Tags a raw window handle for this adapter.
    ///
    /// X11 window ids are 32-bit; larger values are rejected.
    pub fn bind(&self, handle: *mut c_void) -> Result<WindowBinding, SurfaceError> {
        if handle.is_null() {
            return Err(SurfaceError::TargetNotReady("null window handle".to_string()));
        }
        match self {
            SurfaceAdapter::Xlib => u32::try_from(handle as usize)
                .map(|window| WindowBinding::Xlib { window })
                .map_err(|_| {
                    SurfaceError::TargetNotReady(format!("{handle:p} is not an X11 window id"))
                }),
            SurfaceAdapter::Win32 => Ok(WindowBinding::Win32 { hwnd: handle }),
            SurfaceAdapter::Cocoa => Ok(WindowBinding::Cocoa { ns_view: handle }),
        }
    }

    /// Hands `handle` to `target` as its output window.
    pub fn attach<T: VideoOutputTarget + ?Sized>(
        &self,
        target: &T,
        handle: *mut c_void,
    ) -> Result<(), SurfaceError> {
        if !target.can_attach_video() {
            return Err(SurfaceError::TargetNotReady(
                "target cannot accept a video output".to_string(),
            ));
        }
        let binding = self.bind(handle)?;
        tracing::debug!("Binding engine output to {binding:?}");
        target.set_window(binding)
    }
}
