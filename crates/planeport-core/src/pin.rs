//! Page locking for plane buffers.
//!
//! Decoded frames are written by the engine at video rate; if the kernel pages
//! a plane out under memory pressure the next write stalls the decode thread.
//! Pinning keeps the buffers resident. It is a latency guarantee only: every
//! failure here is reported to the caller, which logs it and carries on.

use std::io;

use crate::error::SurfaceError;

/// OS page-lock strategy, selected once per surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPinner {
    /// `mlock`/`munlock`
    Posix,
    /// `VirtualLock`/`VirtualUnlock`
    Windows,
}

impl MemoryPinner {
    /// Selects the pinner for the running operating system.
    pub fn detect() -> Result<Self, SurfaceError> {
        if cfg!(unix) {
            Ok(MemoryPinner::Posix)
        } else if cfg!(windows) {
            Ok(MemoryPinner::Windows)
        } else {
            Err(SurfaceError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ))
        }
    }

    /// Locks `len` bytes starting at `addr` into physical memory.
    ///
    /// # Safety
    /// `addr..addr + len` must be a live allocation owned by the caller.
    pub unsafe fn pin(&self, addr: *const u8, len: usize) -> io::Result<()> {
        match self {
            MemoryPinner::Posix => posix::lock(addr, len),
            MemoryPinner::Windows => win32::lock(addr, len),
        }
    }

    /// Releases a lock taken by [`MemoryPinner::pin`].
    ///
    /// # Safety
    /// Same as [`MemoryPinner::pin`]; the range must match a previous pin.
    pub unsafe fn unpin(&self, addr: *const u8, len: usize) -> io::Result<()> {
        match self {
            MemoryPinner::Posix => posix::unlock(addr, len),
            MemoryPinner::Windows => win32::unlock(addr, len),
        }
    }
}

#[cfg(unix)]
mod posix {
    use std::io;

    pub(super) unsafe fn lock(addr: *const u8, len: usize) -> io::Result<()> {
        if libc::mlock(addr.cast(), len) == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) unsafe fn unlock(addr: *const u8, len: usize) -> io::Result<()> {
        if libc::munlock(addr.cast(), len) == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
mod posix {
    use std::io;

    pub(super) unsafe fn lock(_addr: *const u8, _len: usize) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub(super) unsafe fn unlock(_addr: *const u8, _len: usize) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

#[cfg(windows)]
mod win32 {
    use std::io;

    use windows::Win32::System::Memory::{VirtualLock, VirtualUnlock};

    pub(super) unsafe fn lock(addr: *const u8, len: usize) -> io::Result<()> {
        VirtualLock(addr.cast(), len).map_err(io::Error::other)
    }

    pub(super) unsafe fn unlock(addr: *const u8, len: usize) -> io::Result<()> {
        VirtualUnlock(addr.cast(), len).map_err(io::Error::other)
    }
}

#[cfg(not(windows))]
mod win32 {
    use std::io;

    pub(super) unsafe fn lock(_addr: *const u8, _len: usize) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub(super) unsafe fn unlock(_addr: *const u8, _len: usize) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn detects_posix_on_unix() {
        assert_eq!(MemoryPinner::detect(), Ok(MemoryPinner::Posix));
    }

    #[test]
    #[cfg(windows)]
    fn detects_windows_on_windows() {
        assert_eq!(MemoryPinner::detect(), Ok(MemoryPinner::Windows));
    }

    #[test]
    #[cfg(unix)]
    fn foreign_strategy_reports_unsupported() {
        let page = vec![0u8; 4096];
        let err = unsafe { MemoryPinner::Windows.pin(page.as_ptr(), page.len()) }.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn pin_round_trip_never_panics() {
        // RLIMIT_MEMLOCK may be tiny in CI; only the absence of a crash matters.
        let pinner = MemoryPinner::detect().unwrap();
        let page = vec![0u8; 4096];
        unsafe {
            if pinner.pin(page.as_ptr(), page.len()).is_ok() {
                pinner.unpin(page.as_ptr(), page.len()).unwrap();
            }
        }
    }
}
