//! Aligned plane buffers for one negotiated format.
//!
//! The pool owns at most one buffer set: one contiguous allocation per plane,
//! each exactly `pitch * lines` bytes and aligned to [`PLANE_ALIGNMENT`]. Raw
//! addresses are lent to the engine (to write) and to the consumer (to read);
//! ownership never leaves the pool, and every address dies with [`free`].
//!
//! [`free`]: AlignedBufferPool::free

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::SurfaceError;
use crate::format::{FrameLayout, MAX_PLANES};
use crate::pin::MemoryPinner;

/// Base address alignment the engine requires for every plane.
pub const PLANE_ALIGNMENT: usize = 32;

/// Source of plane memory.
///
/// The pool asks for `PLANE_ALIGNMENT` and verifies what it gets back, so an
/// allocator that cannot honour the alignment still works (with a warning).
pub trait PlaneAllocator: Send + Sync {
    /// Allocates `size` bytes, or returns `None` on failure.
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Releases memory returned by [`PlaneAllocator::allocate`].
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this allocator with the same `size`
    /// and `align`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

impl<A: PlaneAllocator + ?Sized> PlaneAllocator for Box<A> {
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size, align)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        (**self).deallocate(ptr, size, align)
    }
}

/// Global-allocator backed plane memory, zero-initialized.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl PlaneAllocator for SystemAllocator {
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;
        // SAFETY: layout has a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if let Ok(layout) = Layout::from_size_align(size, align) {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// One plane of the live buffer set, owned by the pool.
#[derive(Debug)]
pub struct PlaneBuffer {
    ptr: NonNull<u8>,
    len: usize,
    pitch: u32,
    lines: u32,
    pinned: bool,
}

impl PlaneBuffer {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size in bytes, always `pitch * lines`.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    /// Returns true if the plane is locked against paging.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Borrowed view for engine or consumer use.
    pub fn view(&self) -> PlaneView {
        PlaneView {
            ptr: self.ptr.as_ptr(),
            len: self.len,
            pitch: self.pitch,
            lines: self.lines,
        }
    }
}

// SAFETY: The pool is the sole owner of the allocation; the pointer is never
// aliased mutably by Rust code, only lent out as a raw address.
unsafe impl Send for PlaneBuffer {}
unsafe impl Sync for PlaneBuffer {}

/// Borrowed view of a plane, valid until the buffer set is freed.
///
/// Views are plain addresses: holding one does not keep memory alive. They
/// must not be used after the surface's cleanup callback has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneView {
    ptr: *mut u8,
    len: usize,
    pitch: u32,
    lines: u32,
}

impl PlaneView {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    /// Returns true if the base address satisfies [`PLANE_ALIGNMENT`].
    pub fn is_aligned(&self) -> bool {
        (self.ptr as usize) % PLANE_ALIGNMENT == 0
    }

    /// Reads the plane as a byte slice.
    ///
    /// # Safety
    /// The buffer set must still be live, and no thread may write the plane
    /// while the slice exists (hold the surface's handoff gate).
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }
}

// SAFETY: A view is an address plus geometry. Access to the memory behind it
// is synchronized by the handoff gate, not by the view.
unsafe impl Send for PlaneView {}
unsafe impl Sync for PlaneView {}

/// Plane base addresses handed to the engine's write path.
#[derive(Debug, Clone, Copy)]
pub struct PlanePointers {
    ptrs: [*mut u8; MAX_PLANES],
    len: usize,
}

impl PlanePointers {
    pub fn as_slice(&self) -> &[*mut u8] {
        &self.ptrs[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: see PlaneView.
unsafe impl Send for PlanePointers {}

/// Whether the live buffer set is locked against paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    /// Pinning disabled, or no buffer set is live
    Unpinned,
    /// Every plane is pinned
    Pinned,
    /// Pinning was requested but at least one plane could not be pinned
    Degraded,
}

/// Owner of the (at most one) live buffer set.
pub struct AlignedBufferPool<A: PlaneAllocator = SystemAllocator> {
    allocator: A,
    pinner: Option<MemoryPinner>,
    planes: Vec<PlaneBuffer>,
    pin_failures: u64,
}

impl AlignedBufferPool<SystemAllocator> {
    /// Creates an empty pool backed by the global allocator.
    ///
    /// `pinner` is `Some` when buffers should be locked against paging.
    pub fn new(pinner: Option<MemoryPinner>) -> Self {
        Self::with_allocator(SystemAllocator, pinner)
    }
}

impl<A: PlaneAllocator> AlignedBufferPool<A> {
    pub fn with_allocator(allocator: A, pinner: Option<MemoryPinner>) -> Self {
        Self {
            allocator,
            pinner,
            planes: Vec::new(),
            pin_failures: 0,
        }
    }

    /// Allocates one buffer per plane of `layout` and returns the plane count.
    ///
    /// Any live buffer set is freed first. If a plane cannot be allocated,
    /// the planes already allocated by this call are released and the pool is
    /// left empty.
    pub fn allocate(&mut self, layout: &FrameLayout) -> Result<usize, SurfaceError> {
        if self.is_allocated() {
            tracing::debug!("Re-negotiation: releasing previous buffer set");
            self.free();
        }

        let mut planes = Vec::with_capacity(layout.plane_count());
        for plane in 0..layout.plane_count() {
            match self.allocate_plane(layout, plane) {
                Ok(buffer) => planes.push(buffer),
                Err(err) => {
                    tracing::error!("{err}; releasing {} allocated plane(s)", planes.len());
                    self.release(planes);
                    return Err(err);
                }
            }
        }

        self.planes = planes;
        Ok(self.planes.len())
    }

    fn allocate_plane(&mut self, layout: &FrameLayout, plane: usize) -> Result<PlaneBuffer, SurfaceError> {
        let pitch = layout.pitches()[plane];
        let lines = layout.lines()[plane];
        let size = layout
            .plane_size(plane)
            .ok_or(SurfaceError::AllocationFailed { plane, size: usize::MAX })?;

        let ptr = self
            .allocator
            .allocate(size, PLANE_ALIGNMENT)
            .ok_or(SurfaceError::AllocationFailed { plane, size })?;

        if (ptr.as_ptr() as usize) % PLANE_ALIGNMENT != 0 {
            tracing::warn!(
                "Detected an unaligned plane buffer (plane {plane} at {:p}); this might lead to I/O issues",
                ptr.as_ptr()
            );
        }

        let mut pinned = false;
        if let Some(pinner) = self.pinner {
            // SAFETY: ptr..ptr+size was just allocated and is owned by us.
            match unsafe { pinner.pin(ptr.as_ptr(), size) } {
                Ok(()) => pinned = true,
                Err(e) => {
                    self.pin_failures += 1;
                    tracing::warn!("Failed to pin plane {plane} ({size} bytes): {e}; continuing unpinned");
                }
            }
        }

        Ok(PlaneBuffer {
            ptr,
            len: size,
            pitch,
            lines,
            pinned,
        })
    }

    /// Releases the live buffer set. Does nothing if none is live.
    pub fn free(&mut self) {
        if self.planes.is_empty() {
            return;
        }
        let planes = std::mem::take(&mut self.planes);
        self.release(planes);
    }

    fn release(&mut self, planes: Vec<PlaneBuffer>) {
        for plane in planes {
            if plane.pinned {
                if let Some(pinner) = self.pinner {
                    // SAFETY: matches the pin taken in allocate_plane.
                    if let Err(e) = unsafe { pinner.unpin(plane.as_ptr(), plane.len) } {
                        self.pin_failures += 1;
                        tracing::warn!("Failed to unpin plane buffer at {:p}: {e}", plane.as_ptr());
                    }
                }
            }
            // SAFETY: allocated by this allocator with these parameters, and
            // removed from the pool so no further views are handed out.
            unsafe {
                self.allocator
                    .deallocate(plane.ptr, plane.len, PLANE_ALIGNMENT);
            }
        }
    }

    /// Returns true while a buffer set is live.
    pub fn is_allocated(&self) -> bool {
        !self.planes.is_empty()
    }

    pub fn planes(&self) -> &[PlaneBuffer] {
        &self.planes
    }

    pub fn views(&self) -> Vec<PlaneView> {
        self.planes.iter().map(PlaneBuffer::view).collect()
    }

    /// Base addresses of the live planes, in plane order.
    pub fn pointers(&self) -> PlanePointers {
        let mut ptrs = [std::ptr::null_mut(); MAX_PLANES];
        for (slot, plane) in ptrs.iter_mut().zip(&self.planes) {
            *slot = plane.as_ptr();
        }
        PlanePointers {
            ptrs,
            len: self.planes.len().min(MAX_PLANES),
        }
    }

    pub fn pin_state(&self) -> PinState {
        if self.pinner.is_none() || self.planes.is_empty() {
            PinState::Unpinned
        } else if self.planes.iter().all(PlaneBuffer::is_pinned) {
            PinState::Pinned
        } else {
            PinState::Degraded
        }
    }

    /// Number of pin or unpin calls that failed over the pool's lifetime.
    pub fn pin_failures(&self) -> u64 {
        self.pin_failures
    }
}

impl<A: PlaneAllocator> Drop for AlignedBufferPool<A> {
    fn drop(&mut self) {
        self.free();
    }
}
