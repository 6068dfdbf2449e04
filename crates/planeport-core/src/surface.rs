//! Frame surface state machine.
//!
//! The native engine drives a [`FrameSurface`] through its video output
//! callbacks; the surface only reacts:
//!
//! ```text
//! Detached ─format─▶ FormatNegotiated ─lock─▶ Locked ─unlock─▶ Unlocked ─display─▶ Displayed
//!                                               ▲                                     │
//!                                               └──────────────── lock ───────────────┘
//! (any) ─cleanup─▶ CleanedUp ─detach─▶ Detached        (any) ─interrupt─▶ Failed
//! ```
//!
//! The host application is notified through a [`FrameConsumer`] and reads the
//! current frame with [`FrameSurface::read`], which holds the handoff gate for
//! the duration of the read.
//!
//! No internal lock is held while a consumer callback runs, so callbacks may
//! call back into the surface (`read`, `state`, `stats`).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer_pool::{AlignedBufferPool, PinState, PlaneAllocator, PlanePointers, PlaneView, SystemAllocator};
use crate::config::{GateMode, SurfaceConfig};
use crate::error::SurfaceError;
use crate::format::{FrameLayout, NegotiatedFormat};
use crate::gate::HandoffGate;
use crate::pin::MemoryPinner;
use crate::safety::panic_message;
use crate::stats::{SurfaceStats, SurfaceStatsSnapshot};

/// Lifecycle state of a surface, as driven by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// No buffers; either never negotiated or detached from the engine
    Detached,
    /// Buffers allocated, no frame written yet
    FormatNegotiated,
    /// The engine is writing a frame
    Locked,
    /// The engine finished writing a frame
    Unlocked,
    /// A frame was handed to the consumer
    Displayed,
    /// The engine tore the output down and the buffers are gone
    CleanedUp,
    /// The handoff gate was interrupted; no further frames are accepted
    Failed,
}

impl SurfaceState {
    /// Returns true if a buffer set is live in this state.
    pub fn has_buffers(&self) -> bool {
        matches!(
            self,
            SurfaceState::FormatNegotiated
                | SurfaceState::Locked
                | SurfaceState::Unlocked
                | SurfaceState::Displayed
        )
    }
}

/// Host-side receiver of buffer lifecycle and frame-ready notifications.
///
/// All methods are invoked on the engine's decode thread.
pub trait FrameConsumer: Send + Sync {
    /// A new buffer set exists; prepare dependent resources (GPU textures).
    fn allocated_buffers(&self, buffers: &[PlaneView]) {
        let _ = buffers;
    }

    /// A complete frame is in `buffers`.
    fn display(&self, buffers: &[PlaneView], format: &NegotiatedFormat);

    /// `buffers` are about to be freed; drop everything that refers to them.
    fn cleanup_buffers(&self, buffers: &[PlaneView]) {
        let _ = buffers;
    }
}

struct SurfaceInner {
    state: SurfaceState,
    pool: AlignedBufferPool<Box<dyn PlaneAllocator>>,
    negotiated: Option<Arc<NegotiatedFormat>>,
    views: Arc<[PlaneView]>,
    /// Bracket mode: the engine holds the gate between lock and unlock
    write_permit: bool,
}

/// The callback protocol object the native engine drives.
pub struct FrameSurface {
    config: SurfaceConfig,
    consumer: Arc<dyn FrameConsumer>,
    gate: Arc<HandoffGate>,
    inner: Mutex<SurfaceInner>,
    stats: SurfaceStats,
}

impl FrameSurface {
    /// Creates a detached surface.
    ///
    /// Fails with [`SurfaceError::UnsupportedPlatform`] if pinning is
    /// requested on an OS without a page-lock primitive.
    pub fn new(config: SurfaceConfig, consumer: Arc<dyn FrameConsumer>) -> Result<Self, SurfaceError> {
        let pinner = if config.pin_buffers {
            Some(MemoryPinner::detect()?)
        } else {
            None
        };
        let allocator: Box<dyn PlaneAllocator> = Box::new(SystemAllocator);

        Ok(Self {
            config,
            consumer,
            gate: Arc::new(HandoffGate::new()),
            inner: Mutex::new(SurfaceInner {
                state: SurfaceState::Detached,
                pool: AlignedBufferPool::with_allocator(allocator, pinner),
                negotiated: None,
                views: Arc::from(Vec::new()),
                write_permit: false,
            }),
            stats: SurfaceStats::default(),
        })
    }

    /// Shares an externally owned gate instead of the surface's own.
    pub fn with_gate(mut self, gate: Arc<HandoffGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Replaces the plane allocator. Only valid before the first negotiation.
    pub fn with_allocator(self, allocator: impl PlaneAllocator + 'static) -> Self {
        {
            let mut inner = self.inner.lock();
            debug_assert!(!inner.pool.is_allocated());
            let pinner = if self.config.pin_buffers {
                MemoryPinner::detect().ok()
            } else {
                None
            };
            inner.pool = AlignedBufferPool::with_allocator(Box::new(allocator), pinner);
        }
        self
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// The gate consumers must hold while reading plane memory.
    pub fn gate(&self) -> &Arc<HandoffGate> {
        &self.gate
    }

    pub fn state(&self) -> SurfaceState {
        self.inner.lock().state
    }

    pub fn negotiated_format(&self) -> Option<NegotiatedFormat> {
        self.inner.lock().negotiated.as_deref().cloned()
    }

    /// The live buffers and their format, without taking the gate.
    ///
    /// For callers that hold [`FrameSurface::gate`] themselves across several
    /// calls. Plane memory must not be touched without it.
    pub fn current_buffers(&self) -> Option<(Vec<PlaneView>, NegotiatedFormat)> {
        let inner = self.inner.lock();
        let negotiated = inner.negotiated.as_deref()?.clone();
        Some((inner.views.to_vec(), negotiated))
    }

    pub fn pin_state(&self) -> PinState {
        self.inner.lock().pool.pin_state()
    }

    pub fn stats(&self) -> SurfaceStatsSnapshot {
        let pin_failures = self.inner.lock().pool.pin_failures();
        self.stats.snapshot(pin_failures)
    }

    /// The plane geometry the engine should be told for `width` x `height`.
    pub fn layout_for(&self, width: u32, height: u32) -> Result<FrameLayout, SurfaceError> {
        self.config.format.layout(width, height)
    }

    /// Format negotiation: allocates one buffer per plane and returns the
    /// layout the buffers were sized from.
    ///
    /// On error no buffer set is left behind; the engine should be told
    /// zero planes. That includes a consumer panicking in
    /// [`FrameConsumer::allocated_buffers`], which rolls the allocation back.
    pub fn format(&self, width: u32, height: u32) -> Result<FrameLayout, SurfaceError> {
        if self.gate.is_interrupted() {
            return Err(SurfaceError::GateInterrupted);
        }

        let layout = self.layout_for(width, height).inspect_err(|e| {
            tracing::error!("Format negotiation rejected: {e}");
        })?;
        tracing::info!(
            "Width: {} - Height: {} - Chroma: {} - Pitches: {:?} - Lines: {:?}",
            width,
            height,
            self.config.format.chroma(),
            layout.pitches(),
            layout.lines()
        );

        // Re-negotiation without an intervening cleanup.
        self.release_buffers();

        let views = {
            let mut inner = self.inner.lock();
            match inner.pool.allocate(&layout) {
                Ok(_) => {
                    let views: Arc<[PlaneView]> = Arc::from(inner.pool.views());
                    inner.views = Arc::clone(&views);
                    inner.negotiated = Some(Arc::new(NegotiatedFormat {
                        format: self.config.format,
                        width,
                        height,
                        layout: layout.clone(),
                    }));
                    inner.state = SurfaceState::FormatNegotiated;
                    views
                }
                Err(e) => {
                    inner.negotiated = None;
                    inner.views = Arc::from(Vec::new());
                    inner.state = SurfaceState::Detached;
                    self.stats.record_allocation_failure();
                    return Err(e);
                }
            }
        };

        let notified = catch_unwind(AssertUnwindSafe(|| self.consumer.allocated_buffers(&views)));
        if let Err(panic) = notified {
            tracing::error!(
                "Frame consumer panicked in allocated_buffers: {}; releasing the buffer set",
                panic_message(&*panic)
            );
            self.free_buffers();
            self.inner.lock().state = SurfaceState::Detached;
            return Err(SurfaceError::ConsumerPanicked("allocated_buffers"));
        }

        self.stats.record_negotiation();
        Ok(layout)
    }

    /// Engine is about to write a frame: waits for the gate and returns the
    /// plane addresses to write into.
    ///
    /// An interrupted wait moves the surface to [`SurfaceState::Failed`].
    pub fn lock(&self) -> Result<PlanePointers, SurfaceError> {
        if !self.inner.lock().pool.is_allocated() {
            tracing::warn!("Engine locked a frame before format negotiation");
            return Err(SurfaceError::NotNegotiated);
        }

        if let Err(e) = self.gate.acquire() {
            self.inner.lock().state = SurfaceState::Failed;
            return Err(e);
        }

        let mut inner = self.inner.lock();
        if !inner.pool.is_allocated() {
            drop(inner);
            self.gate.release();
            return Err(SurfaceError::NotNegotiated);
        }
        let pointers = inner.pool.pointers();
        inner.state = SurfaceState::Locked;
        match self.config.gate_mode {
            GateMode::Barrier => {
                drop(inner);
                self.gate.release();
            }
            GateMode::Bracket => inner.write_permit = true,
        }

        self.stats.record_lock();
        Ok(pointers)
    }

    /// Engine finished writing the frame.
    ///
    /// In [`GateMode::Barrier`] this only records the transition; in
    /// [`GateMode::Bracket`] it releases the gate taken by [`lock`].
    ///
    /// [`lock`]: FrameSurface::lock
    pub fn unlock(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SurfaceState::Locked {
            inner.state = SurfaceState::Unlocked;
        }
        if std::mem::take(&mut inner.write_permit) {
            drop(inner);
            self.gate.release();
        }
    }

    /// Frame ready: forwards the current buffers to the consumer.
    pub fn display(&self) {
        let (views, negotiated) = {
            let mut inner = self.inner.lock();
            let Some(negotiated) = inner.negotiated.clone() else {
                tracing::debug!("Display without a negotiated format; dropping frame");
                return;
            };
            if inner.state == SurfaceState::Failed {
                return;
            }
            inner.state = SurfaceState::Displayed;
            (Arc::clone(&inner.views), negotiated)
        };

        self.stats.record_display();
        self.consumer.display(&views, &negotiated);
    }

    /// Output teardown: notifies the consumer, then frees the buffers.
    ///
    /// Does nothing (and fires no callback) when no buffer set is live.
    pub fn cleanup(&self) {
        if self.release_buffers() {
            let mut inner = self.inner.lock();
            if inner.state != SurfaceState::Failed {
                inner.state = SurfaceState::CleanedUp;
            }
        }
    }

    /// Notifies the consumer and frees the live buffer set, if any.
    fn release_buffers(&self) -> bool {
        let views = {
            let inner = self.inner.lock();
            if !inner.pool.is_allocated() {
                return false;
            }
            Arc::clone(&inner.views)
        };

        // A bracketed write that never saw unlock still owns the gate, and
        // the consumer may read from inside cleanup_buffers.
        let write_permit = std::mem::take(&mut self.inner.lock().write_permit);
        if write_permit {
            self.gate.release();
        }

        self.consumer.cleanup_buffers(&views);
        self.free_buffers();
        true
    }

    /// Frees the buffer set once no reader is inside plane memory.
    fn free_buffers(&self) {
        self.gate.acquire_for_teardown();
        {
            let mut inner = self.inner.lock();
            inner.pool.free();
            inner.negotiated = None;
            inner.views = Arc::from(Vec::new());
        }
        self.gate.release();
    }

    /// Consumer read path: runs `f` over the current buffers with the gate
    /// held.
    ///
    /// Returns `Ok(None)` if no buffer set is live. The plane views must not
    /// escape `f`.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&[PlaneView], &NegotiatedFormat) -> R,
    ) -> Result<Option<R>, SurfaceError> {
        let _permit = self.gate.enter()?;
        let (views, negotiated) = {
            let inner = self.inner.lock();
            match inner.negotiated.clone() {
                Some(negotiated) => (Arc::clone(&inner.views), negotiated),
                None => return Ok(None),
            }
        };
        self.stats.record_read();
        Ok(Some(f(&views, &negotiated)))
    }

    /// Opens a read that spans several calls, such as a host reading planes
    /// one at a time through [`FrameSurface::current_buffers`].
    ///
    /// Holds the gate until [`FrameSurface::end_read`]; counts as one read.
    pub fn begin_read(&self) -> Result<(), SurfaceError> {
        self.gate.acquire()?;
        self.stats.record_read();
        Ok(())
    }

    /// Closes a read opened by [`FrameSurface::begin_read`].
    pub fn end_read(&self) {
        self.gate.release();
    }

    /// Interrupts the handoff gate and fails the surface.
    ///
    /// Blocked `lock` and `read` callers wake with
    /// [`SurfaceError::GateInterrupted`]. Buffers stay allocated until the
    /// engine's cleanup.
    pub fn interrupt(&self) {
        self.gate.interrupt();
        self.inner.lock().state = SurfaceState::Failed;
    }

    pub(crate) fn mark_detached(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SurfaceState::Failed {
            inner.state = SurfaceState::Detached;
        }
    }
}

impl std::fmt::Debug for FrameSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FrameSurface")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("planes", &inner.views.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use super::*;
    use crate::format::BufferFormat;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Allocated(Vec<usize>),
        Display(usize, u32, u32),
        Cleanup(usize),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl FrameConsumer for Recorder {
        fn allocated_buffers(&self, buffers: &[PlaneView]) {
            let sizes = buffers.iter().map(PlaneView::len).collect();
            self.events.lock().push(Event::Allocated(sizes));
        }

        fn display(&self, buffers: &[PlaneView], format: &NegotiatedFormat) {
            self.events
                .lock()
                .push(Event::Display(buffers.len(), format.width, format.height));
        }

        fn cleanup_buffers(&self, buffers: &[PlaneView]) {
            self.events.lock().push(Event::Cleanup(buffers.len()));
        }
    }

    struct FailingAllocator {
        fail_on: usize,
        requests: std::sync::atomic::AtomicUsize,
    }

    impl PlaneAllocator for FailingAllocator {
        fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
            let n = self
                .requests
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == self.fail_on {
                None
            } else {
                SystemAllocator.allocate(size, align)
            }
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
            SystemAllocator.deallocate(ptr, size, align)
        }
    }

    fn surface(format: BufferFormat) -> (FrameSurface, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let surface = FrameSurface::new(SurfaceConfig::new(format), recorder.clone()).unwrap();
        (surface, recorder)
    }

    #[test]
    #[traced_test]
    fn nv12_negotiation_allocates_exact_plane_sizes() {
        let (surface, recorder) = surface(BufferFormat::nv12());

        let layout = surface.format(64, 48).unwrap();
        assert_eq!(layout.plane_count(), 2);
        assert_eq!(surface.state(), SurfaceState::FormatNegotiated);
        assert_eq!(
            recorder.events(),
            vec![Event::Allocated(vec![64 * 48, 64 * 24])]
        );
        assert!(logs_contain("Width: 64 - Height: 48 - Chroma: NV12"));
    }

    #[test]
    fn frame_cycle_walks_the_states() {
        let (surface, recorder) = surface(BufferFormat::rv32());
        surface.format(16, 16).unwrap();

        for _ in 0..3 {
            let planes = surface.lock().unwrap();
            assert_eq!(planes.len(), 1);
            assert_eq!(surface.state(), SurfaceState::Locked);
            surface.unlock();
            assert_eq!(surface.state(), SurfaceState::Unlocked);
            surface.display();
            assert_eq!(surface.state(), SurfaceState::Displayed);
        }

        let stats = surface.stats();
        assert_eq!(stats.frames_locked, 3);
        assert_eq!(stats.frames_displayed, 3);
        assert_eq!(recorder.events().len(), 4);
    }

    #[test]
    fn lock_returns_the_pool_addresses() {
        let (surface, _) = surface(BufferFormat::i420());
        surface.format(32, 32).unwrap();

        let planes = surface.lock().unwrap();
        surface.unlock();
        let read = surface
            .read(|views, _| views.iter().map(PlaneView::as_ptr).collect::<Vec<_>>())
            .unwrap()
            .unwrap();
        assert_eq!(planes.as_slice(), read.as_slice());
    }

    #[test]
    fn cleanup_without_format_is_silent() {
        let (surface, recorder) = surface(BufferFormat::rv32());
        surface.cleanup();
        assert!(recorder.events().is_empty());
        assert_eq!(surface.state(), SurfaceState::Detached);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let (surface, recorder) = surface(BufferFormat::i420());
        surface.format(64, 48).unwrap();

        surface.cleanup();
        surface.cleanup();

        assert_eq!(surface.state(), SurfaceState::CleanedUp);
        let cleanups = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Cleanup(_)))
            .count();
        assert_eq!(cleanups, 1);
        assert_eq!(surface.read(|_, _| ()), Ok(None));
    }

    #[test]
    fn allocation_failure_reports_zero_planes_and_no_buffers() {
        let recorder = Arc::new(Recorder::default());
        let surface = FrameSurface::new(SurfaceConfig::new(BufferFormat::i420()), recorder.clone())
            .unwrap()
            .with_allocator(FailingAllocator {
                fail_on: 1,
                requests: Default::default(),
            });

        let err = surface.format(64, 48).unwrap_err();
        assert!(matches!(err, SurfaceError::AllocationFailed { plane: 1, .. }));
        assert_eq!(surface.state(), SurfaceState::Detached);
        assert!(surface.negotiated_format().is_none());
        assert!(recorder.events().is_empty());
        assert_eq!(surface.lock().unwrap_err(), SurfaceError::NotNegotiated);
        assert_eq!(surface.stats().allocation_failures, 1);
    }

    #[test]
    fn renegotiation_cleans_up_the_previous_set() {
        let (surface, recorder) = surface(BufferFormat::rv32());
        surface.format(16, 16).unwrap();
        surface.format(32, 16).unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                Event::Allocated(vec![64 * 16]),
                Event::Cleanup(1),
                Event::Allocated(vec![128 * 16]),
            ]
        );
        assert_eq!(surface.negotiated_format().unwrap().width, 32);
    }

    #[test]
    fn display_before_format_is_dropped() {
        let (surface, recorder) = surface(BufferFormat::rv32());
        surface.display();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn bracket_mode_holds_the_gate_until_unlock() {
        let recorder = Arc::new(Recorder::default());
        let config = SurfaceConfig::new(BufferFormat::rv32()).gate_mode(GateMode::Bracket);
        let surface = FrameSurface::new(config, recorder).unwrap();
        surface.format(16, 16).unwrap();

        surface.lock().unwrap();
        assert!(!surface.gate().is_available());
        surface.unlock();
        assert!(surface.gate().is_available());
    }

    #[test]
    fn barrier_mode_releases_the_gate_in_lock() {
        let (surface, _) = surface(BufferFormat::rv32());
        surface.format(16, 16).unwrap();
        surface.lock().unwrap();
        assert!(surface.gate().is_available());
    }

    #[test]
    fn cleanup_releases_a_bracketed_write() {
        let recorder = Arc::new(Recorder::default());
        let config = SurfaceConfig::new(BufferFormat::rv32()).gate_mode(GateMode::Bracket);
        let surface = FrameSurface::new(config, recorder).unwrap();
        surface.format(16, 16).unwrap();
        surface.lock().unwrap();

        surface.cleanup();
        assert!(surface.gate().is_available());
        assert_eq!(surface.state(), SurfaceState::CleanedUp);
    }

    #[test]
    fn interrupted_surface_refuses_frames() {
        let (surface, _) = surface(BufferFormat::rv32());
        surface.format(16, 16).unwrap();
        surface.interrupt();

        assert_eq!(surface.lock().unwrap_err(), SurfaceError::GateInterrupted);
        assert_eq!(surface.state(), SurfaceState::Failed);
        assert_eq!(surface.read(|_, _| ()), Err(SurfaceError::GateInterrupted));
        assert_eq!(surface.format(16, 16), Err(SurfaceError::GateInterrupted));

        // Teardown still completes.
        surface.cleanup();
        assert_eq!(surface.state(), SurfaceState::Failed);
    }

    #[test]
    fn consumer_may_read_from_inside_display() {
        struct Uploader {
            surface: Mutex<Option<std::sync::Weak<FrameSurface>>>,
            uploaded: Mutex<usize>,
        }

        impl FrameConsumer for Uploader {
            fn display(&self, _: &[PlaneView], _: &NegotiatedFormat) {
                let surface = self.surface.lock().as_ref().and_then(std::sync::Weak::upgrade);
                if let Some(surface) = surface {
                    let bytes = surface
                        .read(|views, _| views.iter().map(PlaneView::len).sum::<usize>())
                        .unwrap()
                        .unwrap_or(0);
                    *self.uploaded.lock() += bytes;
                }
            }
        }

        let uploader = Arc::new(Uploader {
            surface: Mutex::new(None),
            uploaded: Mutex::new(0),
        });
        let surface = Arc::new(
            FrameSurface::new(SurfaceConfig::new(BufferFormat::rv32()), uploader.clone()).unwrap(),
        );
        *uploader.surface.lock() = Some(Arc::downgrade(&surface));

        surface.format(8, 8).unwrap();
        surface.lock().unwrap();
        surface.unlock();
        surface.display();

        assert_eq!(*uploader.uploaded.lock(), 32 * 8);
    }

    struct RejectingConsumer;

    impl FrameConsumer for RejectingConsumer {
        fn allocated_buffers(&self, _: &[PlaneView]) {
            panic!("no texture for this format");
        }

        fn display(&self, _: &[PlaneView], _: &NegotiatedFormat) {}
    }

    #[test]
    #[traced_test]
    fn consumer_panic_in_allocated_buffers_rolls_back() {
        let surface =
            FrameSurface::new(SurfaceConfig::new(BufferFormat::nv12()), Arc::new(RejectingConsumer)).unwrap();

        assert_eq!(
            surface.format(64, 48),
            Err(SurfaceError::ConsumerPanicked("allocated_buffers"))
        );
        assert_eq!(surface.state(), SurfaceState::Detached);
        assert!(surface.negotiated_format().is_none());
        assert!(surface.current_buffers().is_none());
        assert_eq!(surface.lock().unwrap_err(), SurfaceError::NotNegotiated);
        assert_eq!(surface.stats().negotiations, 0);
        assert!(surface.gate().is_available());
        assert!(logs_contain("no texture for this format"));
    }

    #[test]
    fn consumer_may_read_from_cleanup_during_a_bracketed_write() {
        struct Flusher {
            surface: Mutex<Option<std::sync::Weak<FrameSurface>>>,
            flushed: Mutex<Option<usize>>,
        }

        impl FrameConsumer for Flusher {
            fn display(&self, _: &[PlaneView], _: &NegotiatedFormat) {}

            fn cleanup_buffers(&self, _: &[PlaneView]) {
                let surface = self.surface.lock().as_ref().and_then(std::sync::Weak::upgrade);
                if let Some(surface) = surface {
                    let planes = surface.read(|views, _| views.len()).unwrap();
                    *self.flushed.lock() = planes;
                }
            }
        }

        let flusher = Arc::new(Flusher {
            surface: Mutex::new(None),
            flushed: Mutex::new(None),
        });
        let config = SurfaceConfig::new(BufferFormat::rv32()).gate_mode(GateMode::Bracket);
        let surface = Arc::new(FrameSurface::new(config, flusher.clone()).unwrap());
        *flusher.surface.lock() = Some(Arc::downgrade(&surface));

        surface.format(16, 16).unwrap();
        surface.lock().unwrap();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let teardown = {
            let surface = Arc::clone(&surface);
            std::thread::spawn(move || {
                surface.cleanup();
                let _ = done_tx.send(());
            })
        };

        done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("cleanup deadlocked");
        teardown.join().unwrap();
        assert_eq!(*flusher.flushed.lock(), Some(1));
        assert_eq!(surface.state(), SurfaceState::CleanedUp);
        assert!(surface.gate().is_available());
    }

    #[test]
    fn spanning_read_holds_the_gate_and_counts() {
        let (surface, _) = surface(BufferFormat::rv32());
        surface.format(16, 16).unwrap();

        surface.begin_read().unwrap();
        assert!(!surface.gate().is_available());
        assert!(surface.current_buffers().is_some());
        surface.end_read();

        assert!(surface.gate().is_available());
        assert_eq!(surface.stats().reads, 1);
    }
}
