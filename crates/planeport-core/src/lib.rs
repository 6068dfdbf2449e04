//! planeport-core: zero-copy frame buffer pipeline for native video engines.
//!
//! A native decoding engine writes pixel planes straight into buffers owned
//! by the host application, and the host's render thread reads the latest
//! frame without tearing or use-after-free. This crate contains:
//!
//! - Format negotiation: [`format`] (chroma codes, per-plane pitch/lines)
//! - Plane memory: [`buffer_pool`] (aligned allocation), [`pin`] (page locking)
//! - Synchronization: [`gate`] (producer/consumer handoff)
//! - The callback protocol: [`surface`] (state machine), [`engine`] (C ABI
//!   trampolines and attach/detach)
//! - Window binding for the engine's own display path: [`adapter`]
//!
//! Data flow:
//!
//! ```text
//! engine ─format─▶ AlignedBufferPool::allocate ─▶ FrameConsumer::allocated_buffers
//!        ─lock──▶ HandoffGate ─▶ plane pointers ─▶ engine writes pixels
//!        ─unlock─▶ ─display─▶ FrameConsumer::display ─▶ FrameSurface::read (gate held)
//!        ─cleanup─▶ FrameConsumer::cleanup_buffers ─▶ AlignedBufferPool::free
//! ```
//!
//! It is consumed by `planeport-ffi` (C ABI for non-Rust hosts).

pub mod adapter;
pub mod buffer_pool;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod gate;
pub mod pin;
mod safety;
mod stats;
pub mod surface;

pub use adapter::{SurfaceAdapter, WindowBinding};
pub use buffer_pool::{AlignedBufferPool, PinState, PlaneAllocator, PlaneView, SystemAllocator, PLANE_ALIGNMENT};
pub use config::{GateMode, SurfaceConfig};
pub use engine::{AttachedSurface, CallbackContext, VideoCallbacks, VideoOutputTarget};
pub use error::SurfaceError;
pub use format::{BufferFormat, Chroma, FrameLayout, NegotiatedFormat, PlaneLayout};
pub use gate::{GatePermit, HandoffGate};
pub use pin::MemoryPinner;
pub use stats::SurfaceStatsSnapshot;
pub use surface::{FrameConsumer, FrameSurface, SurfaceState};
