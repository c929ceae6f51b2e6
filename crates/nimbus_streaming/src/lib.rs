//! # NIMBUS Streaming
//!
//! Persistently-mapped buffer streaming for an asynchronous GPU:
//! - Fence-gated ring buffers so the CPU writes block i+1 while the GPU
//!   still reads block i
//! - A bounds-checked cursor writer over each block's mapped bytes
//! - Grow-on-write pools sub-allocated by a free-list allocator
//! - A multi-draw-indirect system submitting one draw per frame
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      MultiDrawSystem                         │
//! │                                                              │
//! │  vertex/index/instance pools     indirect ring   matrix ring │
//! │  (GrowBuffer + FreeList)         (RingBuffer)   (RingBuffer) │
//! │            │                          │              │       │
//! │            └───────── RenderDevice trait ───────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                    one multi-draw submission
//! ```
//!
//! ## The one stall
//!
//! `RingBuffer::next` is the single intentional blocking point: it
//! spin-polls the fence of the block about to be reused. Everything else
//! only touches mapped memory or submits commands.

#![deny(missing_docs)]
// Unsafe code is denied crate-wide; the ring modules opt in locally for
// their mapped-memory writes.
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod device;
pub mod draw;
pub mod error;
pub mod ring;
pub mod stats;
pub mod sync;

pub use buffer::GrowBuffer;
pub use device::{
    BufferDesc, BufferId, BufferKind, DeviceCaps, FenceHandle, FenceWait, MultiDrawCall,
    NullDevice, RenderDevice,
};
pub use draw::commands::{DrawArraysIndirectArgs, DrawElementsIndirectArgs};
pub use draw::{
    BoundingSphere, IndexKind, MultiDrawConfig, MultiDrawSystem, SizingHint, WORLD_MATRIX_BINDING,
};
pub use error::{StreamError, StreamResult};
pub use ring::{RingBlock, RingBuffer, RingStats, RingStrategy};
pub use stats::StreamStats;
pub use sync::GpuFence;
