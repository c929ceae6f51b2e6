//! # NIMBUS Core
//!
//! GPU-agnostic building blocks for the streaming renderer:
//! - Free-list offset allocation for sub-allocating large GPU buffers
//! - Explicit attribute schemas for computing GPU record layouts
//!
//! ## Architecture Rules
//!
//! 1. **No global state** - every allocator owns its own bookkeeping
//! 2. **No per-frame allocations** - gap tables reuse their storage
//! 3. **Layouts are computed once** - at configuration time, never per draw

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod layout;
pub mod memory;

pub use layout::{AttributeDesc, BufferSchema, ScalarKind};
pub use memory::FreeListAllocator;
