//! # GPU Synchronization
//!
//! Completion tracking for asynchronously executing GPU work.

mod fence;

pub use fence::GpuFence;
