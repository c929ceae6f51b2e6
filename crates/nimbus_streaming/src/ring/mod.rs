//! # Fence-Gated Ring Buffer
//!
//! A fixed set of N persistently mapped blocks cycled in order, so the CPU
//! can fill block i+1 while the GPU still reads block i. Each block carries
//! a fence from its previous cycle; reacquiring the block waits on that
//! fence first. That wait is the single intentional CPU stall in the whole
//! streaming core - it is what guarantees no block is overwritten while the
//! GPU might still be reading it.
//!
//! ## Safety Note
//!
//! This module requires unsafe code to slice a mapped base address into
//! per-block pointers. All unsafe blocks are reviewed and documented.

#![allow(unsafe_code)]

mod block;

pub use block::RingBlock;

use std::ptr::NonNull;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::{BufferDesc, BufferId, BufferKind, FenceWait, RenderDevice};
use crate::error::{StreamError, StreamResult};
use crate::sync::GpuFence;

/// Bounded wait per poll iteration while stalling on a block fence. The
/// overall stall is unbounded; only each individual wait is capped.
const STALL_POLL_TIMEOUT_NS: u64 = 1_000_000;

/// How the ring's blocks are backed by device memory.
///
/// Both strategies share one contract; only the storage layout differs.
/// Some drivers penalize one large persistently mapped allocation, others
/// penalize many small ones - this is the knob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingStrategy {
    /// One allocation, sliced into blocks at a fixed stride.
    #[default]
    Single,
    /// One independent allocation per block.
    PerBlock,
}

/// Backing storage for the two strategies.
enum RingStorage {
    Single {
        buffer: BufferId,
        base: NonNull<u8>,
    },
    PerBlock {
        blocks: Vec<(BufferId, NonNull<u8>)>,
    },
}

/// Counters for ring behavior, reset never.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingStats {
    /// Blocks handed out.
    pub cycles: u64,
    /// Non-ready fence polls spent stalling in `next`.
    pub stall_polls: u64,
    /// Driver-reported wait failures that were degraded to "ready".
    pub wait_failures: u64,
}

/// N-block fence-gated ring over persistently mapped device memory.
///
/// Block count and block size are fixed at creation. `next` hands out the
/// blocks in strict rotation; `unmap` is terminal - the GPU may keep
/// reading, but the ring can never be written again.
pub struct RingBuffer {
    device: Arc<dyn RenderDevice>,
    storage: RingStorage,
    block_count: usize,
    block_size: usize,
    fences: Vec<GpuFence>,
    current: usize,
    unmapped: bool,
    coherent: bool,
    stats: RingStats,
}

impl RingBuffer {
    /// Creates a ring of `block_count` blocks of `block_size` bytes each.
    ///
    /// Capability-checks persistent mapping before allocating anything, so
    /// a refusal leaves no partial state behind.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidBlockCount`] for a zero block count,
    /// [`StreamError::MissingCapability`] when the device cannot keep
    /// buffers mapped, or any buffer-creation error from the device.
    pub fn new(
        device: Arc<dyn RenderDevice>,
        kind: BufferKind,
        block_count: usize,
        block_size: usize,
        strategy: RingStrategy,
    ) -> StreamResult<Self> {
        if block_count == 0 {
            return Err(StreamError::InvalidBlockCount {
                requested: block_count,
            });
        }
        debug_assert!(block_size > 0, "zero-sized ring block");

        let caps = device.caps();
        if !caps.persistent_mapping {
            return Err(StreamError::MissingCapability("persistent buffer mapping"));
        }

        let storage = match strategy {
            RingStrategy::Single => {
                let buffer = device.create_buffer(&BufferDesc {
                    size: (block_count * block_size) as u64,
                    kind,
                    persistent: true,
                    label: "ring (single allocation)",
                })?;
                let base = device.map_persistent(buffer)?;
                RingStorage::Single { buffer, base }
            }
            RingStrategy::PerBlock => {
                let mut blocks = Vec::with_capacity(block_count);
                for _ in 0..block_count {
                    let buffer = device.create_buffer(&BufferDesc {
                        size: block_size as u64,
                        kind,
                        persistent: true,
                        label: "ring (per-block allocation)",
                    })?;
                    let base = device.map_persistent(buffer)?;
                    blocks.push((buffer, base));
                }
                RingStorage::PerBlock { blocks }
            }
        };

        tracing::debug!(
            blocks = block_count,
            block_size,
            ?strategy,
            "ring buffer created"
        );

        Ok(Self {
            device,
            storage,
            block_count,
            block_size,
            fences: (0..block_count).map(|_| GpuFence::new()).collect(),
            // The first `next` advances onto slot 0.
            current: block_count - 1,
            unmapped: false,
            coherent: caps.coherent_mapping,
            stats: RingStats::default(),
        })
    }

    /// Advances to the next block and returns it, ready for writing.
    ///
    /// If the block's fence from its previous cycle has not signaled yet,
    /// this spin-polls until it does. A driver wait failure is logged and
    /// degraded to "ready" so the frame loop cannot deadlock on a broken
    /// fence.
    ///
    /// # Errors
    ///
    /// [`StreamError::RingUnmapped`] after `unmap`.
    pub fn next(&mut self) -> StreamResult<RingBlock<'_>> {
        if self.unmapped {
            return Err(StreamError::RingUnmapped);
        }

        let index = (self.current + 1) % self.block_count;
        self.current = index;

        if self.fences[index].is_placed() {
            loop {
                match self.fences[index].poll(&*self.device, STALL_POLL_TIMEOUT_NS) {
                    FenceWait::AlreadySignaled | FenceWait::ConditionSatisfied => break,
                    FenceWait::TimeoutExpired => {
                        self.stats.stall_polls += 1;
                        std::hint::spin_loop();
                    }
                    FenceWait::WaitFailed => {
                        self.stats.wait_failures += 1;
                        tracing::warn!(
                            slot = index,
                            "fence wait failed; assuming the block is ready (best-effort recovery)"
                        );
                        break;
                    }
                }
            }
        }

        self.stats.cycles += 1;
        let (buffer, base, offset) = self.slot(index);
        Ok(RingBlock::new(self, index, buffer, base, offset))
    }

    /// Releases the write mapping of all backing storage.
    ///
    /// Terminal: the GPU may keep reading the buffers, but the ring can
    /// never hand out blocks again.
    ///
    /// # Errors
    ///
    /// [`StreamError::RingUnmapped`] on a second call - that is a caller
    /// bug, not a no-op.
    pub fn unmap(&mut self) -> StreamResult<()> {
        if self.unmapped {
            return Err(StreamError::RingUnmapped);
        }
        match &self.storage {
            RingStorage::Single { buffer, .. } => self.device.unmap(*buffer),
            RingStorage::PerBlock { blocks } => {
                for (buffer, _) in blocks {
                    self.device.unmap(*buffer);
                }
            }
        }
        self.unmapped = true;
        Ok(())
    }

    /// Number of blocks in the ring.
    #[inline]
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    /// Size of each block in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Index of the block most recently returned by `next`.
    #[inline]
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current
    }

    /// The buffer backing the current block. Under the per-block strategy
    /// this changes every cycle; consumers binding the ring as a vertex
    /// source must rebind after each `next`.
    #[must_use]
    pub fn backing(&self) -> BufferId {
        match &self.storage {
            RingStorage::Single { buffer, .. } => *buffer,
            RingStorage::PerBlock { blocks } => blocks[self.current].0,
        }
    }

    /// Ring behavior counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> RingStats {
        self.stats
    }

    /// Resolves a slot to its backing buffer, base pointer, and byte
    /// offset within that buffer.
    fn slot(&self, index: usize) -> (BufferId, NonNull<u8>, u64) {
        match &self.storage {
            RingStorage::Single { buffer, base } => {
                let byte_offset = index * self.block_size;
                // SAFETY: the mapping spans block_count * block_size bytes
                // and index < block_count, so the offset pointer stays
                // inside the same allocation.
                let block_base =
                    unsafe { NonNull::new_unchecked(base.as_ptr().add(byte_offset)) };
                (*buffer, block_base, byte_offset as u64)
            }
            RingStorage::PerBlock { blocks } => {
                let (buffer, base) = blocks[index];
                (buffer, base, 0)
            }
        }
    }

    /// Completes a block: flushes the written range when the mapping is
    /// not coherent, then places the slot's fence at the current point of
    /// the command stream.
    pub(crate) fn finish_slot(&mut self, index: usize, written: u64) {
        if !self.coherent && written > 0 {
            let (buffer, _, offset) = self.slot(index);
            self.device.flush_mapped_range(buffer, offset, written);
        }
        self.fences[index].place(&*self.device);
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        for fence in &mut self.fences {
            if fence.is_placed() {
                fence.recycle(&*self.device);
            }
        }
        if !self.unmapped {
            // Best-effort: ignore the double-unmap guard, we know the
            // mapping is still live here.
            let _ = self.unmap();
        }
        match &self.storage {
            RingStorage::Single { buffer, .. } => self.device.destroy_buffer(*buffer),
            RingStorage::PerBlock { blocks } => {
                for (buffer, _) in blocks {
                    self.device.destroy_buffer(*buffer);
                }
            }
        }
    }
}
