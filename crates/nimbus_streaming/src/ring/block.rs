//! # Ring Block Writer
//!
//! A cursor over one ring block's mapped bytes. Every write is bounds
//! checked against the block, values land in native little-endian order,
//! and nothing is padded - callers computing strides account for any
//! interface-mandated alignment themselves.
//!
//! ## Safety Note
//!
//! This module requires unsafe code to write through the mapped base
//! pointer. All unsafe blocks are reviewed and documented.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::RingBuffer;
use crate::device::BufferId;
use crate::error::{StreamError, StreamResult};

/// Exclusive write window over one ring block.
///
/// Exists only between the `next` call that produced it and the matching
/// [`RingBlock::finish`] - the mutable borrow of the ring makes a second
/// concurrent owner impossible, and the `valid` flag rejects writes after
/// `finish`.
///
/// Write calls chain fluently:
///
/// ```rust,ignore
/// block.put_u32(vertex_count)?
///     .put_u32(1)?
///     .put_u32(first_vertex)?
///     .put_u32(instance_id)?;
/// ```
pub struct RingBlock<'a> {
    ring: &'a mut RingBuffer,
    index: usize,
    buffer: BufferId,
    base: NonNull<u8>,
    offset: u64,
    cursor: usize,
    /// Highest byte ever written this acquisition; the flush extent.
    watermark: usize,
    valid: bool,
}

impl<'a> RingBlock<'a> {
    /// Fresh write window over slot `index`. Cursor at zero, valid.
    pub(crate) fn new(
        ring: &'a mut RingBuffer,
        index: usize,
        buffer: BufferId,
        base: NonNull<u8>,
        offset: u64,
    ) -> Self {
        Self {
            ring,
            index,
            buffer,
            base,
            offset,
            cursor: 0,
            watermark: 0,
            valid: true,
        }
    }

    /// Moves the cursor to a block-relative byte position.
    ///
    /// # Errors
    ///
    /// [`StreamError::PositionOutOfRange`] outside `[0, block_size)`,
    /// [`StreamError::BlockInvalid`] after `finish`.
    pub fn set_position(&mut self, position: usize) -> StreamResult<&mut Self> {
        if !self.valid {
            return Err(StreamError::BlockInvalid);
        }
        let limit = self.ring.block_size();
        if position >= limit {
            return Err(StreamError::PositionOutOfRange { position, limit });
        }
        self.cursor = position;
        Ok(self)
    }

    /// Writes raw bytes at the cursor and advances it.
    ///
    /// # Errors
    ///
    /// [`StreamError::BlockInvalid`] after `finish`;
    /// [`StreamError::WriteOutOfBounds`] if the write would run past the
    /// block (an exact fit to the end succeeds).
    pub fn put_bytes(&mut self, bytes: &[u8]) -> StreamResult<&mut Self> {
        if !self.valid {
            return Err(StreamError::BlockInvalid);
        }
        let end = self.cursor + bytes.len();
        if end > self.ring.block_size() {
            return Err(StreamError::WriteOutOfBounds {
                position: self.cursor,
                size: bytes.len(),
                limit: self.ring.block_size(),
            });
        }
        // SAFETY: `base` points at `block_size` mapped bytes owned
        // exclusively by this window (the &mut ring borrow), and
        // `end <= block_size` was just checked.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.base.as_ptr().add(self.cursor),
                bytes.len(),
            );
        }
        self.cursor = end;
        self.watermark = self.watermark.max(end);
        Ok(self)
    }

    /// Writes one unsigned byte.
    pub fn put_u8(&mut self, value: u8) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes one signed byte.
    pub fn put_i8(&mut self, value: i8) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian u16.
    pub fn put_u16(&mut self, value: u16) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian i16.
    pub fn put_i16(&mut self, value: i16) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian u32.
    pub fn put_u32(&mut self, value: u32) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian i32.
    pub fn put_i32(&mut self, value: i32) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian u64.
    pub fn put_u64(&mut self, value: u64) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian i64.
    pub fn put_i64(&mut self, value: i64) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian f32.
    pub fn put_f32(&mut self, value: f32) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian f64.
    pub fn put_f64(&mut self, value: f64) -> StreamResult<&mut Self> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Block size in bytes.
    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.ring.block_size()
    }

    /// Byte offset of this block inside its backing buffer.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Current cursor position, block-relative.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor
    }

    /// Slot index of this block within the ring.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The buffer backing this block.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// True until `finish` is called.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Ends the write window: flushes the written range when the mapping
    /// is not coherent, then places this slot's completion fence.
    ///
    /// Call exactly once per acquisition, after submitting the commands
    /// that read the block, so the fence covers them. The placed fence is
    /// what lets the ring reuse this slot safely on a later cycle.
    ///
    /// # Errors
    ///
    /// [`StreamError::BlockInvalid`] on a second call.
    pub fn finish(&mut self) -> StreamResult<()> {
        if !self.valid {
            return Err(StreamError::BlockInvalid);
        }
        self.valid = false;
        self.ring.finish_slot(self.index, self.watermark as u64);
        Ok(())
    }
}

// Test-only trait impls so `assert_eq!` can compare a `StreamResult<&mut
// RingBlock>` against an `Err`. The block borrows `&mut RingBuffer`, whose
// device handle is not `Debug`/`PartialEq`, so these are derived by hand
// over the block's own scalar fields and never touch the borrowed ring.
#[cfg(test)]
impl std::fmt::Debug for RingBlock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBlock")
            .field("index", &self.index)
            .field("buffer", &self.buffer)
            .field("offset", &self.offset)
            .field("cursor", &self.cursor)
            .field("watermark", &self.watermark)
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
impl PartialEq for RingBlock<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.buffer == other.buffer
            && self.base == other.base
            && self.offset == other.offset
            && self.cursor == other.cursor
            && self.watermark == other.watermark
            && self.valid == other.valid
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::{BufferKind, NullDevice, RenderDevice};
    use crate::ring::RingStrategy;

    fn small_ring(device: &Arc<NullDevice>) -> RingBuffer {
        let dyn_device: Arc<dyn RenderDevice> = Arc::clone(device) as Arc<dyn RenderDevice>;
        RingBuffer::new(dyn_device, BufferKind::Vertex, 2, 16, RingStrategy::Single).unwrap()
    }

    #[test]
    fn test_writes_land_little_endian() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);
        let buffer = {
            let mut block = ring.next().unwrap();
            block
                .put_u32(0xAABB_CCDD)
                .unwrap()
                .put_u16(0x1122)
                .unwrap()
                .put_u8(0x33)
                .unwrap();
            assert_eq!(block.position(), 7);
            block.buffer()
        };
        assert_eq!(
            device.read_back(buffer, 0, 7),
            vec![0xDD, 0xCC, 0xBB, 0xAA, 0x22, 0x11, 0x33]
        );
    }

    #[test]
    fn test_exact_fit_succeeds_overflow_fails() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);
        let mut block = ring.next().unwrap();

        // 16-byte block: two u64 writes land exactly on the limit.
        block.put_u64(1).unwrap().put_u64(2).unwrap();
        assert_eq!(block.position(), 16);

        // One more byte is out of bounds.
        assert_eq!(
            block.put_u8(0),
            Err(StreamError::WriteOutOfBounds {
                position: 16,
                size: 1,
                limit: 16,
            })
        );
    }

    #[test]
    fn test_set_position_bounds() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);
        let mut block = ring.next().unwrap();

        block.set_position(15).unwrap();
        assert_eq!(block.position(), 15);
        assert_eq!(
            block.set_position(16).err(),
            Some(StreamError::PositionOutOfRange {
                position: 16,
                limit: 16,
            })
        );
    }

    #[test]
    fn test_straddling_write_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);
        let mut block = ring.next().unwrap();

        block.set_position(12).unwrap();
        assert!(block.put_u64(0).is_err());
        // The failed write moved nothing.
        assert_eq!(block.position(), 12);
        block.put_u32(0).unwrap();
    }

    #[test]
    fn test_writes_after_finish_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);
        let mut block = ring.next().unwrap();

        block.put_f32(1.0).unwrap();
        block.finish().unwrap();
        assert!(!block.is_valid());
        assert_eq!(block.put_f32(2.0), Err(StreamError::BlockInvalid));
        assert_eq!(block.set_position(0).err(), Some(StreamError::BlockInvalid));
        // finish is exactly-once.
        assert_eq!(block.finish(), Err(StreamError::BlockInvalid));
    }

    #[test]
    fn test_finish_places_exactly_one_fence() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);
        let mut block = ring.next().unwrap();
        block.put_i32(-7).unwrap();
        block.finish().unwrap();
        assert_eq!(device.fences_placed(), 1);
    }

    #[test]
    fn test_reacquired_slot_starts_reset() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);

        ring.next().unwrap().finish().unwrap();
        ring.next().unwrap().finish().unwrap();

        let block = ring.next().unwrap();
        assert_eq!(block.index(), 0);
        assert_eq!(block.position(), 0);
        assert!(block.is_valid());
    }

    #[test]
    fn test_scalar_round_trip_through_device_memory() {
        let device = Arc::new(NullDevice::new());
        let mut ring = small_ring(&device);
        let buffer = {
            let mut block = ring.next().unwrap();
            block
                .put_i16(-2)
                .unwrap()
                .put_i8(-1)
                .unwrap()
                .put_f64(2.5)
                .unwrap();
            block.buffer()
        };
        let bytes = device.read_back(buffer, 0, 11);
        assert_eq!(&bytes[0..2], &(-2i16).to_le_bytes());
        assert_eq!(bytes[2], (-1i8).to_le_bytes()[0]);
        assert_eq!(&bytes[3..11], &2.5f64.to_le_bytes());
    }
}
