//! # Grow-on-Write Device Buffer
//!
//! Device-resident storage that doubles when a write runs past its end.
//! Backs the index, vertex, and per-instance pools, whose initial sizes
//! are only hints.

use std::sync::Arc;

use crate::device::{BufferDesc, BufferId, BufferKind, RenderDevice};
use crate::error::StreamResult;

/// Device buffer that grows to fit writes.
///
/// Growth allocates a fresh buffer of `max(needed, 2 * capacity)` bytes,
/// copies the old contents, and destroys the old allocation. Consumers
/// holding the old [`BufferId`] must re-query it after any write.
pub struct GrowBuffer {
    device: Arc<dyn RenderDevice>,
    buffer: BufferId,
    capacity: u64,
    kind: BufferKind,
    label: &'static str,
}

impl GrowBuffer {
    /// Creates a buffer of `capacity` bytes (clamped to at least 1).
    ///
    /// # Errors
    ///
    /// Any buffer-creation error from the device.
    pub fn new(
        device: Arc<dyn RenderDevice>,
        kind: BufferKind,
        capacity: u64,
        label: &'static str,
    ) -> StreamResult<Self> {
        let capacity = capacity.max(1);
        let buffer = device.create_buffer(&BufferDesc {
            size: capacity,
            kind,
            persistent: false,
            label,
        })?;
        Ok(Self {
            device,
            buffer,
            capacity,
            kind,
            label,
        })
    }

    /// Uploads `data` at `offset`, growing first if the write would run
    /// past the current capacity. Returns whether a grow happened.
    ///
    /// # Errors
    ///
    /// Any buffer-creation error from the device while growing.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> StreamResult<bool> {
        let grew = self.ensure_capacity(offset + data.len() as u64)?;
        self.device.write_buffer(self.buffer, offset, data);
        Ok(grew)
    }

    /// Grows to hold `needed` bytes, doubling at minimum. Returns whether
    /// a grow happened.
    ///
    /// # Errors
    ///
    /// Any buffer-creation error from the device.
    pub fn ensure_capacity(&mut self, needed: u64) -> StreamResult<bool> {
        if needed <= self.capacity {
            return Ok(false);
        }
        let new_capacity = needed.max(self.capacity * 2);
        let new_buffer = self.device.create_buffer(&BufferDesc {
            size: new_capacity,
            kind: self.kind,
            persistent: false,
            label: self.label,
        })?;
        self.device.copy_buffer(self.buffer, new_buffer, self.capacity);
        self.device.destroy_buffer(self.buffer);

        tracing::debug!(
            label = self.label,
            from = self.capacity,
            to = new_capacity,
            "buffer grown"
        );
        self.buffer = new_buffer;
        self.capacity = new_capacity;
        Ok(true)
    }

    /// Current backing buffer. Changes across grows.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Current capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl Drop for GrowBuffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;

    fn grow_buffer(device: &Arc<NullDevice>, capacity: u64) -> GrowBuffer {
        let dyn_device: Arc<dyn RenderDevice> = Arc::clone(device) as Arc<dyn RenderDevice>;
        GrowBuffer::new(dyn_device, BufferKind::Vertex, capacity, "test pool").unwrap()
    }

    #[test]
    fn test_in_range_write_does_not_grow() {
        let device = Arc::new(NullDevice::new());
        let mut buffer = grow_buffer(&device, 8);
        assert!(!buffer.write(0, &[1, 2, 3, 4]).unwrap());
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn test_growth_doubles_and_preserves_contents() {
        let device = Arc::new(NullDevice::new());
        let mut buffer = grow_buffer(&device, 8);
        buffer.write(0, &[9, 8, 7, 6, 5, 4, 3, 2]).unwrap();

        // 4 bytes at offset 8 need 12; doubling wins: 16.
        assert!(buffer.write(8, &[1, 1, 1, 1]).unwrap());
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(device.buffer_size(buffer.buffer()), 16);
        assert_eq!(
            device.read_back(buffer.buffer(), 0, 12),
            vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 1, 1, 1]
        );
    }

    #[test]
    fn test_growth_jumps_past_doubling_for_large_writes() {
        let device = Arc::new(NullDevice::new());
        let mut buffer = grow_buffer(&device, 8);
        assert!(buffer.write(0, &[0u8; 100]).unwrap());
        assert_eq!(buffer.capacity(), 100);
    }

    #[test]
    fn test_old_allocation_destroyed_on_growth() {
        let device = Arc::new(NullDevice::new());
        let mut buffer = grow_buffer(&device, 8);
        buffer.write(0, &[0u8; 32]).unwrap();
        // Only the replacement allocation remains.
        assert_eq!(device.live_buffers(), 1);
        drop(buffer);
        assert_eq!(device.live_buffers(), 0);
    }
}
