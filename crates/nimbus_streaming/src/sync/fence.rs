//! # GPU Fence
//!
//! A recyclable completion marker. Placed after GPU work is submitted,
//! polled later to learn whether that work has finished. One fence object
//! is reused across frames - the hardware handle is recycled, the wrapper
//! is never reallocated.

use crate::device::{FenceHandle, FenceWait, RenderDevice};

/// Cross-frame completion marker for GPU work.
///
/// A fence starts unplaced. [`GpuFence::place`] inserts a hardware fence at
/// the current point of the command stream; [`GpuFence::poll`] checks it;
/// [`GpuFence::recycle`] releases the hardware object so the wrapper can be
/// placed again. Polling or recycling an unplaced fence is a caller error
/// and panics.
#[derive(Debug, Default)]
pub struct GpuFence {
    handle: Option<FenceHandle>,
}

impl GpuFence {
    /// Creates an unplaced fence.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// True once `place` has been called and `recycle` has not.
    #[inline]
    #[must_use]
    pub const fn is_placed(&self) -> bool {
        self.handle.is_some()
    }

    /// Inserts a completion marker at the current command-stream point.
    ///
    /// Valid on an unplaced or previously recycled fence; placing over an
    /// existing handle releases it first, so prior state is overwritten.
    pub fn place(&mut self, device: &dyn RenderDevice) {
        if let Some(old) = self.handle.take() {
            device.delete_fence(old);
        }
        self.handle = Some(device.place_fence());
    }

    /// Bounded-wait check of the fence signal.
    ///
    /// [`FenceWait::is_ready`] on the result tells whether the guarded work
    /// has completed. [`FenceWait::WaitFailed`] must not be treated as
    /// success silently - the ring logs it and proceeds as a best-effort
    /// recovery.
    ///
    /// # Panics
    ///
    /// Panics if the fence is unplaced. A fence must be placed before its
    /// signal means anything.
    #[must_use]
    pub fn poll(&self, device: &dyn RenderDevice, timeout_ns: u64) -> FenceWait {
        let handle = self.handle.expect("polling an unplaced fence");
        device.client_wait(handle, timeout_ns)
    }

    /// Releases the hardware object so a fresh `place` can be issued.
    ///
    /// Only meaningful once the signal has been observed, or when the
    /// caller is intentionally discarding the fence.
    ///
    /// # Panics
    ///
    /// Panics if the fence is unplaced.
    pub fn recycle(&mut self, device: &dyn RenderDevice) {
        let handle = self.handle.take().expect("recycling an unplaced fence");
        device.delete_fence(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;

    #[test]
    fn test_place_poll_recycle_cycle() {
        let device = NullDevice::new();
        let mut fence = GpuFence::new();
        assert!(!fence.is_placed());

        fence.place(&device);
        assert!(fence.is_placed());
        assert!(fence.poll(&device, 0).is_ready());

        fence.recycle(&device);
        assert!(!fence.is_placed());
        assert_eq!(device.live_fences(), 0);
    }

    #[test]
    fn test_replacing_releases_old_handle() {
        let device = NullDevice::new();
        let mut fence = GpuFence::new();
        fence.place(&device);
        fence.place(&device);
        // The first handle was deleted when the second was placed.
        assert_eq!(device.live_fences(), 1);
        assert_eq!(device.fences_placed(), 2);
    }

    #[test]
    fn test_latency_is_observed() {
        let device = NullDevice::new();
        device.set_fence_latency(2);
        let mut fence = GpuFence::new();
        fence.place(&device);
        assert!(!fence.poll(&device, 0).is_ready());
        assert!(!fence.poll(&device, 0).is_ready());
        assert!(fence.poll(&device, 0).is_ready());
    }

    #[test]
    #[should_panic(expected = "polling an unplaced fence")]
    fn test_poll_unplaced_panics() {
        let device = NullDevice::new();
        let fence = GpuFence::new();
        let _ = fence.poll(&device, 0);
    }

    #[test]
    #[should_panic(expected = "recycling an unplaced fence")]
    fn test_recycle_unplaced_panics() {
        let device = NullDevice::new();
        let mut fence = GpuFence::new();
        fence.recycle(&device);
    }
}
