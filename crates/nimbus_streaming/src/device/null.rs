//! # Null Device
//!
//! Headless [`RenderDevice`] over plain CPU memory. "GPU execution" is
//! modeled by scriptable fence latency: a fence signals after a configured
//! number of polls, which is exactly what the ring-stall tests need to
//! observe. Submissions and stream rebinds are recorded for inspection.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use super::{BufferDesc, BufferId, DeviceCaps, FenceHandle, FenceWait, MultiDrawCall, RenderDevice};
use crate::error::{StreamError, StreamResult};

/// One simulated buffer.
struct NullBuffer {
    data: Box<[u8]>,
    persistent: bool,
    mapped: bool,
}

/// One simulated fence.
struct NullFence {
    /// Non-ready polls left before the fence signals.
    remaining_polls: u32,
    /// Whether a wait has already observed the signal.
    observed: bool,
}

#[derive(Default)]
struct NullState {
    buffers: HashMap<u64, NullBuffer>,
    next_buffer: u64,
    fences: HashMap<u64, NullFence>,
    next_fence: u64,
    fence_latency: u32,
    fail_next_wait: bool,
    fences_placed: u64,
    submissions: Vec<MultiDrawCall>,
    rebinds: Vec<(u32, BufferId)>,
    flushes: Vec<(BufferId, u64, u64)>,
}

/// Headless render device for tests and benches.
///
/// All buffers live in boxed CPU slices, so persistent mapping hands out a
/// base address that is stable for the buffer's whole lifetime - the same
/// guarantee the real backend contract demands.
pub struct NullDevice {
    caps: DeviceCaps,
    state: Mutex<NullState>,
}

impl NullDevice {
    /// Creates a fully capable device with coherent mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::with_caps(DeviceCaps {
            persistent_mapping: true,
            coherent_mapping: true,
            multi_draw_indirect: true,
        })
    }

    /// Creates a device reporting the given capabilities.
    #[must_use]
    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            state: Mutex::new(NullState::default()),
        }
    }

    /// Every fence placed from now on signals only after `polls` non-ready
    /// waits.
    pub fn set_fence_latency(&self, polls: u32) {
        self.state.lock().fence_latency = polls;
    }

    /// Makes the next `client_wait` report a driver failure.
    pub fn inject_wait_failure(&self) {
        self.state.lock().fail_next_wait = true;
    }

    /// All multi-draw submissions so far, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<MultiDrawCall> {
        self.state.lock().submissions.clone()
    }

    /// All vertex stream rebinds so far, in order.
    #[must_use]
    pub fn rebinds(&self) -> Vec<(u32, BufferId)> {
        self.state.lock().rebinds.clone()
    }

    /// All explicit mapped-range flushes so far, in order.
    #[must_use]
    pub fn flushes(&self) -> Vec<(BufferId, u64, u64)> {
        self.state.lock().flushes.clone()
    }

    /// Total fences ever placed.
    #[must_use]
    pub fn fences_placed(&self) -> u64 {
        self.state.lock().fences_placed
    }

    /// Fence objects currently alive (placed and not deleted).
    #[must_use]
    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    /// Buffers currently alive.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Size in bytes of a live buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer does not exist.
    #[must_use]
    pub fn buffer_size(&self, buffer: BufferId) -> u64 {
        self.state.lock().buffers[&buffer.0].data.len() as u64
    }

    /// Copies `len` bytes at `offset` out of a live buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer does not exist or the range is out of bounds.
    #[must_use]
    pub fn read_back(&self, buffer: BufferId, offset: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        let data = &state.buffers[&buffer.0].data;
        let start = usize::try_from(offset).expect("offset fits usize");
        data[start..start + len].to_vec()
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for NullDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn create_buffer(&self, desc: &BufferDesc) -> StreamResult<BufferId> {
        if desc.persistent && !self.caps.persistent_mapping {
            return Err(StreamError::MissingCapability("persistent buffer mapping"));
        }
        let mut state = self.state.lock();
        let id = state.next_buffer;
        state.next_buffer += 1;
        let size = usize::try_from(desc.size).expect("buffer size fits usize");
        state.buffers.insert(
            id,
            NullBuffer {
                data: vec![0u8; size].into_boxed_slice(),
                persistent: desc.persistent,
                mapped: false,
            },
        );
        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let removed = self.state.lock().buffers.remove(&buffer.0);
        debug_assert!(removed.is_some(), "destroying unknown buffer");
    }

    fn map_persistent(&self, buffer: BufferId) -> StreamResult<NonNull<u8>> {
        let mut state = self.state.lock();
        let buf = state
            .buffers
            .get_mut(&buffer.0)
            .expect("mapping unknown buffer");
        if !buf.persistent {
            return Err(StreamError::MissingCapability("persistent buffer mapping"));
        }
        buf.mapped = true;
        // The boxed slice never reallocates, so this base address is stable
        // until destroy_buffer.
        NonNull::new(buf.data.as_mut_ptr())
            .ok_or(StreamError::MissingCapability("mapped base address"))
    }

    fn unmap(&self, buffer: BufferId) {
        if let Some(buf) = self.state.lock().buffers.get_mut(&buffer.0) {
            buf.mapped = false;
        }
    }

    fn flush_mapped_range(&self, buffer: BufferId, offset: u64, len: u64) {
        self.state.lock().flushes.push((buffer, offset, len));
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) {
        let mut state = self.state.lock();
        let buf = state
            .buffers
            .get_mut(&buffer.0)
            .expect("writing unknown buffer");
        let start = usize::try_from(offset).expect("offset fits usize");
        assert!(
            start + data.len() <= buf.data.len(),
            "write_buffer out of bounds"
        );
        buf.data[start..start + data.len()].copy_from_slice(data);
    }

    fn copy_buffer(&self, src: BufferId, dst: BufferId, len: u64) {
        let mut state = self.state.lock();
        let len = usize::try_from(len).expect("copy length fits usize");
        let bytes = state.buffers[&src.0].data[..len].to_vec();
        let target = state
            .buffers
            .get_mut(&dst.0)
            .expect("copying to unknown buffer");
        target.data[..len].copy_from_slice(&bytes);
    }

    fn place_fence(&self) -> FenceHandle {
        let mut state = self.state.lock();
        let id = state.next_fence;
        state.next_fence += 1;
        state.fences_placed += 1;
        let latency = state.fence_latency;
        state.fences.insert(
            id,
            NullFence {
                remaining_polls: latency,
                observed: false,
            },
        );
        FenceHandle(id)
    }

    fn delete_fence(&self, fence: FenceHandle) {
        let removed = self.state.lock().fences.remove(&fence.0);
        debug_assert!(removed.is_some(), "deleting unknown fence");
    }

    fn client_wait(&self, fence: FenceHandle, _timeout_ns: u64) -> FenceWait {
        let mut state = self.state.lock();
        if state.fail_next_wait {
            state.fail_next_wait = false;
            return FenceWait::WaitFailed;
        }
        let fence = state.fences.get_mut(&fence.0).expect("waiting on unknown fence");
        if fence.remaining_polls > 0 {
            fence.remaining_polls -= 1;
            FenceWait::TimeoutExpired
        } else if fence.observed {
            FenceWait::AlreadySignaled
        } else {
            // Signals are monotonic: once observed, every later wait
            // reports AlreadySignaled.
            fence.observed = true;
            FenceWait::ConditionSatisfied
        }
    }

    fn rebind_vertex_stream(&self, binding: u32, buffer: BufferId) {
        self.state.lock().rebinds.push((binding, buffer));
    }

    fn multi_draw_indirect(&self, call: &MultiDrawCall) {
        self.state.lock().submissions.push(*call);
    }
}
