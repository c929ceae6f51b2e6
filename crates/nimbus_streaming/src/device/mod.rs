//! # Render Device Boundary
//!
//! The narrow contract this core needs from a graphics backend: buffers
//! that stay persistently mapped at a stable base address, fences whose
//! signals are monotonic, and indirect multi-draw submission. Everything
//! else about the driver is out of scope.
//!
//! Exactly one implementation ships with the crate: [`NullDevice`], a
//! headless device over CPU memory used by tests and benches. Hardware
//! backends implement [`RenderDevice`] out of tree.

mod null;

pub use null::NullDevice;

use std::ptr::NonNull;

use crate::error::StreamResult;

/// Opaque handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u64);

/// Opaque handle to a fence inserted into the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub(crate) u64);

/// What the backend is capable of. Checked once, at construction time.
#[derive(Debug, Clone, Copy)]
pub struct DeviceCaps {
    /// Buffers can stay mapped while the GPU reads them.
    pub persistent_mapping: bool,
    /// Mapped writes become GPU-visible without an explicit flush.
    pub coherent_mapping: bool,
    /// The backend accepts multi-draw indirect submissions.
    pub multi_draw_indirect: bool,
}

/// What a buffer will be used for. Drives backend storage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Vertex attribute storage.
    Vertex,
    /// Index storage.
    Index,
    /// Per-instance attribute storage.
    Instance,
    /// Indirect draw record storage.
    Indirect,
}

/// Buffer creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    /// Size in bytes.
    pub size: u64,
    /// Intended use.
    pub kind: BufferKind,
    /// Request persistent, CPU-writable mapping.
    pub persistent: bool,
    /// Debug label.
    pub label: &'static str,
}

/// Outcome of a bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    /// The fence had already signaled before the wait began.
    AlreadySignaled,
    /// The fence signaled during the wait.
    ConditionSatisfied,
    /// The wait timed out before the fence signaled.
    TimeoutExpired,
    /// The driver reported a wait failure. Callers must not treat this as
    /// success silently - log, then proceed as a best-effort recovery.
    WaitFailed,
}

impl FenceWait {
    /// True when the fence is safe to recycle (signal observed).
    #[inline]
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::AlreadySignaled | Self::ConditionSatisfied)
    }
}

/// One indirect multi-draw submission.
///
/// `draw_count` records of `stride` bytes are read starting at `offset`
/// inside `buffer`. The record layout is the firm wire contract in
/// [`crate::draw::commands`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiDrawCall {
    /// Buffer holding the draw records.
    pub buffer: BufferId,
    /// Byte offset of the first record.
    pub offset: u64,
    /// Number of records to execute.
    pub draw_count: u32,
    /// Byte stride between records.
    pub stride: u32,
    /// Whether the records are indexed (5-field) or non-indexed (4-field).
    pub indexed: bool,
}

/// The graphics backend, reduced to what streaming needs.
///
/// Contract assumed by this core:
/// - a created buffer's mapped base address stays valid for the buffer's
///   whole lifetime;
/// - fence signals are monotonic (never regress to unsignaled);
/// - submitted commands read buffer contents as of submission order.
pub trait RenderDevice {
    /// Reports backend capabilities.
    fn caps(&self) -> DeviceCaps;

    /// Creates a buffer.
    fn create_buffer(&self, desc: &BufferDesc) -> StreamResult<BufferId>;

    /// Destroys a buffer. The handle must not be used afterwards.
    fn destroy_buffer(&self, buffer: BufferId);

    /// Returns the stable base address of a persistently mapped buffer.
    fn map_persistent(&self, buffer: BufferId) -> StreamResult<NonNull<u8>>;

    /// Releases the write mapping. The GPU may continue reading.
    fn unmap(&self, buffer: BufferId);

    /// Makes `len` mapped bytes at `offset` GPU-visible. Required before
    /// submission when [`DeviceCaps::coherent_mapping`] is false.
    fn flush_mapped_range(&self, buffer: BufferId, offset: u64, len: u64);

    /// Server-side upload into an unmapped buffer.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]);

    /// Copies the first `len` bytes of `src` into `dst`.
    fn copy_buffer(&self, src: BufferId, dst: BufferId, len: u64);

    /// Inserts a fence at the current point of the command stream.
    fn place_fence(&self) -> FenceHandle;

    /// Releases a fence object.
    fn delete_fence(&self, fence: FenceHandle);

    /// Waits up to `timeout_ns` for the fence to signal.
    fn client_wait(&self, fence: FenceHandle, timeout_ns: u64) -> FenceWait;

    /// Repoints a vertex input binding at `buffer`. Needed each frame by
    /// the per-block ring strategy, where the current allocation changes.
    fn rebind_vertex_stream(&self, binding: u32, buffer: BufferId);

    /// Executes one indirect multi-draw.
    fn multi_draw_indirect(&self, call: &MultiDrawCall);
}
