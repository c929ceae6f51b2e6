//! # Streaming Error Types
//!
//! All errors that can occur in the streaming core.
//!
//! Usage and precondition errors surface synchronously to the immediate
//! caller and are never retried. Capability errors surface at construction
//! time, before any resource exists. Hardware fence-wait failures are NOT
//! errors here - they are logged and degrade to "assume ready" so a frame
//! can never deadlock on a broken driver fence.

use thiserror::Error;

/// Errors that can occur in the streaming core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A required hardware capability is absent. Raised at construction,
    /// before any resource is allocated.
    #[error("missing required capability: {0}")]
    MissingCapability(&'static str),

    /// The ring was created with zero blocks.
    #[error("ring buffer needs at least one block, got {requested}")]
    InvalidBlockCount {
        /// The rejected block count.
        requested: usize,
    },

    /// Write access to the ring was already released by `unmap`.
    #[error("ring buffer is unmapped; it can no longer be written")]
    RingUnmapped,

    /// The block is outside its validity window (already finished, or the
    /// ring reclaimed it).
    #[error("ring block is not valid for writing")]
    BlockInvalid,

    /// `set_position` outside `[0, block_size)`.
    #[error("position {position} is outside the block range [0, {limit})")]
    PositionOutOfRange {
        /// The rejected cursor position.
        position: usize,
        /// The block size in bytes.
        limit: usize,
    },

    /// A write would run past the end of the block.
    #[error("write of {size} bytes at {position} exceeds block size {limit}")]
    WriteOutOfBounds {
        /// Cursor position at the time of the write.
        position: usize,
        /// Size of the rejected write.
        size: usize,
        /// The block size in bytes.
        limit: usize,
    },

    /// Input data length is not compatible with its record stride.
    #[error("{input} data length {len} is not a multiple of stride {stride}")]
    StrideMismatch {
        /// Which input was rejected ("vertex", "index", "instance").
        input: &'static str,
        /// The rejected byte length.
        len: usize,
        /// The expected record stride.
        stride: usize,
    },

    /// Index data handed to a non-indexed system.
    #[error("index data supplied, but the system is configured non-indexed")]
    UnexpectedIndexData,

    /// An indexed system was given no index data.
    #[error("the system is configured indexed, but no index data was supplied")]
    MissingIndexData,

    /// Per-instance data handed to a system with no instance schema.
    #[error("instance data supplied, but no instance schema is configured")]
    UnexpectedInstanceData,

    /// A system with an instance schema was given no per-instance data.
    #[error("an instance schema is configured, but no instance data was supplied")]
    MissingInstanceData,

    /// The buffering factor is outside the supported 1..=3 range.
    #[error("buffering factor {requested} is outside 1..=3")]
    InvalidBuffering {
        /// The rejected buffering factor.
        requested: u32,
    },

    /// `configure` was called twice.
    #[error("the streaming system is already configured")]
    AlreadyConfigured,

    /// `initialize` was called twice.
    #[error("the streaming system is already initialized")]
    AlreadyInitialized,

    /// An operation that needs configuration ran before `configure`.
    #[error("the streaming system has not been configured")]
    NotConfigured,

    /// An operation that needs backing storage ran before `initialize`.
    #[error("the streaming system has not been initialized")]
    NotInitialized,

    /// An instance id that is not (or no longer) live.
    #[error("unknown instance id {0}")]
    UnknownInstance(u32),

    /// `render` asked for more instances than the caller provided.
    #[error("render count {count} exceeds the provided list length {len}")]
    CountExceedsLen {
        /// The requested record count.
        count: usize,
        /// The shortest provided slice length.
        len: usize,
    },

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;
