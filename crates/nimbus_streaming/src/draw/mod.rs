//! # Multi-Draw Indirect Streaming
//!
//! A large pool of independently created and destroyed GPU-resident draw
//! instances, submitted as one indirect multi-draw per frame.

pub mod commands;
mod system;

pub use system::{
    BoundingSphere, IndexKind, MultiDrawConfig, MultiDrawSystem, SizingHint, WORLD_MATRIX_BINDING,
};
