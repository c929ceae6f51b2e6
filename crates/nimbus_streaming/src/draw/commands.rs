//! # Indirect Draw Record Layouts
//!
//! The exact byte layouts the backend reads from the indirect buffer.
//! Field order and widths are a firm wire contract: non-indexed records
//! are four u32 fields, indexed records are five 4-byte fields with a
//! signed base vertex. Do not reorder.

use bytemuck::{Pod, Zeroable};

/// Non-indexed indirect draw record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArraysIndirectArgs {
    /// Number of vertices to draw.
    pub count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First vertex in the vertex buffer.
    pub first: u32,
    /// First instance ID.
    pub base_instance: u32,
}

impl DrawArraysIndirectArgs {
    /// Record size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Indexed indirect draw record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawElementsIndirectArgs {
    /// Number of indices to draw.
    pub count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First index in the index buffer.
    pub first_index: u32,
    /// Vertex offset added to each index.
    pub base_vertex: i32,
    /// First instance ID.
    pub base_instance: u32,
}

impl DrawElementsIndirectArgs {
    /// Record size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes_match_the_wire_contract() {
        assert_eq!(DrawArraysIndirectArgs::SIZE, 16);
        assert_eq!(DrawElementsIndirectArgs::SIZE, 20);
    }

    #[test]
    fn test_field_order_on_the_wire() {
        let record = DrawElementsIndirectArgs {
            count: 1,
            instance_count: 2,
            first_index: 3,
            base_vertex: -4,
            base_instance: 5,
        };
        let bytes = bytemuck::bytes_of(&record);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-4i32).to_le_bytes());
        assert_eq!(&bytes[16..20], &5u32.to_le_bytes());
    }

    #[test]
    fn test_non_indexed_field_order_on_the_wire() {
        let record = DrawArraysIndirectArgs {
            count: 6,
            instance_count: 1,
            first: 12,
            base_instance: 9,
        };
        let bytes = bytemuck::bytes_of(&record);
        assert_eq!(&bytes[0..4], &6u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &12u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &9u32.to_le_bytes());
    }
}
