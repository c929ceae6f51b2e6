//! # GPU Record Layouts
//!
//! Explicit attribute schemas for vertex and per-instance records.
//!
//! Layouts are declared as a static, ordered list of attributes at
//! configuration time; byte offsets and the record stride are computed once
//! from that list. No runtime type inspection, no implicit padding - callers
//! that need interface-mandated alignment bake it into the schema.

use serde::{Deserialize, Serialize};

/// Scalar type of one attribute component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit unsigned integer.
    U32,
}

impl ScalarKind {
    /// Byte width of one component.
    #[must_use]
    pub const fn byte_width(self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 => 8,
        }
    }
}

/// One attribute of a GPU record: a name, a scalar type, and a component
/// count (e.g. `("position", F32, 3)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDesc {
    /// Attribute name, used for lookups and diagnostics.
    pub name: String,
    /// Scalar type of each component.
    pub kind: ScalarKind,
    /// Number of components (1-4 for vertex attributes, 16 for a matrix).
    pub count: u32,
}

impl AttributeDesc {
    /// Creates an attribute description.
    #[must_use]
    pub fn new(name: &str, kind: ScalarKind, count: u32) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            count,
        }
    }

    /// Total byte size of this attribute.
    #[must_use]
    pub const fn byte_size(&self) -> u32 {
        self.kind.byte_width() * self.count
    }
}

/// An ordered attribute list with precomputed offsets and stride.
///
/// The record stride is the sum of the attribute sizes in declaration
/// order. Nothing is padded or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<AttributeDesc>", into = "Vec<AttributeDesc>")]
pub struct BufferSchema {
    attributes: Vec<AttributeDesc>,
    offsets: Vec<u32>,
    stride: u32,
}

impl BufferSchema {
    /// Builds a schema from an ordered attribute list, computing offsets
    /// and the record stride once.
    #[must_use]
    pub fn new(attributes: Vec<AttributeDesc>) -> Self {
        let mut offsets = Vec::with_capacity(attributes.len());
        let mut stride = 0;
        for attr in &attributes {
            offsets.push(stride);
            stride += attr.byte_size();
        }
        Self {
            attributes,
            offsets,
            stride,
        }
    }

    /// Record stride in bytes.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// The attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDesc] {
        &self.attributes
    }

    /// Byte offset of the attribute named `name`, if present.
    #[must_use]
    pub fn offset_of(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .position(|a| a.name == name)
            .map(|i| self.offsets[i])
    }
}

impl From<Vec<AttributeDesc>> for BufferSchema {
    fn from(attributes: Vec<AttributeDesc>) -> Self {
        Self::new(attributes)
    }
}

impl From<BufferSchema> for Vec<AttributeDesc> {
    fn from(schema: BufferSchema) -> Self {
        schema.attributes
    }
}
