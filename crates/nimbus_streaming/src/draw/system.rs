//! # Streaming Draw System
//!
//! The orchestrator: owns grow-on-write pools for index/vertex/instance
//! data, a fence-gated ring of indirect draw records, and an optional ring
//! of world matrices. Instances come and go at any time; every frame ends
//! in exactly one multi-draw submission.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use nimbus_core::{BufferSchema, FreeListAllocator};

use crate::buffer::GrowBuffer;
use crate::device::{BufferKind, MultiDrawCall, RenderDevice};
use crate::draw::commands::{DrawArraysIndirectArgs, DrawElementsIndirectArgs};
use crate::error::{StreamError, StreamResult};
use crate::ring::{RingBuffer, RingStrategy};
use crate::stats::StreamStats;

/// Vertex input binding the world-matrix stream is attached to.
///
/// Rebound every frame: under the per-block ring strategy the backing
/// allocation changes on each cycle.
pub const WORLD_MATRIX_BINDING: u32 = 4;

/// Bytes per streamed world matrix: 4x4, column-major, f32.
const MATRIX_STRIDE: usize = 64;

/// Column-major identity, the transform of a fresh instance.
const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Width of the indices in an indexed configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    #[default]
    U32,
}

impl IndexKind {
    /// Byte width of one index.
    #[must_use]
    pub const fn byte_width(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Bounding volume of one instance, for the scene's culling and distance
/// computation. This core stores it; it never evaluates it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingSphere {
    /// Sphere center in model space.
    pub center: [f32; 3],
    /// Sphere radius.
    pub radius: f32,
}

/// One-time configuration of the streaming draw system.
///
/// Loadable from TOML at startup via [`MultiDrawConfig::from_toml`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiDrawConfig {
    /// Vertex record layout.
    pub vertex_schema: BufferSchema,
    /// Per-instance record layout, when instance data is streamed.
    #[serde(default)]
    pub instance_schema: Option<BufferSchema>,
    /// Indexed geometry mode.
    #[serde(default)]
    pub indexed: bool,
    /// Index width in indexed mode.
    #[serde(default)]
    pub index_kind: IndexKind,
    /// Stream a 4x4 world matrix per instance each frame.
    #[serde(default)]
    pub stream_world_matrices: bool,
    /// Ring depth for the streamed resources, 1..=3. With 1 every frame
    /// stalls on the previous one; 2 or 3 let the CPU run ahead.
    #[serde(default = "default_buffering")]
    pub buffering: u32,
    /// Backing strategy for the rings.
    #[serde(default)]
    pub strategy: RingStrategy,
}

fn default_buffering() -> u32 {
    2
}

impl MultiDrawConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidConfig`] with the parser diagnostic.
    pub fn from_toml(text: &str) -> StreamResult<Self> {
        toml::from_str(text).map_err(|e| StreamError::InvalidConfig(e.to_string()))
    }

    /// Byte stride of one indirect draw record in this configuration.
    const fn record_stride(&self) -> usize {
        if self.indexed {
            DrawElementsIndirectArgs::SIZE
        } else {
            DrawArraysIndirectArgs::SIZE
        }
    }
}

/// Initial sizing for [`MultiDrawSystem::initialize`]. Averages, not caps:
/// every pool grows on write.
#[derive(Debug, Clone, Copy)]
pub struct SizingHint {
    /// Expected live instance count.
    pub instances: u32,
    /// Expected vertices per instance.
    pub vertices_per_instance: u32,
    /// Expected indices per instance (ignored in non-indexed mode).
    pub indices_per_instance: u32,
}

/// The stored indirect record of one instance.
enum DrawRecord {
    Arrays(DrawArraysIndirectArgs),
    Elements(DrawElementsIndirectArgs),
}

impl DrawRecord {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Arrays(args) => bytemuck::bytes_of(args),
            Self::Elements(args) => bytemuck::bytes_of(args),
        }
    }
}

/// Bookkeeping for one live instance.
struct StreamedInstance {
    /// (offset, len) inside the vertex pool.
    vertex_range: (u64, u64),
    /// (offset, len) inside the index pool.
    index_range: Option<(u64, u64)>,
    /// (offset, len) inside the per-instance pool.
    instance_range: Option<(u64, u64)>,
    record: DrawRecord,
    bounds: BoundingSphere,
    /// Column-major world transform, streamed when matrices are enabled.
    transform: [f32; 16],
}

/// Backing state created by `initialize`.
struct StreamState {
    vertex_pool: GrowBuffer,
    vertex_alloc: FreeListAllocator,
    index_pool: Option<GrowBuffer>,
    index_alloc: FreeListAllocator,
    instance_pool: Option<GrowBuffer>,
    instance_alloc: FreeListAllocator,
    /// Drives id assignment when only world matrices are streamed.
    matrix_alloc: FreeListAllocator,
    matrix_ring: Option<RingBuffer>,
    /// Matrix ring capacity in instances.
    matrix_capacity: u32,
    indirect_ring: RingBuffer,
    /// Indirect ring capacity in records.
    indirect_capacity: u32,
    instances: HashMap<u32, StreamedInstance>,
    /// Fallback id counter when no per-instance stream tracks slots.
    next_id: u32,
    /// Per-frame (id, squared distance) sort scratch, reused.
    scratch: Vec<(u32, f32)>,
}

/// Streaming multi-draw-indirect system.
///
/// Lifecycle: [`MultiDrawSystem::configure`] once, then
/// [`MultiDrawSystem::initialize`] once, then any interleaving of
/// `create_instance` / `delete_instance` / `set_transform` / `render`.
pub struct MultiDrawSystem {
    device: Arc<dyn RenderDevice>,
    config: Option<MultiDrawConfig>,
    state: Option<StreamState>,
    stats: StreamStats,
}

impl MultiDrawSystem {
    /// Creates an unconfigured system on `device`.
    #[must_use]
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            device,
            config: None,
            state: None,
            stats: StreamStats::default(),
        }
    }

    /// One-time configuration.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyConfigured`] on a second call,
    /// [`StreamError::InvalidBuffering`] outside 1..=3, or
    /// [`StreamError::MissingCapability`] when the device cannot execute
    /// indirect multi-draws.
    pub fn configure(&mut self, config: MultiDrawConfig) -> StreamResult<()> {
        if self.config.is_some() {
            return Err(StreamError::AlreadyConfigured);
        }
        if !(1..=3).contains(&config.buffering) {
            return Err(StreamError::InvalidBuffering {
                requested: config.buffering,
            });
        }
        if !self.device.caps().multi_draw_indirect {
            return Err(StreamError::MissingCapability("multi-draw indirect"));
        }
        self.config = Some(config);
        Ok(())
    }

    /// Allocates the backing pools and rings from sizing hints.
    ///
    /// The hints set initial capacities only; pools grow on write and the
    /// indirect ring grows on demand in `render`.
    ///
    /// # Errors
    ///
    /// [`StreamError::NotConfigured`], [`StreamError::AlreadyInitialized`],
    /// or any device buffer-creation error.
    pub fn initialize(&mut self, hint: SizingHint) -> StreamResult<()> {
        let config = self.config.as_ref().ok_or(StreamError::NotConfigured)?;
        if self.state.is_some() {
            return Err(StreamError::AlreadyInitialized);
        }

        let instances = hint.instances.max(1);
        let vertices = u64::from(hint.vertices_per_instance.max(1));
        let vertex_pool = GrowBuffer::new(
            Arc::clone(&self.device),
            BufferKind::Vertex,
            u64::from(instances) * vertices * u64::from(config.vertex_schema.stride()),
            "vertex pool",
        )?;

        let index_pool = if config.indexed {
            let indices = u64::from(hint.indices_per_instance.max(1));
            Some(GrowBuffer::new(
                Arc::clone(&self.device),
                BufferKind::Index,
                u64::from(instances) * indices * config.index_kind.byte_width() as u64,
                "index pool",
            )?)
        } else {
            None
        };

        let instance_pool = match &config.instance_schema {
            Some(schema) => Some(GrowBuffer::new(
                Arc::clone(&self.device),
                BufferKind::Instance,
                u64::from(instances) * u64::from(schema.stride()),
                "instance pool",
            )?),
            None => None,
        };

        let matrix_ring = if config.stream_world_matrices {
            Some(RingBuffer::new(
                Arc::clone(&self.device),
                BufferKind::Vertex,
                config.buffering as usize,
                instances as usize * MATRIX_STRIDE,
                config.strategy,
            )?)
        } else {
            None
        };

        let indirect_ring = RingBuffer::new(
            Arc::clone(&self.device),
            BufferKind::Indirect,
            config.buffering as usize,
            instances as usize * config.record_stride(),
            config.strategy,
        )?;

        self.state = Some(StreamState {
            vertex_pool,
            vertex_alloc: FreeListAllocator::new(),
            index_pool,
            index_alloc: FreeListAllocator::new(),
            instance_pool,
            instance_alloc: FreeListAllocator::new(),
            matrix_alloc: FreeListAllocator::new(),
            matrix_ring,
            matrix_capacity: instances,
            indirect_ring,
            indirect_capacity: instances,
            instances: HashMap::new(),
            next_id: 0,
            scratch: Vec::new(),
        });
        Ok(())
    }

    /// Creates a GPU-resident instance from raw record data.
    ///
    /// Each input must be sized to its configured stride. The instance id
    /// is the slot index of the per-instance allocation (instance data if
    /// that stream exists, otherwise the world-matrix slot), so deleted
    /// ids are reused. With neither stream enabled, ids only ever grow -
    /// an accepted simplification, not a leak of live slots.
    ///
    /// # Errors
    ///
    /// [`StreamError::StrideMismatch`] on bad input lengths; the
    /// `Missing*`/`Unexpected*` variants on inputs that disagree with the
    /// configured mode; [`StreamError::NotInitialized`] before
    /// `initialize`.
    pub fn create_instance(
        &mut self,
        indices: Option<&[u8]>,
        vertices: &[u8],
        instance_data: Option<&[u8]>,
        bounds: BoundingSphere,
    ) -> StreamResult<u32> {
        let config = self.config.as_ref().ok_or(StreamError::NotConfigured)?;
        let state = self.state.as_mut().ok_or(StreamError::NotInitialized)?;

        if indices.is_some() && !config.indexed {
            return Err(StreamError::UnexpectedIndexData);
        }
        if indices.is_none() && config.indexed {
            return Err(StreamError::MissingIndexData);
        }
        if instance_data.is_some() && config.instance_schema.is_none() {
            return Err(StreamError::UnexpectedInstanceData);
        }
        if instance_data.is_none() && config.instance_schema.is_some() {
            return Err(StreamError::MissingInstanceData);
        }

        let vertex_stride = config.vertex_schema.stride() as usize;
        if vertices.is_empty() || vertices.len() % vertex_stride != 0 {
            return Err(StreamError::StrideMismatch {
                input: "vertex",
                len: vertices.len(),
                stride: vertex_stride,
            });
        }
        if let Some(index_bytes) = indices {
            let width = config.index_kind.byte_width();
            if index_bytes.is_empty() || index_bytes.len() % width != 0 {
                return Err(StreamError::StrideMismatch {
                    input: "index",
                    len: index_bytes.len(),
                    stride: width,
                });
            }
        }
        if let (Some(data), Some(schema)) = (instance_data, &config.instance_schema) {
            let stride = schema.stride() as usize;
            if data.len() != stride {
                return Err(StreamError::StrideMismatch {
                    input: "instance",
                    len: data.len(),
                    stride,
                });
            }
        }

        // Id assignment: the per-instance slot IS the id, so freed slots
        // come back as freed ids.
        let (id, instance_range) = if let Some(schema) = &config.instance_schema {
            let stride = u64::from(schema.stride());
            let offset = state.instance_alloc.allocate(stride);
            ((offset / stride) as u32, Some((offset, stride)))
        } else if config.stream_world_matrices {
            let offset = state.matrix_alloc.allocate(MATRIX_STRIDE as u64);
            ((offset / MATRIX_STRIDE as u64) as u32, None)
        } else {
            let id = state.next_id;
            state.next_id += 1;
            (id, None)
        };

        // The matrix write at id * 64 must stay inside a ring block.
        if config.stream_world_matrices && id >= state.matrix_capacity {
            let new_capacity = (id + 1).max(state.matrix_capacity * 2);
            state.matrix_ring = Some(RingBuffer::new(
                Arc::clone(&self.device),
                BufferKind::Vertex,
                config.buffering as usize,
                new_capacity as usize * MATRIX_STRIDE,
                config.strategy,
            )?);
            state.matrix_capacity = new_capacity;
            self.stats.matrix_grows += 1;
            tracing::debug!(instances = new_capacity, "matrix ring grown");
        }

        let vertex_offset = state.vertex_alloc.allocate(vertices.len() as u64);
        if state.vertex_pool.write(vertex_offset, vertices)? {
            self.stats.pool_grows += 1;
        }

        let index_range = match indices {
            Some(index_bytes) => {
                let offset = state.index_alloc.allocate(index_bytes.len() as u64);
                let pool = state
                    .index_pool
                    .as_mut()
                    .expect("indexed configuration owns an index pool");
                if pool.write(offset, index_bytes)? {
                    self.stats.pool_grows += 1;
                }
                Some((offset, index_bytes.len() as u64))
            }
            None => None,
        };

        if let (Some(data), Some((offset, _))) = (instance_data, instance_range) {
            let pool = state
                .instance_pool
                .as_mut()
                .expect("instance schema owns an instance pool");
            if pool.write(offset, data)? {
                self.stats.pool_grows += 1;
            }
        }

        let record = match indices {
            Some(index_bytes) => {
                let width = config.index_kind.byte_width();
                let (index_offset, _) = index_range.expect("index range exists in indexed mode");
                DrawRecord::Elements(DrawElementsIndirectArgs {
                    count: (index_bytes.len() / width) as u32,
                    instance_count: 1,
                    first_index: (index_offset / width as u64) as u32,
                    base_vertex: (vertex_offset / vertex_stride as u64) as i32,
                    base_instance: id,
                })
            }
            None => DrawRecord::Arrays(DrawArraysIndirectArgs {
                count: (vertices.len() / vertex_stride) as u32,
                instance_count: 1,
                first: (vertex_offset / vertex_stride as u64) as u32,
                base_instance: id,
            }),
        };

        let previous = state.instances.insert(
            id,
            StreamedInstance {
                vertex_range: (vertex_offset, vertices.len() as u64),
                index_range,
                instance_range,
                record,
                bounds,
                transform: IDENTITY,
            },
        );
        debug_assert!(previous.is_none(), "allocator handed out a live id");

        tracing::trace!(id, "instance created");
        Ok(id)
    }

    /// Frees an instance's allocations and retires its id.
    ///
    /// GPU memory is not zeroed and nothing is compacted; the ranges just
    /// become gaps for later instances.
    ///
    /// # Errors
    ///
    /// [`StreamError::UnknownInstance`] for an id that is not live.
    pub fn delete_instance(&mut self, id: u32) -> StreamResult<()> {
        let config = self.config.as_ref().ok_or(StreamError::NotConfigured)?;
        let state = self.state.as_mut().ok_or(StreamError::NotInitialized)?;
        let instance = state
            .instances
            .remove(&id)
            .ok_or(StreamError::UnknownInstance(id))?;

        state
            .vertex_alloc
            .free(instance.vertex_range.0, instance.vertex_range.1);
        if let Some((offset, len)) = instance.index_range {
            state.index_alloc.free(offset, len);
        }
        if let Some((offset, len)) = instance.instance_range {
            state.instance_alloc.free(offset, len);
        } else if config.stream_world_matrices {
            state
                .matrix_alloc
                .free(u64::from(id) * MATRIX_STRIDE as u64, MATRIX_STRIDE as u64);
        }

        tracing::trace!(id, "instance deleted");
        Ok(())
    }

    /// Sets an instance's column-major world transform.
    ///
    /// # Errors
    ///
    /// [`StreamError::UnknownInstance`] for an id that is not live.
    pub fn set_transform(&mut self, id: u32, transform: [f32; 16]) -> StreamResult<()> {
        let state = self.state.as_mut().ok_or(StreamError::NotInitialized)?;
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or(StreamError::UnknownInstance(id))?;
        instance.transform = transform;
        Ok(())
    }

    /// Bounding volume of a live instance.
    #[must_use]
    pub fn bounds(&self, id: u32) -> Option<BoundingSphere> {
        self.state
            .as_ref()
            .and_then(|s| s.instances.get(&id))
            .map(|i| i.bounds)
    }

    /// Number of live instances.
    #[must_use]
    pub fn live_instances(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.instances.len())
    }

    /// Accumulated counters.
    #[must_use]
    pub const fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Renders the first `count` entries of `ids` as one multi-draw.
    ///
    /// `distances_sq` holds the squared view distance of each entry,
    /// supplied by the scene; instances are submitted back to front
    /// (descending distance, stable for ties).
    ///
    /// May stall: acquiring a ring block waits on the fence from that
    /// block's previous cycle.
    ///
    /// # Errors
    ///
    /// [`StreamError::CountExceedsLen`] when `count` overruns either
    /// slice, [`StreamError::UnknownInstance`] for a dead id,
    /// [`StreamError::NotInitialized`] before `initialize`.
    pub fn render(&mut self, ids: &[u32], distances_sq: &[f32], count: usize) -> StreamResult<()> {
        let config = self.config.as_ref().ok_or(StreamError::NotConfigured)?;
        let state = self.state.as_mut().ok_or(StreamError::NotInitialized)?;
        if count > ids.len() || count > distances_sq.len() {
            return Err(StreamError::CountExceedsLen {
                count,
                len: ids.len().min(distances_sq.len()),
            });
        }

        self.stats.frames += 1;
        if count == 0 {
            return Ok(());
        }

        // Grow the indirect ring first so this frame's records fit.
        if count > state.indirect_capacity as usize {
            let new_capacity = (count as u32).max(state.indirect_capacity * 2);
            state.indirect_ring = RingBuffer::new(
                Arc::clone(&self.device),
                BufferKind::Indirect,
                config.buffering as usize,
                new_capacity as usize * config.record_stride(),
                config.strategy,
            )?;
            state.indirect_capacity = new_capacity;
            self.stats.indirect_grows += 1;
            tracing::debug!(records = new_capacity, "indirect ring grown");
        }

        state.scratch.clear();
        for (&id, &distance_sq) in ids.iter().zip(distances_sq).take(count) {
            if !state.instances.contains_key(&id) {
                return Err(StreamError::UnknownInstance(id));
            }
            state.scratch.push((id, distance_sq));
        }

        // World matrices: ascending id order gives sequential writes into
        // the mapped block.
        let mut matrix_block = match state.matrix_ring.as_mut() {
            Some(ring) => {
                state.scratch.sort_unstable_by_key(|&(id, _)| id);
                let mut block = ring.next()?;
                for &(id, _) in &state.scratch {
                    let transform = &state.instances[&id].transform;
                    block
                        .set_position(id as usize * MATRIX_STRIDE)?
                        .put_bytes(bytemuck::bytes_of(transform))?;
                }
                // The per-block strategy swaps the backing allocation each
                // cycle, so the consuming attribute must follow it.
                self.device
                    .rebind_vertex_stream(WORLD_MATRIX_BINDING, block.buffer());
                Some(block)
            }
            None => None,
        };

        // Back to front: descending squared distance, ties stay stable.
        state.scratch.sort_by(|a, b| b.1.total_cmp(&a.1));

        let record_stride = config.record_stride();
        let mut block = state.indirect_ring.next()?;
        for &(id, _) in &state.scratch {
            block
                .set_position(id as usize * record_stride)?
                .put_bytes(state.instances[&id].record.bytes())?;
        }

        let call = MultiDrawCall {
            buffer: block.buffer(),
            offset: block.offset(),
            draw_count: count as u32,
            stride: record_stride as u32,
            indexed: config.indexed,
        };
        self.device.multi_draw_indirect(&call);

        // Fences go down after the submission they guard.
        block.finish()?;
        if let Some(matrix_block) = matrix_block.as_mut() {
            matrix_block.finish()?;
        }

        self.stats.draw_calls += 1;
        self.stats.instances_rendered += count as u64;
        tracing::trace!(count, "frame submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;
    use nimbus_core::{AttributeDesc, ScalarKind};

    fn vertex_schema() -> BufferSchema {
        // 12-byte vertex: position only.
        BufferSchema::new(vec![AttributeDesc::new("position", ScalarKind::F32, 3)])
    }

    fn base_config() -> MultiDrawConfig {
        MultiDrawConfig {
            vertex_schema: vertex_schema(),
            instance_schema: None,
            indexed: false,
            index_kind: IndexKind::U32,
            stream_world_matrices: false,
            buffering: 2,
            strategy: RingStrategy::Single,
        }
    }

    fn make_system(
        device: &Arc<NullDevice>,
        config: MultiDrawConfig,
        instances: u32,
    ) -> MultiDrawSystem {
        let dyn_device: Arc<dyn RenderDevice> = Arc::clone(device) as Arc<dyn RenderDevice>;
        let mut system = MultiDrawSystem::new(dyn_device);
        system.configure(config).unwrap();
        system
            .initialize(SizingHint {
                instances,
                vertices_per_instance: 3,
                indices_per_instance: 3,
            })
            .unwrap();
        system
    }

    fn tri_vertices() -> Vec<u8> {
        // Three 12-byte vertices.
        vec![0u8; 36]
    }

    #[test]
    fn test_configure_twice_rejected() {
        let device: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        let mut system = MultiDrawSystem::new(device);
        system.configure(base_config()).unwrap();
        assert_eq!(
            system.configure(base_config()),
            Err(StreamError::AlreadyConfigured)
        );
    }

    #[test]
    fn test_buffering_range_enforced() {
        let device: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        let mut system = MultiDrawSystem::new(device);
        let mut config = base_config();
        config.buffering = 4;
        assert_eq!(
            system.configure(config),
            Err(StreamError::InvalidBuffering { requested: 4 })
        );
    }

    #[test]
    fn test_lifecycle_order_enforced() {
        let device: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        let mut system = MultiDrawSystem::new(device);
        assert_eq!(
            system.initialize(SizingHint {
                instances: 1,
                vertices_per_instance: 1,
                indices_per_instance: 1,
            }),
            Err(StreamError::NotConfigured)
        );
        system.configure(base_config()).unwrap();
        assert_eq!(
            system.render(&[], &[], 0),
            Err(StreamError::NotInitialized)
        );
    }

    #[test]
    fn test_vertex_stride_mismatch_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 4);
        assert_eq!(
            system.create_instance(None, &[0u8; 35], None, BoundingSphere::default()),
            Err(StreamError::StrideMismatch {
                input: "vertex",
                len: 35,
                stride: 12,
            })
        );
    }

    #[test]
    fn test_index_data_mode_mismatches_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 4);
        assert_eq!(
            system.create_instance(Some(&[0u8; 12]), &tri_vertices(), None, BoundingSphere::default()),
            Err(StreamError::UnexpectedIndexData)
        );

        let mut indexed = base_config();
        indexed.indexed = true;
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, indexed, 4);
        assert_eq!(
            system.create_instance(None, &tri_vertices(), None, BoundingSphere::default()),
            Err(StreamError::MissingIndexData)
        );
    }

    #[test]
    fn test_monotonic_ids_without_slot_streams() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 4);

        let a = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        let b = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        system.delete_instance(a).unwrap();
        let c = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();

        // No per-instance stream tracks slots, so nothing is reused.
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn test_matrix_slot_ids_are_reused() {
        let mut config = base_config();
        config.stream_world_matrices = true;
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, config, 4);

        let ids: Vec<u32> = (0..3)
            .map(|_| {
                system
                    .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
                    .unwrap()
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);

        system.delete_instance(1).unwrap();
        let reused = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        assert_eq!(reused, 1);
        assert_eq!(system.live_instances(), 3);
    }

    #[test]
    fn test_vertex_pool_gap_reuse() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 4);

        let a = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        let _b = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        system.delete_instance(a).unwrap();

        // The freed 36-byte vertex range is reused, so the new record's
        // first-vertex offset matches the deleted one's.
        let c = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        let state = system.state.as_ref().unwrap();
        assert_eq!(state.instances[&c].vertex_range.0, 0);
    }

    #[test]
    fn test_delete_unknown_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 4);
        assert_eq!(
            system.delete_instance(9),
            Err(StreamError::UnknownInstance(9))
        );
    }

    #[test]
    fn test_render_count_exceeding_inputs_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 4);
        let id = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        assert_eq!(
            system.render(&[id], &[0.0], 2),
            Err(StreamError::CountExceedsLen { count: 2, len: 1 })
        );
    }

    #[test]
    fn test_indirect_ring_growth_is_idempotent() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 2);

        let ids: Vec<u32> = (0..4)
            .map(|_| {
                system
                    .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
                    .unwrap()
            })
            .collect();
        let distances = vec![0.0f32; 4];

        // Capacity 2, count 4: doubles to max(4, 2 * 2) = 4.
        system.render(&ids, &distances, 4).unwrap();
        assert_eq!(system.stats().indirect_grows, 1);
        assert_eq!(system.state.as_ref().unwrap().indirect_capacity, 4);

        // Same count again: no further resize.
        system.render(&ids, &distances, 4).unwrap();
        system.render(&ids, &distances, 4).unwrap();
        assert_eq!(system.stats().indirect_grows, 1);
    }

    #[test]
    fn test_matrix_stream_writes_and_rebinds() {
        let mut config = base_config();
        config.stream_world_matrices = true;
        config.strategy = RingStrategy::PerBlock;
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, config, 4);

        let a = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();
        let b = system
            .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
            .unwrap();

        let mut transform = IDENTITY;
        transform[12] = 5.0; // translation x, column-major
        system.set_transform(b, transform).unwrap();

        system.render(&[a, b], &[1.0, 2.0], 2).unwrap();

        let rebinds = device.rebinds();
        assert_eq!(rebinds.len(), 1);
        assert_eq!(rebinds[0].0, WORLD_MATRIX_BINDING);

        // Instance b's matrix sits at id * 64 in the bound allocation.
        let written = device.read_back(rebinds[0].1, u64::from(b) * 64, 64);
        let element = |i: usize| f32::from_le_bytes(written[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(element(12), 5.0);
        assert_eq!(element(0), 1.0);
    }

    #[test]
    fn test_matrix_ring_grows_when_ids_outrun_hint() {
        let mut config = base_config();
        config.stream_world_matrices = true;
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, config, 2);

        for _ in 0..5 {
            system
                .create_instance(None, &tri_vertices(), None, BoundingSphere::default())
                .unwrap();
        }
        assert!(system.stats().matrix_grows >= 1);
        assert!(system.state.as_ref().unwrap().matrix_capacity >= 5);

        // id 4 still gets its matrix written without an error.
        let ids = [0u32, 1, 2, 3, 4];
        let distances = [5.0f32, 4.0, 3.0, 2.0, 1.0];
        system.render(&ids, &distances, 5).unwrap();
    }

    #[test]
    fn test_empty_render_submits_nothing() {
        let device = Arc::new(NullDevice::new());
        let mut system = make_system(&device, base_config(), 2);
        system.render(&[], &[], 0).unwrap();
        assert!(device.submissions().is_empty());
        assert_eq!(system.stats().frames, 1);
        assert_eq!(system.stats().draw_calls, 0);
    }

    #[test]
    fn test_config_from_toml() {
        let config = MultiDrawConfig::from_toml(
            r#"
            indexed = true
            index_kind = "U16"
            stream_world_matrices = true
            buffering = 3
            strategy = "PerBlock"

            [[vertex_schema]]
            name = "position"
            kind = "F32"
            count = 3

            [[vertex_schema]]
            name = "uv"
            kind = "F32"
            count = 2
            "#,
        )
        .unwrap();

        assert!(config.indexed);
        assert_eq!(config.index_kind, IndexKind::U16);
        assert_eq!(config.buffering, 3);
        assert_eq!(config.strategy, RingStrategy::PerBlock);
        assert_eq!(config.vertex_schema.stride(), 20);
        assert!(config.instance_schema.is_none());
    }

    #[test]
    fn test_config_rejects_garbage() {
        assert!(matches!(
            MultiDrawConfig::from_toml("buffering = \"lots\""),
            Err(StreamError::InvalidConfig(_))
        ));
    }
}
