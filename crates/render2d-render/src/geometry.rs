//! Static quad geometry.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use render2d_gpu::error::Result;
use render2d_gpu::{CommandPool, DeviceRef, StagedBuffer};

/// Vertex of the unit quad.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

impl QuadVertex {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { position: [x, y] }
    }

    /// Vertex buffer binding 0, one vertex per element.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// `layout(location = 0) in vec2`.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 1] {
        [vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        }]
    }
}

/// Corners of the `[0, 1]²` quad, clockwise from the origin in screen space.
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex::new(0.0, 0.0),
    QuadVertex::new(1.0, 0.0),
    QuadVertex::new(1.0, 1.0),
    QuadVertex::new(0.0, 1.0),
];

/// Two triangles covering the quad.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Vertex and index buffers, uploaded once and never resized.
pub struct GeometryBuffers {
    vertices: StagedBuffer,
    indices: StagedBuffer,
    index_count: u32,
}

impl GeometryBuffers {
    /// Create and upload the unit quad.
    ///
    /// # Safety
    /// `queue` must belong to the pool's queue family.
    pub unsafe fn quad(device: DeviceRef, pool: &CommandPool, queue: vk::Queue) -> Result<Self> {
        unsafe { Self::new(device, pool, queue, &QUAD_VERTICES, &QUAD_INDICES) }
    }

    /// Create and upload arbitrary indexed geometry.
    ///
    /// # Safety
    /// `queue` must belong to the pool's queue family.
    pub unsafe fn new(
        device: DeviceRef,
        pool: &CommandPool,
        queue: vk::Queue,
        vertices: &[QuadVertex],
        indices: &[u16],
    ) -> Result<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);

        let mut vertex_buffer = StagedBuffer::new(
            device.clone(),
            vertex_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let mut index_buffer = StagedBuffer::new(
            device,
            index_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        unsafe {
            vertex_buffer.write_and_upload(pool, queue, vertex_bytes)?;
            index_buffer.write_and_upload(pool, queue, index_bytes)?;
        }

        tracing::debug!(
            "Uploaded geometry: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
        })
    }

    /// Device-local vertex buffer.
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.device_local().handle()
    }

    /// Device-local index buffer.
    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.device_local().handle()
    }

    /// Indices are always `u16`.
    pub fn index_type(&self) -> vk::IndexType {
        vk::IndexType::UINT16
    }

    /// Number of indices to draw.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_indices_reference_every_corner() {
        for corner in 0..QUAD_VERTICES.len() as u16 {
            assert!(QUAD_INDICES.contains(&corner));
        }
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
    }

    #[test]
    fn vertex_layout_matches_attribute() {
        let binding = QuadVertex::binding_description();
        let [attribute] = QuadVertex::attribute_descriptions();

        assert_eq!(binding.stride, 8);
        assert_eq!(attribute.format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attribute.binding, binding.binding);
    }
}
