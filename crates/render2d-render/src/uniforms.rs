//! Per-frame uniform data and its staging buffers.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use render2d_core::Color;
use render2d_gpu::error::Result;
use render2d_gpu::{CommandPool, DeviceRef, StagedBuffer};

/// Vertex-stage uniform block: `projection * view * model`.
///
/// Matches the std140 layout of three consecutive column-major `mat4`s.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TransformUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: Mat4,
}

impl TransformUniforms {
    /// Size of the uniform block in bytes.
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;

    /// Full clip-space transform.
    pub fn combined(&self) -> Mat4 {
        self.projection * self.view * self.model
    }
}

impl Default for TransformUniforms {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
        }
    }
}

/// Size of the fragment-stage color block in bytes.
pub const COLOR_UNIFORM_SIZE: vk::DeviceSize = std::mem::size_of::<Color>() as vk::DeviceSize;

/// Staging and device-local buffers for one frame slot's uniforms.
pub struct UniformStagingSet {
    transform: StagedBuffer,
    color: StagedBuffer,
}

impl UniformStagingSet {
    /// Allocate both staged pairs.
    pub fn new(device: DeviceRef) -> Result<Self> {
        let usage = vk::BufferUsageFlags::UNIFORM_BUFFER;
        Ok(Self {
            transform: StagedBuffer::new(device.clone(), TransformUniforms::SIZE, usage)?,
            color: StagedBuffer::new(device, COLOR_UNIFORM_SIZE, usage)?,
        })
    }

    /// Write new values into the staging halves.
    pub fn write(&mut self, transform: &TransformUniforms, color: Color) -> Result<()> {
        self.transform.write(std::slice::from_ref(transform))?;
        self.color.write(&[color])
    }

    /// Copy both staging buffers to their device-local targets.
    ///
    /// The transform copy finishes before the color copy starts; a failure
    /// stops at the first uniform that did not transfer.
    ///
    /// # Safety
    /// `queue` must belong to the pool's queue family.
    pub unsafe fn upload(&self, pool: &CommandPool, queue: vk::Queue) -> Result<()> {
        unsafe {
            self.transform.upload(pool, queue)?;
            self.color.upload(pool, queue)
        }
    }

    /// Staging/device-local pair for the transform block; the vertex shader
    /// reads its `device_local()` half.
    pub fn transform_buffer(&self) -> &StagedBuffer {
        &self.transform
    }

    /// Staging/device-local pair for the color block; the fragment shader
    /// reads its `device_local()` half.
    pub fn color_buffer(&self) -> &StagedBuffer {
        &self.color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;
    use render2d_core::{OrthoBounds, Rect, Transform2d};

    #[test]
    fn uniform_sizes_match_shader_blocks() {
        assert_eq!(TransformUniforms::SIZE, 192);
        assert_eq!(COLOR_UNIFORM_SIZE, 16);
    }

    #[test]
    fn matrices_are_laid_out_in_declaration_order() {
        let uniforms = TransformUniforms {
            projection: Mat4::from_scale(glam::Vec3::splat(2.0)),
            view: Mat4::IDENTITY,
            model: Mat4::from_translation(glam::Vec3::new(5.0, 0.0, 0.0)),
        };
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&uniforms));

        assert_eq!(floats.len(), 48);
        assert_relative_eq!(floats[0], 2.0);
        // model column 3, x component
        assert_relative_eq!(floats[32 + 12], 5.0);
    }

    #[test]
    fn rect_lands_on_expected_clip_coordinates() {
        let uniforms = TransformUniforms {
            projection: OrthoBounds::screen(800, 600).matrix(),
            view: Mat4::IDENTITY,
            model: Transform2d::from(Rect::from_xywh(0.0, 0.0, 400.0, 300.0)).matrix(),
        };
        let far_corner = uniforms.combined() * Vec4::new(1.0, 1.0, 0.0, 1.0);

        assert_relative_eq!(far_corner.x, 0.0);
        assert_relative_eq!(far_corner.y, 0.0);
    }
}
