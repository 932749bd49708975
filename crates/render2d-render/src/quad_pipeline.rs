//! The fixed pipeline used to draw colored quads.

use ash::vk;
use render2d_gpu::error::Result;
use render2d_gpu::{DescriptorSetLayoutBuilder, GraphicsPipeline, GraphicsPipelineConfig};

use crate::geometry::QuadVertex;
use crate::targets::PipelineHandles;

/// Graphics pipeline plus the two descriptor set layouts it was built with.
pub struct QuadPipeline {
    pipeline: GraphicsPipeline,
    device: ash::Device,
    transform_set_layout: vk::DescriptorSetLayout,
    color_set_layout: vk::DescriptorSetLayout,
}

impl QuadPipeline {
    /// Build the pipeline for subpass 0 of `render_pass`.
    ///
    /// # Safety
    /// Both shader blobs must be valid SPIR-V whose interfaces match
    /// the `render2d-shaders` quad stages.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        vertex_shader: Vec<u32>,
        fragment_shader: Vec<u32>,
    ) -> Result<Self> {
        let transform_set_layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
                .build(device)?
        };
        let color_set_layout = match unsafe {
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, vk::ShaderStageFlags::FRAGMENT)
                .build(device)
        } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(transform_set_layout, None) };
                return Err(e);
            }
        };

        let config = GraphicsPipelineConfig {
            vertex_shader,
            fragment_shader,
            vertex_bindings: vec![QuadVertex::binding_description()],
            vertex_attributes: QuadVertex::attribute_descriptions().to_vec(),
            ..Default::default()
        };

        let pipeline = match unsafe {
            GraphicsPipeline::new(
                device,
                &config,
                render_pass,
                &[transform_set_layout, color_set_layout],
            )
        } {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_set_layout(transform_set_layout, None);
                    device.destroy_descriptor_set_layout(color_set_layout, None);
                }
                return Err(e);
            }
        };

        tracing::info!("Created quad pipeline");

        Ok(Self {
            pipeline,
            device: device.clone(),
            transform_set_layout,
            color_set_layout,
        })
    }

    /// Handles for the frame orchestrator.
    pub fn handles(&self) -> PipelineHandles {
        PipelineHandles {
            pipeline: self.pipeline.handle(),
            layout: self.pipeline.layout(),
            transform_set_layout: self.transform_set_layout,
            color_set_layout: self.color_set_layout,
        }
    }
}

impl Drop for QuadPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(self.transform_set_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.color_set_layout, None);
        }
    }
}
