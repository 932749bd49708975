//! Handles the frame orchestrator renders into and draws with.

use ash::vk;
use render2d_gpu::error::{GpuError, Result};
use render2d_gpu::Swapchain;

/// Presentable image chain and the render pass that writes to it.
///
/// These are borrowed handles; whoever built the swapchain owns them.
#[derive(Clone, Debug)]
pub struct FrameTargets {
    pub swapchain: vk::SwapchainKHR,
    pub render_pass: vk::RenderPass,
    /// One framebuffer per swapchain image, indexed by image index
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

impl FrameTargets {
    /// Targets for a swapchain whose framebuffers were created for
    /// `render_pass`.
    pub fn from_swapchain(swapchain: &Swapchain, render_pass: vk::RenderPass) -> Self {
        Self {
            swapchain: swapchain.handle(),
            render_pass,
            framebuffers: swapchain.framebuffers().to_vec(),
            extent: swapchain.extent(),
        }
    }

    /// Number of images in the chain.
    pub fn image_count(&self) -> u32 {
        self.framebuffers.len() as u32
    }

    /// Framebuffer for an acquired image, if the index is in range.
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Reject empty chains and zero-sized extents.
    pub fn validate(&self) -> Result<()> {
        if self.framebuffers.is_empty() {
            return Err(GpuError::InvalidState(
                "frame targets have no framebuffers".to_string(),
            ));
        }
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(GpuError::InvalidState(format!(
                "frame targets have zero extent {}x{}",
                self.extent.width, self.extent.height
            )));
        }
        Ok(())
    }
}

/// Pipeline objects the orchestrator binds every frame.
#[derive(Clone, Copy, Debug)]
pub struct PipelineHandles {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// Set 0: vertex-stage transform uniforms
    pub transform_set_layout: vk::DescriptorSetLayout,
    /// Set 1: fragment-stage color uniform
    pub color_set_layout: vk::DescriptorSetLayout,
}
