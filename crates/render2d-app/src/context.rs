//! Application context.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use render2d_core::OrthoBounds;
use render2d_gpu::{load_spirv, CommandPool, GpuContext, RenderPass, Swapchain};
use render2d_render::{FrameConfig, FrameOrchestrator, FrameOutcome, FrameTargets, QuadPipeline};
use tracing::{debug, info};
use winit::window::Window;

use crate::app::Quad;
use crate::runner::AppConfig;

/// Application context shared across all app methods.
///
/// Owns the window, the GPU context and everything built on top of it.
pub struct AppContext {
    // Drop order: everything holding device objects goes before `gpu`, and
    // the swapchain's framebuffers go before the render pass.
    orchestrator: FrameOrchestrator,
    pipeline: QuadPipeline,
    swapchain: Swapchain,
    render_pass: RenderPass,
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    /// The window handle.
    pub window: Arc<Window>,
    /// Time of last frame (for delta time calculation).
    pub(crate) last_frame_time: Instant,
    /// Whether vsync is enabled.
    pub vsync: bool,
    minimized: bool,
    rebuild_pending: bool,
}

impl AppContext {
    /// Create the swapchain, render pass, quad pipeline and orchestrator for
    /// `window`.
    pub(crate) fn new(window: Arc<Window>, gpu: GpuContext, config: &AppConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let mut swapchain = Swapchain::new(&gpu, width, height, config.vsync, None)?;
        let render_pass = RenderPass::for_presentation(gpu.device(), swapchain.format())?;
        swapchain.attach_render_pass(render_pass.handle())?;

        info!(
            "Swapchain created: {}x{} ({} images, {:?})",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count(),
            swapchain.present_mode()
        );

        let vertex_shader = shader_code(
            config.vertex_shader.as_deref(),
            render2d_shaders::quad_vertex_shader(),
        )?;
        let fragment_shader = shader_code(
            config.fragment_shader.as_deref(),
            render2d_shaders::quad_fragment_shader(),
        )?;
        // SAFETY: overrides must match the quad.vert / quad.frag interface
        let pipeline = unsafe {
            QuadPipeline::new(
                gpu.device(),
                render_pass.handle(),
                vertex_shader,
                fragment_shader,
            )?
        };

        let queues = gpu.queues();
        let command_pool = CommandPool::new(gpu.device_ref(), queues.graphics_family)?;

        let mut frame_config = FrameConfig::default();
        if let Some(frames) = config.frames_in_flight {
            frame_config = frame_config.with_frames_in_flight(frames);
        }

        let orchestrator = FrameOrchestrator::new(
            gpu.device_ref(),
            command_pool,
            queues,
            FrameTargets::from_swapchain(&swapchain, render_pass.handle()),
            pipeline.handles(),
            frame_config,
        )?;

        Ok(Self {
            orchestrator,
            pipeline,
            swapchain,
            render_pass,
            gpu,
            window,
            last_frame_time: Instant::now(),
            vsync: config.vsync,
            minimized: size.width == 0 || size.height == 0,
            rebuild_pending: false,
        })
    }

    /// The frame orchestrator.
    pub fn orchestrator(&self) -> &FrameOrchestrator {
        &self.orchestrator
    }

    /// The frame orchestrator, e.g. to change the view matrix.
    pub fn orchestrator_mut(&mut self) -> &mut FrameOrchestrator {
        &mut self.orchestrator
    }

    /// The quad pipeline.
    pub fn pipeline(&self) -> &QuadPipeline {
        &self.pipeline
    }

    /// Current drawable size in pixels.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Frames submitted so far, including skipped ones.
    pub fn frame_count(&self) -> u64 {
        self.orchestrator.frame_count()
    }

    /// Whether the window currently has no drawable area.
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Whether the last frame asked for a swapchain rebuild.
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Draw one frame. Returns `None` while minimized.
    pub(crate) fn draw(&mut self, quad: Quad) -> anyhow::Result<Option<FrameOutcome>> {
        if self.minimized {
            return Ok(None);
        }

        let outcome = self.orchestrator.draw_frame(quad.transform, quad.color)?;
        if outcome.needs_rebuild() {
            debug!("Swapchain rebuild requested: {:?}", outcome);
            self.rebuild_pending = true;
        }
        Ok(Some(outcome))
    }

    /// Follow a window size change.
    ///
    /// Returns `false` if the window is zero-sized and nothing was rebuilt.
    pub(crate) fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<bool> {
        if width == 0 || height == 0 {
            self.minimized = true;
            return Ok(false);
        }
        self.minimized = false;
        self.recreate_swapchain(width, height)?;
        Ok(true)
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.gpu.wait_idle()?;

        let mut swapchain =
            Swapchain::new(&self.gpu, width, height, self.vsync, Some(&self.swapchain))?;
        swapchain.attach_render_pass(self.render_pass.handle())?;

        // The orchestrator must let go of the old framebuffers before the old
        // swapchain is dropped.
        self.orchestrator
            .set_targets(FrameTargets::from_swapchain(&swapchain, self.render_pass.handle()))?;
        let extent = swapchain.extent();
        self.swapchain = swapchain;
        self.orchestrator
            .set_projection(OrthoBounds::screen(extent.width, extent.height))?;
        self.rebuild_pending = false;

        info!(
            "Swapchain recreated: {}x{} ({} images)",
            extent.width,
            extent.height,
            self.swapchain.image_count()
        );
        Ok(())
    }
}

/// SPIR-V from `override_path` when set, otherwise the embedded module.
fn shader_code(override_path: Option<&Path>, embedded: &[u32]) -> render2d_gpu::Result<Vec<u32>> {
    match override_path {
        Some(path) => load_spirv(path),
        None => Ok(embedded.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render2d_gpu::GpuError;

    #[test]
    fn embedded_shaders_are_the_default() {
        let code = shader_code(None, render2d_shaders::quad_vertex_shader()).unwrap();
        assert_eq!(code, render2d_shaders::quad_vertex_shader());
    }

    #[test]
    fn shader_override_is_loaded_from_disk() {
        let err = shader_code(
            Some(Path::new("no/such/dir/quad.frag.spv")),
            render2d_shaders::quad_fragment_shader(),
        )
        .unwrap_err();
        assert!(matches!(err, GpuError::ShaderLoad(_)));
    }
}
