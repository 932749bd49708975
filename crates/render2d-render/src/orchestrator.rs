//! Frame orchestration.
//!
//! [`FrameOrchestrator`] owns a ring of [`FrameSlot`]s and turns one call to
//! [`FrameOrchestrator::draw_frame`] into the full per-frame sequence:
//!
//! 1. wait for the slot's fence,
//! 2. write this frame's uniforms to staging memory and copy them to
//!    device-local memory,
//! 3. acquire a swapchain image,
//! 4. record and submit the slot's command buffer,
//! 5. present,
//!
//! and finally advances the ring, whether or not the frame made it to the
//! screen. At most `N` frames are ever in flight.
//!
//! Swapchain image indices and ring indices are independent; the chain may
//! have more images than the ring has slots.

use ash::prelude::VkResult;
use ash::vk;
use glam::Mat4;
use render2d_core::{Color, OrthoBounds, Rect, Transform2d};
use render2d_gpu::error::{GpuError, Result};
use render2d_gpu::{CommandPool, DescriptorPool, DeviceRef, FrameSync, QueueSet};
use tracing::{debug, error, info, trace, warn};

use crate::frame::{FrameSlot, SlotState};
use crate::geometry::GeometryBuffers;
use crate::targets::{FrameTargets, PipelineHandles};
use crate::uniforms::TransformUniforms;

/// Orchestrator configuration.
#[derive(Clone, Debug)]
pub struct FrameConfig {
    /// Ring size. `None` uses the swapchain image count minus one.
    pub frames_in_flight: Option<usize>,
    /// Fence wait limit in nanoseconds. `u64::MAX` waits forever.
    pub fence_timeout_ns: u64,
    /// Color the render pass clears to.
    pub clear_color: Color,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: None,
            fence_timeout_ns: u64::MAX,
            clear_color: Color::WHITE,
        }
    }
}

impl FrameConfig {
    /// Use a fixed ring size.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = Some(frames);
        self
    }

    /// Bound fence waits.
    pub fn with_fence_timeout(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    /// Ring size for a chain of `image_count` images; never zero.
    pub fn ring_size(&self, image_count: u32) -> usize {
        self.frames_in_flight
            .unwrap_or_else(|| (image_count as usize).saturating_sub(1))
            .max(1)
    }
}

/// Why a frame did not reach the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No image could be acquired; nothing was recorded or submitted.
    Acquire(vk::Result),
    /// The swapchain returned an image without a framebuffer.
    InvalidImageIndex(u32),
    /// Command recording failed; nothing was submitted.
    Record(vk::Result),
    /// The queue rejected the submission.
    Submit(vk::Result),
    /// The frame was rendered but could not be presented.
    Present(vk::Result),
}

impl SkipReason {
    /// Whether the swapchain should be rebuilt before the next frame.
    pub fn needs_rebuild(&self) -> bool {
        matches!(
            self,
            Self::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | Self::Present(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | Self::InvalidImageIndex(_)
        )
    }
}

/// Result of one [`FrameOrchestrator::draw_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        slot: usize,
        image_index: u32,
        /// The swapchain still works but no longer matches the surface.
        suboptimal: bool,
    },
    Skipped {
        slot: usize,
        reason: SkipReason,
    },
}

impl FrameOutcome {
    /// Ring slot the frame used.
    pub fn slot(&self) -> usize {
        match *self {
            Self::Presented { slot, .. } | Self::Skipped { slot, .. } => slot,
        }
    }

    /// Whether the frame was presented.
    pub fn is_presented(&self) -> bool {
        matches!(self, Self::Presented { .. })
    }

    /// Whether the caller should rebuild the swapchain.
    pub fn needs_rebuild(&self) -> bool {
        match self {
            Self::Presented { suboptimal, .. } => *suboptimal,
            Self::Skipped { reason, .. } => reason.needs_rebuild(),
        }
    }
}

/// Drives the per-frame upload, draw and present sequence.
pub struct FrameOrchestrator {
    // Drop order: slots and geometry release buffers before the pools go.
    slots: Vec<FrameSlot>,
    geometry: GeometryBuffers,
    descriptor_pool: DescriptorPool,
    command_pool: CommandPool,
    device: DeviceRef,
    queues: QueueSet,
    targets: FrameTargets,
    pipeline: PipelineHandles,
    config: FrameConfig,
    projection: Mat4,
    view: Mat4,
    current: usize,
    frame_count: u64,
    wait_idle_on_drop: bool,
}

impl FrameOrchestrator {
    /// Create every per-frame resource and upload the quad geometry.
    ///
    /// The projection starts as [`OrthoBounds::screen`] of the target extent.
    /// Any failure here is fatal; allocation failures surface as
    /// [`GpuError::NoSuitableMemoryType`] or [`GpuError::AllocationFailed`].
    pub fn new(
        device: DeviceRef,
        command_pool: CommandPool,
        queues: QueueSet,
        targets: FrameTargets,
        pipeline: PipelineHandles,
        config: FrameConfig,
    ) -> Result<Self> {
        targets.validate()?;
        let frames_in_flight = config.ring_size(targets.image_count());

        let descriptor_pool =
            DescriptorPool::for_uniform_buffers(device.clone(), 2 * frames_in_flight as u32)?;

        let geometry = unsafe { GeometryBuffers::quad(device.clone(), &command_pool, queues.graphics)? };

        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot::new(device.clone(), &command_pool, &descriptor_pool, &pipeline))
            .collect::<Result<Vec<_>>>()?;

        let projection = OrthoBounds::screen(targets.extent.width, targets.extent.height).matrix();

        info!(
            "Frame orchestrator ready: {} frames in flight, {} swapchain images, {}x{}",
            frames_in_flight,
            targets.image_count(),
            targets.extent.width,
            targets.extent.height
        );

        Ok(Self {
            slots,
            geometry,
            descriptor_pool,
            command_pool,
            device,
            queues,
            targets,
            pipeline,
            config,
            projection,
            view: Mat4::IDENTITY,
            current: 0,
            frame_count: 0,
            wait_idle_on_drop: true,
        })
    }

    /// Render and present one frame of the unit quad under `transform`,
    /// filled with `color`.
    ///
    /// Acquire, record, submit and present failures skip the frame and are
    /// reported through [`FrameOutcome::Skipped`]. `Err` is reserved for
    /// fatal conditions such as an expired fence wait. The ring index
    /// advances in every case.
    pub fn draw_frame(&mut self, transform: Transform2d, color: Color) -> Result<FrameOutcome> {
        let index = self.current;
        let outcome = self.run_frame(index, transform, color);

        self.current = (index + 1) % self.slots.len();
        self.frame_count += 1;

        outcome
    }

    /// Draw `rect` in screen space.
    pub fn draw_rect(&mut self, rect: Rect, color: Color) -> Result<FrameOutcome> {
        self.draw_frame(Transform2d::from(rect), color)
    }

    fn run_frame(&mut self, index: usize, transform: Transform2d, color: Color) -> Result<FrameOutcome> {
        // Bounds the work in flight to the ring size.
        self.slots[index].sync.wait(self.config.fence_timeout_ns)?;
        let slot = &mut self.slots[index];
        slot.state = SlotState::Idle;
        trace!("Frame {}: slot {} is idle", self.frame_count, index);

        let uniforms = TransformUniforms {
            projection: self.projection,
            view: self.view,
            model: transform.matrix(),
        };
        slot.uniforms.write(&uniforms, color)?;
        if let Err(e) = unsafe { slot.uniforms.upload(&self.command_pool, self.queues.graphics) } {
            warn!("Uniform transfer for slot {} failed, drawing stale data: {}", index, e);
        }

        let image_acquired = slot.image_acquired();
        let acquired = unsafe {
            self.device.acquire_next_image(
                self.targets.swapchain,
                u64::MAX,
                image_acquired,
                vk::Fence::null(),
            )
        };
        let (image_index, acquire_suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("Failed to acquire swapchain image for slot {}: {}", index, e);
                return Ok(FrameOutcome::Skipped {
                    slot: index,
                    reason: SkipReason::Acquire(e),
                });
            }
        };

        let Some(framebuffer) = self.targets.framebuffer(image_index) else {
            warn!(
                "Swapchain returned image {} but only {} framebuffers exist",
                image_index,
                self.targets.image_count()
            );
            // The acquired image is never presented. Only `set_targets` with a
            // framebuffer per image restores the invariant; rebuilding the
            // swapchain (`needs_rebuild`) is what hands the image back.
            self.repair_slot(index)?;
            return Ok(FrameOutcome::Skipped {
                slot: index,
                reason: SkipReason::InvalidImageIndex(image_index),
            });
        };

        self.slots[index].state = SlotState::Recording;
        if let Err(e) = unsafe { self.record(index, framebuffer) } {
            error!("Recording frame in slot {} failed: {}", index, e);
            self.repair_slot(index)?;
            return Ok(FrameOutcome::Skipped {
                slot: index,
                reason: SkipReason::Record(e),
            });
        }

        if let Err(e) = unsafe { self.submit(index) } {
            error!("Frame submission for slot {} failed: {}", index, e);
            self.repair_slot(index)?;
            return Ok(FrameOutcome::Skipped {
                slot: index,
                reason: SkipReason::Submit(e),
            });
        }
        let slot = &mut self.slots[index];
        slot.state = SlotState::Submitted;
        slot.submissions += 1;

        let wait_semaphores = [slot.render_finished()];
        let swapchains = [self.targets.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.device.queue_present(self.queues.present, &present_info) } {
            Ok(present_suboptimal) => {
                trace!("Presented image {} from slot {}", image_index, index);
                Ok(FrameOutcome::Presented {
                    slot: index,
                    image_index,
                    suboptimal: acquire_suboptimal || present_suboptimal,
                })
            }
            Err(e) => {
                warn!("Failed to present image {} from slot {}: {}", image_index, index, e);
                Ok(FrameOutcome::Skipped {
                    slot: index,
                    reason: SkipReason::Present(e),
                })
            }
        }
    }

    /// Record the quad draw into the slot's command buffer.
    unsafe fn record(&self, index: usize, framebuffer: vk::Framebuffer) -> VkResult<()> {
        let device = &*self.device;
        let slot = &self.slots[index];
        let cmd = slot.command_buffer;
        let extent = self.targets.extent;

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::RELEASE_RESOURCES)?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.clear_color.to_array(),
                },
            }];
            let render_area = vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            };
            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.targets.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[flipped_viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.geometry.vertex_buffer()], &[0]);
            device.cmd_bind_index_buffer(
                cmd,
                self.geometry.index_buffer(),
                0,
                self.geometry.index_type(),
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &slot.descriptor_sets(),
                &[],
            );
            device.cmd_draw_indexed(cmd, self.geometry.index_count(), 1, 0, 0, 0);

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)
        }
    }

    /// Reset the slot's fence and hand its command buffer to the graphics queue.
    unsafe fn submit(&self, index: usize) -> VkResult<()> {
        let slot = &self.slots[index];

        let command_buffers = [slot.command_buffer];
        let wait_semaphores = [slot.image_acquired()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished()];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            // The fence stays signaled until the last moment so that an
            // early exit never leaves it unsignaled without pending work.
            self.device.reset_fences(&[slot.fence()])?;
            self.device
                .queue_submit(self.queues.graphics, &[submit_info], slot.fence())
        }
    }

    /// Bring a slot back to a usable state after it acquired an image but
    /// never submitted: its fence may be unsignaled with no work pending and
    /// its image-acquired semaphore is left signaled.
    fn repair_slot(&mut self, index: usize) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        self.slots[index].sync = FrameSync::new(self.device.clone())?;
        self.slots[index].state = SlotState::Idle;
        debug!("Recreated synchronization for slot {}", index);
        Ok(())
    }

    /// Replace the projection used by all subsequent frames.
    pub fn set_projection(&mut self, bounds: OrthoBounds) -> Result<()> {
        bounds
            .validate()
            .map_err(|e| GpuError::InvalidState(e.to_string()))?;
        self.projection = bounds.matrix();
        debug!("Projection set to {:?}", bounds);
        Ok(())
    }

    /// Replace the view matrix used by all subsequent frames.
    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    /// Swap in a rebuilt swapchain.
    ///
    /// Waits for the device to go idle first. The projection is left as is.
    pub fn set_targets(&mut self, targets: FrameTargets) -> Result<()> {
        targets.validate()?;
        unsafe { self.device.device_wait_idle()? };
        debug!(
            "Frame targets replaced: {} images, {}x{}",
            targets.image_count(),
            targets.extent.width,
            targets.extent.height
        );
        self.targets = targets;
        Ok(())
    }

    /// Wait for the GPU to finish and release every resource.
    pub fn shutdown(mut self) -> Result<()> {
        let result = unsafe { self.device.device_wait_idle() };
        self.wait_idle_on_drop = result.is_err();
        result.map_err(GpuError::from)
    }

    /// Ring slot the next frame will use.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Ring size.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frames attempted so far, skipped ones included.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// A ring slot.
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// All ring slots.
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Projection matrix used for the next frame.
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Current targets.
    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    /// Static quad geometry.
    pub fn geometry(&self) -> &GeometryBuffers {
        &self.geometry
    }

    /// Descriptor pool the slot sets come from.
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    /// Configuration in use.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if self.wait_idle_on_drop {
            if let Err(e) = unsafe { self.device.device_wait_idle() } {
                error!("Failed to wait for device idle before teardown: {}", e);
            }
        }
        info!("Frame orchestrator destroyed after {} frames", self.frame_count);
    }
}

/// Full-extent viewport with negative height, so that y grows downward in
/// screen space.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_size_defaults_to_one_less_than_image_count() {
        let config = FrameConfig::default();
        assert_eq!(config.ring_size(3), 2);
        assert_eq!(config.ring_size(4), 3);
    }

    #[test]
    fn ring_size_is_never_zero() {
        assert_eq!(FrameConfig::default().ring_size(1), 1);
        assert_eq!(FrameConfig::default().ring_size(0), 1);
        assert_eq!(FrameConfig::default().with_frames_in_flight(0).ring_size(3), 1);
    }

    #[test]
    fn explicit_ring_size_wins() {
        let config = FrameConfig::default().with_frames_in_flight(2);
        assert_eq!(config.ring_size(5), 2);
    }

    #[test]
    fn default_config_waits_forever_and_clears_white() {
        let config = FrameConfig::default();
        assert_eq!(config.fence_timeout_ns, u64::MAX);
        assert_eq!(config.clear_color, Color::WHITE);
    }

    #[test]
    fn out_of_date_requests_rebuild() {
        let acquire = SkipReason::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let submit = SkipReason::Submit(vk::Result::ERROR_DEVICE_LOST);

        assert!(acquire.needs_rebuild());
        assert!(!submit.needs_rebuild());
        assert!(FrameOutcome::Presented {
            slot: 0,
            image_index: 0,
            suboptimal: true
        }
        .needs_rebuild());
    }

    #[test]
    fn viewport_is_flipped() {
        let viewport = flipped_viewport(vk::Extent2D {
            width: 1024,
            height: 720,
        });
        assert_eq!(viewport.y, 720.0);
        assert_eq!(viewport.height, -720.0);
        assert_eq!(viewport.width, 1024.0);
    }
}
