//! Ring entries of the frame orchestrator.

use ash::vk;
use render2d_gpu::error::Result;
use render2d_gpu::{
    write_uniform_buffer, CommandPool, DescriptorPool, DeviceRef, FrameSync, GpuBuffer, GpuDevice,
};

use crate::targets::PipelineHandles;
use crate::uniforms::UniformStagingSet;

/// Lifecycle of a frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled; the slot's resources may be touched.
    Idle,
    /// The command buffer is being recorded.
    Recording,
    /// Work has been submitted and the fence has not been observed yet.
    Submitted,
}

/// A device-local uniform buffer bound to binding 0 of a descriptor set.
///
/// Written once when the slot is created; the buffer is never replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub buffer: vk::Buffer,
    pub range: vk::DeviceSize,
}

impl DescriptorBinding {
    /// Bind the whole of `buffer` to binding 0 of `set`.
    pub fn whole_buffer(set: vk::DescriptorSet, buffer: &GpuBuffer) -> Self {
        Self {
            set,
            binding: 0,
            buffer: buffer.handle(),
            range: buffer.size(),
        }
    }

    /// Point the descriptor at the buffer.
    ///
    /// # Safety
    /// The set must not be in use by a pending command buffer.
    pub unsafe fn write(&self, device: &dyn GpuDevice) {
        unsafe { write_uniform_buffer(device, self.set, self.binding, self.buffer, 0, self.range) }
    }
}

/// Sync primitives, command buffer and uniforms for one in-flight frame.
pub struct FrameSlot {
    pub(crate) sync: FrameSync,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) uniforms: UniformStagingSet,
    /// `[transform (set 0), color (set 1)]`
    pub(crate) bindings: [DescriptorBinding; 2],
    pub(crate) state: SlotState,
    pub(crate) submissions: u64,
}

impl FrameSlot {
    pub(crate) fn new(
        device: DeviceRef,
        command_pool: &CommandPool,
        descriptor_pool: &DescriptorPool,
        pipeline: &PipelineHandles,
    ) -> Result<Self> {
        let sync = FrameSync::new(device.clone())?;
        let command_buffer = command_pool.allocate_one()?;
        let uniforms = UniformStagingSet::new(device.clone())?;

        let sets = descriptor_pool.allocate(&[
            pipeline.transform_set_layout,
            pipeline.color_set_layout,
        ])?;
        let bindings = [
            DescriptorBinding::whole_buffer(sets[0], uniforms.transform_buffer().device_local()),
            DescriptorBinding::whole_buffer(sets[1], uniforms.color_buffer().device_local()),
        ];
        for binding in &bindings {
            unsafe { binding.write(&*device) };
        }

        Ok(Self {
            sync,
            command_buffer,
            uniforms,
            bindings,
            state: SlotState::Idle,
            submissions: 0,
        })
    }

    /// Fence signaled when this slot's last submission completes.
    pub fn fence(&self) -> vk::Fence {
        self.sync.in_flight
    }

    /// Semaphore signaled by image acquisition.
    pub fn image_acquired(&self) -> vk::Semaphore {
        self.sync.image_acquired
    }

    /// Semaphore signaled when rendering completes.
    pub fn render_finished(&self) -> vk::Semaphore {
        self.sync.render_finished
    }

    /// The slot's primary command buffer.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Descriptor sets for sets 0 and 1.
    pub fn descriptor_sets(&self) -> [vk::DescriptorSet; 2] {
        self.bindings.map(|binding| binding.set)
    }

    /// Buffer-to-set associations for sets 0 and 1.
    pub fn bindings(&self) -> &[DescriptorBinding; 2] {
        &self.bindings
    }

    /// Uniform buffers owned by this slot.
    pub fn uniforms(&self) -> &UniformStagingSet {
        &self.uniforms
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Number of successful submissions from this slot.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}
