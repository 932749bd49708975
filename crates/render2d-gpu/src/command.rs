//! Command buffer management.

use ash::vk;

use crate::device::{DeviceRef, GpuDevice};
use crate::error::{GpuError, Result};

/// Command pool bound to one queue family.
///
/// Buffers are always allocated at the primary level. The pool is destroyed
/// on drop, which implicitly frees every buffer still allocated from it.
pub struct CommandPool {
    device: DeviceRef,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    pub fn new(device: DeviceRef, queue_family: u32) -> Result<Self> {
        Self::with_flags(
            device,
            queue_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Create a pool with explicit creation flags.
    pub fn with_flags(
        device: DeviceRef,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.create_command_pool(&create_info)? };
        tracing::debug!("Created command pool for queue family {}", queue_family);

        Ok(Self {
            device,
            pool,
            queue_family,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get the device this pool allocates from.
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    /// Allocate a single primary command buffer.
    pub fn allocate_one(&self) -> Result<vk::CommandBuffer> {
        self.allocate_many(1)?
            .pop()
            .ok_or(GpuError::PoolExhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    /// Allocate `count` primary command buffers.
    pub fn allocate_many(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(GpuError::PoolExhausted)
    }

    /// Reset the pool, returning every allocated buffer to the initial state.
    ///
    /// # Safety
    /// No command buffer allocated from this pool may be pending on the GPU.
    pub unsafe fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::RELEASE_RESOURCES)?;
        }
        Ok(())
    }

    /// Return a single command buffer to the pool.
    ///
    /// # Safety
    /// The buffer must come from this pool and must not be pending on the GPU.
    pub unsafe fn free(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(self.pool, &[cmd]) }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool) }
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The command buffer must be valid and not pending.
pub unsafe fn begin_command_buffer(
    device: &dyn GpuDevice,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    unsafe { device.begin_command_buffer(cmd, &begin_info)? };
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The command buffer must be in the recording state.
pub unsafe fn end_command_buffer(device: &dyn GpuDevice, cmd: vk::CommandBuffer) -> Result<()> {
    unsafe { device.end_command_buffer(cmd)? };
    Ok(())
}

/// Submit command buffers to a queue.
///
/// A rejected submission is reported as [`GpuError::Submission`].
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &dyn GpuDevice,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    unsafe { device.queue_submit(queue, &[submit_info], fence) }.map_err(GpuError::Submission)
}
