//! The device seam between the renderer and Vulkan.
//!
//! Every GPU call issued by buffers, command pools, transfers and the frame
//! loop goes through [`GpuDevice`]. Method signatures mirror `ash::Device`
//! and `ash::khr::swapchain::Device` so the production implementation,
//! [`VulkanDevice`], is a thin passthrough. Test harnesses provide their own
//! implementation that records calls and simulates memory.

use std::ffi::c_void;
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;

/// Shared handle to a device implementation.
pub type DeviceRef = Arc<dyn GpuDevice>;

/// GPU operations used by the renderer.
///
/// # Safety
/// All methods have the same contract as the Vulkan command they mirror:
/// every handle passed in must have been created from this device and must
/// not be destroyed while the GPU may still reference it.
pub trait GpuDevice: Send + Sync {
    /// Memory types and heaps of the physical device.
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    // Buffers and memory

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer>;
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);
    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>)
        -> VkResult<vk::DeviceMemory>;
    unsafe fn free_memory(&self, memory: vk::DeviceMemory);
    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void>;
    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory);

    // Command pools and buffers

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()>;
    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    unsafe fn reset_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> VkResult<()>;
    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()>;
    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    // Recorded commands

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    );
    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]);
    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]);
    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    // Queues

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()>;
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
    unsafe fn device_wait_idle(&self) -> VkResult<()>;

    // Synchronization

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout: u64)
        -> VkResult<()>;
    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;
    unsafe fn create_semaphore(&self, info: &vk::SemaphoreCreateInfo<'_>)
        -> VkResult<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Descriptors

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool>;
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    unsafe fn update_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>],
    );

    // Presentation

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)>;
    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool>;
}

/// [`GpuDevice`] backed by a real Vulkan logical device.
pub struct VulkanDevice {
    device: Arc<ash::Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Wrap a logical device.
    ///
    /// # Safety
    /// The instance, device and physical device must be valid and must
    /// outlive the returned value.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);

        Self {
            device,
            swapchain_loader,
            memory_properties,
        }
    }

    /// Get the raw `ash` device.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// Get the swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }
}

impl GpuDevice for VulkanDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    unsafe fn allocate_memory(
        &self,
        info: &vk::MemoryAllocateInfo<'_>,
    ) -> VkResult<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        unsafe { self.device.create_command_pool(info, None) }
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        unsafe { self.device.reset_command_pool(pool, flags) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        unsafe { self.device.allocate_command_buffers(info) }
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    unsafe fn reset_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> VkResult<()> {
        unsafe { self.device.reset_command_buffer(cmd, flags) }
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        unsafe { self.device.begin_command_buffer(cmd, info) }
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        unsafe { self.device.cmd_begin_render_pass(cmd, info, contents) }
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]) {
        unsafe { self.device.cmd_set_viewport(cmd, first, viewports) }
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]) {
        unsafe { self.device.cmd_set_scissor(cmd, first, scissors) }
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets)
        }
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type)
        }
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            )
        }
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        unsafe { self.device.queue_submit(queue, submits, fence) }
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(queue) }
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        unsafe { self.device.create_fence(info, None) }
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    unsafe fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(fences, wait_all, timeout) }
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        unsafe { self.device.reset_fences(fences) }
    }

    unsafe fn create_semaphore(
        &self,
        info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore> {
        unsafe { self.device.create_semaphore(info, None) }
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool> {
        unsafe { self.device.create_descriptor_pool(info, None) }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        unsafe { self.device.allocate_descriptor_sets(info) }
    }

    unsafe fn update_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        unsafe { self.device.update_descriptor_sets(writes, copies) }
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, fence)
        }
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        unsafe { self.swapchain_loader.queue_present(queue, info) }
    }
}
