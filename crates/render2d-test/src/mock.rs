//! In-memory [`GpuDevice`] that simulates Vulkan for tests.
//!
//! The mock backs every allocation with host bytes, records commands per
//! command buffer and executes them on submission: copies move bytes
//! between buffers and indexed draws snapshot the uniform data bound to
//! them. Fences and binary semaphores follow Vulkan's signaling rules, and
//! anything a validation layer would complain about is collected as a
//! violation instead of crashing the test.
//!
//! Submitted work completes immediately, unless [`MockDevice::hold_fences`]
//! is enabled to simulate a GPU that never finishes.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use render2d_core::Color;
use render2d_gpu::{DeviceRef, GpuDevice};
use render2d_render::TransformUniforms;

/// Memory type that is `DEVICE_LOCAL` only and cannot be mapped.
pub const DEVICE_LOCAL_TYPE: u32 = 0;
/// Memory type that is `HOST_VISIBLE | HOST_COHERENT`.
pub const HOST_VISIBLE_TYPE: u32 = 1;
/// Memory type that has all three properties.
pub const UNIFIED_TYPE: u32 = 2;

/// Alignment reported for every buffer.
pub const BUFFER_ALIGNMENT: vk::DeviceSize = 16;

/// A command recorded into a mock command buffer.
#[derive(Clone, Debug)]
pub enum Command {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: Option<[f32; 4]>,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    BindVertexBuffers(Vec<vk::Buffer>),
    BindIndexBuffer {
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    },
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
}

/// Frame-level device calls, in the order they were made.
///
/// Submissions and presents are only logged when the mock accepted them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    WaitForFences {
        fences: Vec<vk::Fence>,
        timeout: u64,
    },
    ResetFences(Vec<vk::Fence>),
    AcquireNextImage {
        semaphore: vk::Semaphore,
        /// `None` when the acquire failed
        image_index: Option<u32>,
    },
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        wait_semaphores: Vec<vk::Semaphore>,
        wait_stages: Vec<vk::PipelineStageFlags>,
        signal_semaphores: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    Present {
        image_index: u32,
        wait_semaphores: Vec<vk::Semaphore>,
    },
    QueueWaitIdle,
    DeviceWaitIdle,
}

impl Call {
    /// A submission that signals a fence, as opposed to a transfer.
    pub fn is_frame_submit(&self) -> bool {
        matches!(self, Self::Submit { fence, .. } if *fence != vk::Fence::null())
    }
}

/// Snapshot of an indexed draw taken when its command buffer executed.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub command_buffer: vk::CommandBuffer,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub clear_color: Option<[f32; 4]>,
    pub viewport: Option<vk::Viewport>,
    pub vertex_buffers: Vec<vk::Buffer>,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    /// Bytes behind binding 0 of every bound set, indexed by set number.
    pub uniforms: Vec<Vec<u8>>,
}

impl DrawRecord {
    /// Transform block bound at set 0.
    pub fn transform(&self) -> Option<TransformUniforms> {
        read_pod(self.uniforms.first()?)
    }

    /// Color block bound at set 1.
    pub fn color(&self) -> Option<Color> {
        read_pod(self.uniforms.get(1)?)
    }
}

fn read_pod<T: bytemuck::Pod>(bytes: &[u8]) -> Option<T> {
    let size = std::mem::size_of::<T>();
    (bytes.len() >= size).then(|| bytemuck::pod_read_unaligned(&bytes[..size]))
}

/// Number of live objects of each kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub allocations: usize,
    pub mapped: usize,
    pub command_pools: usize,
    pub command_buffers: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub descriptor_pools: usize,
    pub descriptor_sets: usize,
}

impl LiveObjects {
    /// Whether everything has been released.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted work has not completed yet.
    Pending,
}

/// Zeroed host allocation standing in for device memory.
struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// Only touched under the mock's lock or through a mapping the caller owns.
unsafe impl Send for HostMemory {}

impl HostMemory {
    fn zeroed(len: usize) -> Self {
        let bytes: &mut [u8] = Box::leak(vec![0u8; len].into_boxed_slice());
        Self {
            ptr: NonNull::from(bytes).cast::<u8>(),
            len,
        }
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

struct BufferEntry {
    size: vk::DeviceSize,
    /// Bound memory and offset into it
    binding: Option<(u64, vk::DeviceSize)>,
}

struct MemoryEntry {
    host: HostMemory,
    type_index: u32,
    mapped: bool,
}

struct CommandPoolEntry {
    flags: vk::CommandPoolCreateFlags,
}

struct CommandBufferEntry {
    pool: u64,
    recording: bool,
    commands: Vec<Command>,
}

struct DescriptorPoolEntry {
    max_sets: u32,
    allocated: u32,
}

struct DescriptorSetEntry {
    pool: u64,
    bindings: HashMap<u32, vk::DescriptorBufferInfo>,
}

#[derive(Default)]
struct Failures {
    acquire_at: Option<(u64, vk::Result)>,
    present_at: Option<(u64, vk::Result)>,
    frame_submit_at: Option<(u64, vk::Result)>,
    transfer_submits: bool,
    memory_allocation: bool,
    command_buffer_allocation: bool,
    hold_fences: bool,
    wait_idle: Option<vk::Result>,
    next_image_index: Option<u32>,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    memory_type_bits: u32,
    image_count: u32,
    next_image: u32,

    buffers: HashMap<u64, BufferEntry>,
    memories: HashMap<u64, MemoryEntry>,
    command_pools: HashMap<u64, CommandPoolEntry>,
    command_buffers: HashMap<u64, CommandBufferEntry>,
    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    descriptor_pools: HashMap<u64, DescriptorPoolEntry>,
    descriptor_sets: HashMap<u64, DescriptorSetEntry>,

    acquire_attempts: u64,
    present_attempts: u64,
    frame_submit_attempts: u64,

    failures: Failures,
    calls: Vec<Call>,
    draws: Vec<DrawRecord>,
    violations: Vec<String>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn violation(&mut self, message: String) {
        tracing::debug!("Mock device violation: {}", message);
        self.violations.push(message);
    }

    fn consume_semaphore(&mut self, semaphore: vk::Semaphore, context: &str) {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self.violation(format!(
                "{context} waits on unsignaled semaphore {semaphore:?}"
            )),
            None => self.violation(format!("{context} waits on unknown semaphore {semaphore:?}")),
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, context: &str) {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if !*signaled => *signaled = true,
            Some(_) => self.violation(format!(
                "{context} signals already signaled semaphore {semaphore:?}"
            )),
            None => self.violation(format!("{context} signals unknown semaphore {semaphore:?}")),
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        match self.command_buffers.get_mut(&cmd.as_raw()) {
            Some(entry) if entry.recording => entry.commands.push(command),
            Some(_) => self.violation(format!("{command:?} recorded outside begin/end on {cmd:?}")),
            None => self.violation(format!("{command:?} recorded on unknown {cmd:?}")),
        }
    }

    fn buffer_bytes(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
    ) -> Option<Vec<u8>> {
        let entry = self.buffers.get(&buffer.as_raw())?;
        let (memory, memory_offset) = entry.binding?;
        let len = if len == vk::WHOLE_SIZE {
            entry.size.checked_sub(offset)?
        } else {
            len
        };
        if offset.checked_add(len)? > entry.size {
            return None;
        }
        let start = (memory_offset + offset) as usize;
        let bytes = self.memories.get(&memory)?.host.bytes();
        bytes.get(start..start + len as usize).map(<[u8]>::to_vec)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> bool {
        let Some(entry) = self.buffers.get(&buffer.as_raw()) else {
            return false;
        };
        let Some((memory, memory_offset)) = entry.binding else {
            return false;
        };
        if offset + data.len() as vk::DeviceSize > entry.size {
            return false;
        }
        let start = (memory_offset + offset) as usize;
        let Some(memory) = self.memories.get_mut(&memory) else {
            return false;
        };
        match memory.host.bytes_mut().get_mut(start..start + data.len()) {
            Some(target) => {
                target.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn copy(&mut self, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        let copied = self
            .buffer_bytes(src, region.src_offset, region.size)
            .is_some_and(|data| self.write_buffer(dst, region.dst_offset, &data));
        if !copied {
            self.violation(format!("invalid copy {region:?} from {src:?} to {dst:?}"));
        }
    }

    fn descriptor_bytes(&self, set: vk::DescriptorSet) -> Vec<u8> {
        self.descriptor_sets
            .get(&set.as_raw())
            .and_then(|entry| entry.bindings.get(&0))
            .and_then(|info| self.buffer_bytes(info.buffer, info.offset, info.range))
            .unwrap_or_default()
    }

    fn execute(&mut self, cmd: vk::CommandBuffer) {
        let Some(commands) = self
            .command_buffers
            .get(&cmd.as_raw())
            .map(|entry| entry.commands.clone())
        else {
            self.violation(format!("submitted unknown {cmd:?}"));
            return;
        };

        let mut render_pass = vk::RenderPass::null();
        let mut framebuffer = vk::Framebuffer::null();
        let mut clear_color = None;
        let mut pipeline = vk::Pipeline::null();
        let mut viewport = None;
        let mut vertex_buffers = Vec::new();
        let mut index_buffer = vk::Buffer::null();
        let mut bound_sets: Vec<vk::DescriptorSet> = Vec::new();

        for command in commands {
            match command {
                Command::CopyBuffer { src, dst, regions } => {
                    for region in regions {
                        self.copy(src, dst, region);
                    }
                }
                Command::BeginRenderPass {
                    render_pass: pass,
                    framebuffer: target,
                    clear_color: clear,
                    ..
                } => {
                    render_pass = pass;
                    framebuffer = target;
                    clear_color = clear;
                }
                Command::BindPipeline(bound) => pipeline = bound,
                Command::SetViewport(bound) => viewport = Some(bound),
                Command::BindVertexBuffers(buffers) => vertex_buffers = buffers,
                Command::BindIndexBuffer { buffer, .. } => index_buffer = buffer,
                Command::BindDescriptorSets {
                    first_set, sets, ..
                } => {
                    let first = first_set as usize;
                    if bound_sets.len() < first + sets.len() {
                        bound_sets.resize(first + sets.len(), vk::DescriptorSet::null());
                    }
                    bound_sets[first..first + sets.len()].copy_from_slice(&sets);
                }
                Command::DrawIndexed { index_count, .. } => {
                    if framebuffer == vk::Framebuffer::null() {
                        self.violation(format!("draw outside a render pass on {cmd:?}"));
                    }
                    let uniforms = bound_sets
                        .iter()
                        .map(|&set| self.descriptor_bytes(set))
                        .collect();
                    self.draws.push(DrawRecord {
                        command_buffer: cmd,
                        render_pass,
                        framebuffer,
                        pipeline,
                        clear_color,
                        viewport,
                        vertex_buffers: vertex_buffers.clone(),
                        index_buffer,
                        index_count,
                        uniforms,
                    });
                }
                Command::EndRenderPass => framebuffer = vk::Framebuffer::null(),
                Command::SetScissor(_) => {}
            }
        }
    }

    fn complete_pending(&mut self) {
        if self.failures.hold_fences {
            return;
        }
        for state in self.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
    }
}

/// Reads `len` elements behind a Vulkan array pointer.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }
}

/// Simulated device. See the module documentation.
pub struct MockDevice {
    state: Mutex<MockState>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl MockDevice {
    /// Mock with a three-image swapchain.
    pub fn new() -> Arc<Self> {
        Self::with_image_count(3)
    }

    /// Mock whose swapchain hands out `image_count` images round robin.
    pub fn with_image_count(image_count: u32) -> Arc<Self> {
        let state = MockState {
            next_handle: 0x1000,
            memory_type_bits: 0b111,
            image_count: image_count.max(1),
            ..Default::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
            memory_properties: memory_table(),
        })
    }

    /// This mock as a renderer device handle.
    pub fn device_ref(self: &Arc<Self>) -> DeviceRef {
        self.clone()
    }

    /// Fresh non-null handle of any type.
    pub fn fake_handle<H: Handle>(&self) -> H {
        H::from_raw(self.state.lock().handle())
    }

    /// Swapchain image count.
    pub fn image_count(&self) -> u32 {
        self.state.lock().image_count
    }

    // Configuration

    /// Memory types every buffer reports as acceptable.
    pub fn set_memory_type_bits(&self, bits: u32) {
        self.state.lock().memory_type_bits = bits;
    }

    /// Fail the `n`th image acquisition (1-based) with `result`.
    pub fn fail_acquire_at(&self, n: u64, result: vk::Result) {
        self.state.lock().failures.acquire_at = Some((n, result));
    }

    /// Fail the `n`th present (1-based) with `result`.
    pub fn fail_present_at(&self, n: u64, result: vk::Result) {
        self.state.lock().failures.present_at = Some((n, result));
    }

    /// Fail the `n`th fenced submission (1-based) with `result`.
    pub fn fail_frame_submit_at(&self, n: u64, result: vk::Result) {
        self.state.lock().failures.frame_submit_at = Some((n, result));
    }

    /// Reject every submission without a fence.
    pub fn fail_transfer_submits(&self, fail: bool) {
        self.state.lock().failures.transfer_submits = fail;
    }

    /// Reject memory allocations.
    pub fn fail_memory_allocation(&self, fail: bool) {
        self.state.lock().failures.memory_allocation = fail;
    }

    /// Reject command buffer allocations.
    pub fn fail_command_buffer_allocation(&self, fail: bool) {
        self.state.lock().failures.command_buffer_allocation = fail;
    }

    /// Make `device_wait_idle` return `result` without completing any work.
    /// `None` restores normal behaviour.
    pub fn fail_wait_idle(&self, result: Option<vk::Result>) {
        self.state.lock().failures.wait_idle = result;
    }

    /// Leave fenced work pending, as if the GPU had stalled. Releasing the
    /// hold completes everything still pending.
    pub fn hold_fences(&self, hold: bool) {
        let mut state = self.state.lock();
        state.failures.hold_fences = hold;
        if !hold {
            state.complete_pending();
        }
    }

    /// Return `index` from the next successful acquisition.
    pub fn set_next_image_index(&self, index: u32) {
        self.state.lock().failures.next_image_index = Some(index);
    }

    // Inspection

    /// Frame-level calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Accepted submissions that signal a fence.
    pub fn frame_submits(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(Call::is_frame_submit)
            .collect()
    }

    /// Accepted presents.
    pub fn presents(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Present { .. }))
            .collect()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Draws executed so far.
    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.lock().draws.clone()
    }

    /// Misuse detected so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Current live object counts.
    pub fn live_objects(&self) -> LiveObjects {
        let state = self.state.lock();
        LiveObjects {
            buffers: state.buffers.len(),
            allocations: state.memories.len(),
            mapped: state.memories.values().filter(|m| m.mapped).count(),
            command_pools: state.command_pools.len(),
            command_buffers: state.command_buffers.len(),
            fences: state.fences.len(),
            semaphores: state.semaphores.len(),
            descriptor_pools: state.descriptor_pools.len(),
            descriptor_sets: state.descriptor_sets.len(),
        }
    }

    /// Contents of a buffer, or `None` if it has no memory bound.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().buffer_bytes(buffer, 0, vk::WHOLE_SIZE)
    }

    /// Memory type index backing a buffer.
    pub fn buffer_memory_type(&self, buffer: vk::Buffer) -> Option<u32> {
        let state = self.state.lock();
        let (memory, _) = state.buffers.get(&buffer.as_raw())?.binding?;
        state.memories.get(&memory).map(|m| m.type_index)
    }

    /// Commands currently recorded in a command buffer.
    pub fn recorded_commands(&self, cmd: vk::CommandBuffer) -> Vec<Command> {
        self.state
            .lock()
            .command_buffers
            .get(&cmd.as_raw())
            .map(|entry| entry.commands.clone())
            .unwrap_or_default()
    }

    /// Whether a fence is signaled.
    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fences.get(&fence.as_raw()) == Some(&FenceState::Signaled)
    }

    /// Whether a semaphore is signaled.
    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state.lock().semaphores.get(&semaphore.as_raw()) == Some(&true)
    }
}

fn memory_table() -> vk::PhysicalDeviceMemoryProperties {
    use vk::MemoryPropertyFlags as F;

    let mut properties = vk::PhysicalDeviceMemoryProperties::default();
    let types = [
        (F::DEVICE_LOCAL, 0),
        (F::HOST_VISIBLE | F::HOST_COHERENT, 1),
        (F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT, 0),
    ];
    for (i, (property_flags, heap_index)) in types.into_iter().enumerate() {
        properties.memory_types[i] = vk::MemoryType {
            property_flags,
            heap_index,
        };
    }
    properties.memory_type_count = types.len() as u32;

    properties.memory_heaps[0] = vk::MemoryHeap {
        size: 256 << 20,
        flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
    };
    properties.memory_heaps[1] = vk::MemoryHeap {
        size: 256 << 20,
        flags: vk::MemoryHeapFlags::empty(),
    };
    properties.memory_heap_count = 2;

    properties
}

impl GpuDevice for MockDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let mut state = self.state.lock();
        if info.size == 0 {
            state.violation("buffer created with size 0".to_string());
        }
        let handle = state.handle();
        state.buffers.insert(
            handle,
            BufferEntry {
                size: info.size,
                binding: None,
            },
        );
        Ok(vk::Buffer::from_raw(handle))
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        if buffer == vk::Buffer::null() {
            return;
        }
        let mut state = self.state.lock();
        if state.buffers.remove(&buffer.as_raw()).is_none() {
            state.violation(format!("destroy of unknown {buffer:?}"));
        }
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let mut state = self.state.lock();
        let Some(size) = state.buffers.get(&buffer.as_raw()).map(|b| b.size) else {
            state.violation(format!("memory requirements of unknown {buffer:?}"));
            return vk::MemoryRequirements::default();
        };
        vk::MemoryRequirements {
            size: size.next_multiple_of(BUFFER_ALIGNMENT),
            alignment: BUFFER_ALIGNMENT,
            memory_type_bits: state.memory_type_bits,
        }
    }

    unsafe fn allocate_memory(
        &self,
        info: &vk::MemoryAllocateInfo<'_>,
    ) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state.lock();
        if state.failures.memory_allocation {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        if info.memory_type_index >= self.memory_properties.memory_type_count {
            state.violation(format!(
                "allocation from nonexistent memory type {}",
                info.memory_type_index
            ));
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let handle = state.handle();
        state.memories.insert(
            handle,
            MemoryEntry {
                host: HostMemory::zeroed(info.allocation_size as usize),
                type_index: info.memory_type_index,
                mapped: false,
            },
        );
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        if memory == vk::DeviceMemory::null() {
            return;
        }
        let mut state = self.state.lock();
        let raw = memory.as_raw();
        if state.memories.remove(&raw).is_none() {
            state.violation(format!("free of unknown {memory:?}"));
            return;
        }
        let still_bound = state
            .buffers
            .values()
            .any(|buffer| buffer.binding.is_some_and(|(bound, _)| bound == raw));
        if still_bound {
            state.violation(format!("{memory:?} freed while a buffer is still bound to it"));
        }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        let Some(capacity) = state.memories.get(&memory.as_raw()).map(|m| m.host.len) else {
            state.violation(format!("bind of unknown {memory:?}"));
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let Some(entry) = state.buffers.get_mut(&buffer.as_raw()) else {
            state.violation(format!("bind of unknown {buffer:?}"));
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        if entry.binding.is_some() {
            state.violation(format!("{buffer:?} bound twice"));
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        if offset + entry.size > capacity as vk::DeviceSize {
            state.violation(format!("{buffer:?} does not fit in {memory:?}"));
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        entry.binding = Some((memory.as_raw(), offset));
        Ok(())
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        let mut state = self.state.lock();
        let host_visible = |type_index: u32| {
            self.memory_properties.memory_types[type_index as usize]
                .property_flags
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        };
        let Some(entry) = state.memories.get_mut(&memory.as_raw()) else {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        if !host_visible(entry.type_index) || entry.mapped {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        if offset as usize > entry.host.len {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        entry.mapped = true;
        let ptr = unsafe { entry.host.ptr.as_ptr().add(offset as usize) };
        Ok(ptr.cast::<c_void>())
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        match state.memories.get_mut(&memory.as_raw()) {
            Some(entry) if entry.mapped => entry.mapped = false,
            _ => state.violation(format!("unmap of unmapped {memory:?}")),
        }
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        let mut state = self.state.lock();
        let handle = state.handle();
        state
            .command_pools
            .insert(handle, CommandPoolEntry { flags: info.flags });
        Ok(vk::CommandPool::from_raw(handle))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        if pool == vk::CommandPool::null() {
            return;
        }
        let mut state = self.state.lock();
        let raw = pool.as_raw();
        if state.command_pools.remove(&raw).is_none() {
            state.violation(format!("destroy of unknown {pool:?}"));
        }
        state.command_buffers.retain(|_, cmd| cmd.pool != raw);
    }

    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        _flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        let raw = pool.as_raw();
        if !state.command_pools.contains_key(&raw) {
            state.violation(format!("reset of unknown {pool:?}"));
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        for cmd in state.command_buffers.values_mut().filter(|c| c.pool == raw) {
            cmd.commands.clear();
            cmd.recording = false;
        }
        Ok(())
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        if state.failures.command_buffer_allocation {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let pool = info.command_pool.as_raw();
        if !state.command_pools.contains_key(&pool) {
            state.violation(format!("allocation from unknown {:?}", info.command_pool));
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let buffers = (0..info.command_buffer_count)
            .map(|_| {
                let handle = state.handle();
                state.command_buffers.insert(
                    handle,
                    CommandBufferEntry {
                        pool,
                        recording: false,
                        commands: Vec::new(),
                    },
                );
                vk::CommandBuffer::from_raw(handle)
            })
            .collect();
        Ok(buffers)
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for &cmd in buffers {
            if cmd == vk::CommandBuffer::null() {
                continue;
            }
            match state.command_buffers.remove(&cmd.as_raw()) {
                Some(entry) if entry.pool == pool.as_raw() => {}
                Some(_) => state.violation(format!("{cmd:?} freed to the wrong pool")),
                None => state.violation(format!("free of unknown {cmd:?}")),
            }
        }
    }

    unsafe fn reset_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferResetFlags,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        let Some(pool) = state.command_buffers.get(&cmd.as_raw()).map(|c| c.pool) else {
            state.violation(format!("reset of unknown {cmd:?}"));
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let resettable = state.command_pools.get(&pool).is_some_and(|p| {
            p.flags
                .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        });
        if !resettable {
            state.violation(format!("{cmd:?} reset but its pool lacks RESET_COMMAND_BUFFER"));
        }
        if let Some(entry) = state.command_buffers.get_mut(&cmd.as_raw()) {
            entry.commands.clear();
            entry.recording = false;
        }
        Ok(())
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&cmd.as_raw()) {
            Some(entry) if !entry.recording => {
                entry.commands.clear();
                entry.recording = true;
                Ok(())
            }
            Some(_) => {
                state.violation(format!("begin on {cmd:?} while recording"));
                Err(vk::Result::ERROR_UNKNOWN)
            }
            None => {
                state.violation(format!("begin on unknown {cmd:?}"));
                Err(vk::Result::ERROR_UNKNOWN)
            }
        }
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&cmd.as_raw()) {
            Some(entry) if entry.recording => {
                entry.recording = false;
                Ok(())
            }
            _ => {
                state.violation(format!("end on {cmd:?} without begin"));
                Err(vk::Result::ERROR_UNKNOWN)
            }
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state.lock().record(
            cmd,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        let clear_values = unsafe { raw_slice(info.p_clear_values, info.clear_value_count) };
        let clear_color = clear_values
            .first()
            .map(|value| unsafe { value.color.float32 });
        self.state.lock().record(
            cmd,
            Command::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                extent: info.render_area.extent,
                clear_color,
            },
        );
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.lock().record(cmd, Command::EndRenderPass);
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.state.lock().record(cmd, Command::BindPipeline(pipeline));
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _first: u32, viewports: &[vk::Viewport]) {
        let mut state = self.state.lock();
        for &viewport in viewports {
            state.record(cmd, Command::SetViewport(viewport));
        }
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _first: u32, scissors: &[vk::Rect2D]) {
        let mut state = self.state.lock();
        for &scissor in scissors {
            state.record(cmd, Command::SetScissor(scissor));
        }
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.state
            .lock()
            .record(cmd, Command::BindVertexBuffers(buffers.to_vec()));
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.state
            .lock()
            .record(cmd, Command::BindIndexBuffer { buffer, index_type });
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        _dynamic_offsets: &[u32],
    ) {
        self.state.lock().record(
            cmd,
            Command::BindDescriptorSets {
                layout,
                first_set,
                sets: sets.to_vec(),
            },
        );
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.state.lock().record(
            cmd,
            Command::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    unsafe fn queue_submit(
        &self,
        _queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state.lock();

        if fence == vk::Fence::null() {
            if state.failures.transfer_submits {
                return Err(vk::Result::ERROR_DEVICE_LOST);
            }
        } else {
            state.frame_submit_attempts += 1;
            let planned = state.failures.frame_submit_at;
            if let Some((n, result)) = planned {
                if n == state.frame_submit_attempts {
                    return Err(result);
                }
            }
            match state.fences.get(&fence.as_raw()).copied() {
                Some(FenceState::Unsignaled) => {}
                Some(other) => state.violation(format!("submit with {other:?} {fence:?}")),
                None => state.violation(format!("submit with unknown {fence:?}")),
            }
        }

        for submit in submits {
            let wait_semaphores =
                unsafe { raw_slice(submit.p_wait_semaphores, submit.wait_semaphore_count) }.to_vec();
            let wait_stages =
                unsafe { raw_slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count) }
                    .to_vec();
            let command_buffers =
                unsafe { raw_slice(submit.p_command_buffers, submit.command_buffer_count) }.to_vec();
            let signal_semaphores =
                unsafe { raw_slice(submit.p_signal_semaphores, submit.signal_semaphore_count) }
                    .to_vec();

            for &semaphore in &wait_semaphores {
                state.consume_semaphore(semaphore, "submit");
            }
            for &cmd in &command_buffers {
                if state
                    .command_buffers
                    .get(&cmd.as_raw())
                    .is_some_and(|entry| entry.recording)
                {
                    state.violation(format!("submitted {cmd:?} is still recording"));
                }
                state.execute(cmd);
            }
            for &semaphore in &signal_semaphores {
                state.signal_semaphore(semaphore, "submit");
            }

            state.calls.push(Call::Submit {
                command_buffers,
                wait_semaphores,
                wait_stages,
                signal_semaphores,
                fence,
            });
        }

        if fence != vk::Fence::null() {
            let completed = if state.failures.hold_fences {
                FenceState::Pending
            } else {
                FenceState::Signaled
            };
            if let Some(fence_state) = state.fences.get_mut(&fence.as_raw()) {
                *fence_state = completed;
            }
        }
        Ok(())
    }

    unsafe fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        let mut state = self.state.lock();
        state.complete_pending();
        state.calls.push(Call::QueueWaitIdle);
        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::DeviceWaitIdle);
        if let Some(err) = state.failures.wait_idle {
            return Err(err);
        }
        state.complete_pending();
        Ok(())
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let handle = state.handle();
        let initial = if info.flags.contains(vk::FenceCreateFlags::SIGNALED) {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(handle, initial);
        Ok(vk::Fence::from_raw(handle))
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        if fence == vk::Fence::null() {
            return;
        }
        let mut state = self.state.lock();
        match state.fences.remove(&fence.as_raw()) {
            Some(FenceState::Pending) => {
                state.violation(format!("{fence:?} destroyed with work pending"));
            }
            Some(_) => {}
            None => state.violation(format!("destroy of unknown {fence:?}")),
        }
    }

    unsafe fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitForFences {
            fences: fences.to_vec(),
            timeout,
        });

        let states: Vec<_> = fences
            .iter()
            .map(|fence| state.fences.get(&fence.as_raw()).copied())
            .collect();

        let signaled = |s: &Option<FenceState>| *s == Some(FenceState::Signaled);
        let done = if wait_all {
            states.iter().all(signaled)
        } else {
            states.iter().any(signaled)
        };
        if done {
            return Ok(());
        }

        for (fence, fence_state) in fences.iter().zip(&states) {
            match fence_state {
                Some(FenceState::Unsignaled) => {
                    state.violation(format!("wait on {fence:?} that no submission will signal"));
                }
                None => state.violation(format!("wait on unknown {fence:?}")),
                _ => {}
            }
        }
        Err(vk::Result::TIMEOUT)
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ResetFences(fences.to_vec()));
        for fence in fences {
            match state.fences.get_mut(&fence.as_raw()) {
                Some(FenceState::Pending) => {
                    state.violation(format!("reset of {fence:?} with work pending"));
                }
                Some(fence_state) => *fence_state = FenceState::Unsignaled,
                None => state.violation(format!("reset of unknown {fence:?}")),
            }
        }
        Ok(())
    }

    unsafe fn create_semaphore(
        &self,
        _info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let handle = state.handle();
        state.semaphores.insert(handle, false);
        Ok(vk::Semaphore::from_raw(handle))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        if semaphore == vk::Semaphore::null() {
            return;
        }
        let mut state = self.state.lock();
        if state.semaphores.remove(&semaphore.as_raw()).is_none() {
            state.violation(format!("destroy of unknown {semaphore:?}"));
        }
    }

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let handle = state.handle();
        state.descriptor_pools.insert(
            handle,
            DescriptorPoolEntry {
                max_sets: info.max_sets,
                allocated: 0,
            },
        );
        Ok(vk::DescriptorPool::from_raw(handle))
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        if pool == vk::DescriptorPool::null() {
            return;
        }
        let mut state = self.state.lock();
        let raw = pool.as_raw();
        if state.descriptor_pools.remove(&raw).is_none() {
            state.violation(format!("destroy of unknown {pool:?}"));
        }
        state.descriptor_sets.retain(|_, set| set.pool != raw);
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        let pool = info.descriptor_pool.as_raw();
        let count = info.descriptor_set_count;
        match state.descriptor_pools.get_mut(&pool) {
            Some(entry) if entry.allocated + count <= entry.max_sets => entry.allocated += count,
            Some(_) => return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            None => {
                state.violation(format!("allocation from unknown {:?}", info.descriptor_pool));
                return Err(vk::Result::ERROR_UNKNOWN);
            }
        }
        let sets = (0..count)
            .map(|_| {
                let handle = state.handle();
                state.descriptor_sets.insert(
                    handle,
                    DescriptorSetEntry {
                        pool,
                        bindings: HashMap::new(),
                    },
                );
                vk::DescriptorSet::from_raw(handle)
            })
            .collect();
        Ok(sets)
    }

    unsafe fn update_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
        _copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        let mut state = self.state.lock();
        for write in writes {
            let infos = unsafe { raw_slice(write.p_buffer_info, write.descriptor_count) };
            let Some(set) = state.descriptor_sets.get_mut(&write.dst_set.as_raw()) else {
                state.violation(format!("write to unknown {:?}", write.dst_set));
                continue;
            };
            for (i, info) in infos.iter().enumerate() {
                set.bindings.insert(write.dst_binding + i as u32, *info);
            }
        }
    }

    unsafe fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
        _fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        state.acquire_attempts += 1;

        let planned = state.failures.acquire_at;
        if let Some((n, result)) = planned {
            if n == state.acquire_attempts {
                state.calls.push(Call::AcquireNextImage {
                    semaphore,
                    image_index: None,
                });
                return Err(result);
            }
        }

        state.signal_semaphore(semaphore, "acquire");
        let image_index = match state.failures.next_image_index.take() {
            Some(index) => index,
            None => {
                let index = state.next_image % state.image_count;
                state.next_image += 1;
                index
            }
        };
        state.calls.push(Call::AcquireNextImage {
            semaphore,
            image_index: Some(image_index),
        });
        Ok((image_index, false))
    }

    unsafe fn queue_present(
        &self,
        _queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.present_attempts += 1;

        // Present waits execute even when presentation itself fails.
        let wait_semaphores =
            unsafe { raw_slice(info.p_wait_semaphores, info.wait_semaphore_count) }.to_vec();
        for &semaphore in &wait_semaphores {
            state.consume_semaphore(semaphore, "present");
        }

        let planned = state.failures.present_at;
        if let Some((n, result)) = planned {
            if n == state.present_attempts {
                return Err(result);
            }
        }

        let image_indices = unsafe { raw_slice(info.p_image_indices, info.swapchain_count) };
        for &image_index in image_indices {
            state.calls.push(Call::Present {
                image_index,
                wait_semaphores: wait_semaphores.clone(),
            });
        }
        Ok(false)
    }
}
