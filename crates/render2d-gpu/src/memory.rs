//! GPU memory management.

use std::ptr::NonNull;

use ash::vk;
use bytemuck::Pod;

use crate::device::DeviceRef;
use crate::error::{GpuError, Result};

/// Pick the first memory type allowed by `type_bits` whose property flags
/// include every flag in `required`.
///
/// The choice depends only on the table and the inputs, so repeated calls
/// always return the same index.
pub fn select_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
}

/// A buffer with its own dedicated device memory.
///
/// Memory requested with `HOST_VISIBLE` is mapped once at construction and
/// stays mapped until the buffer is dropped. Dropping unmaps, destroys the
/// buffer handle and then frees the memory.
pub struct GpuBuffer {
    device: DeviceRef,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type: u32,
    mapped: Option<NonNull<u8>>,
}

// The mapping is owned by this buffer and only written through `&mut self`.
unsafe impl Send for GpuBuffer {}
unsafe impl Sync for GpuBuffer {}

impl GpuBuffer {
    /// Create a buffer of `size` bytes and bind fresh memory to it.
    pub fn new(
        device: DeviceRef,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::InvalidState(
                "buffer size must be non-zero".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info)? };

        // From here on, early returns release whatever was created via Drop.
        let mut this = Self {
            device,
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            memory_type: 0,
            mapped: None,
        };

        let requirements = unsafe { this.device.buffer_memory_requirements(buffer) };
        let memory_type = select_memory_type(
            &this.device.memory_properties(),
            requirements.memory_type_bits,
            properties,
        )
        .ok_or(GpuError::NoSuitableMemoryType {
            type_bits: requirements.memory_type_bits,
            properties,
        })?;
        this.memory_type = memory_type;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        this.memory = unsafe { this.device.allocate_memory(&alloc_info) }
            .map_err(|e| GpuError::AllocationFailed(format!("vkAllocateMemory: {e}")))?;

        unsafe { this.device.bind_buffer_memory(buffer, this.memory, 0) }
            .map_err(|e| GpuError::AllocationFailed(format!("vkBindBufferMemory: {e}")))?;

        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe { this.device.map_memory(this.memory, 0, vk::WHOLE_SIZE) }?;
            this.mapped = Some(NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
                GpuError::AllocationFailed("vkMapMemory returned null".to_string())
            })?);
        }

        tracing::trace!(
            "Created buffer {:?}: {} bytes, memory type {}, mapped: {}",
            buffer,
            size,
            memory_type,
            this.mapped.is_some()
        );

        Ok(this)
    }

    /// Get the raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get the backing memory handle.
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Size requested at construction.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Index of the memory type that backs this buffer.
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type
    }

    /// Get the persistent CPU mapping, if the memory is host-visible.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    /// Whether the buffer is CPU-mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// View the mapped contents.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        self.mapped
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) })
    }

    /// Copy `bytes` into the mapping at `offset`.
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        let ptr = self.mapped.ok_or_else(|| {
            GpuError::InvalidState(format!("buffer {:?} is not host-visible", self.buffer))
        })?;

        let in_bounds = offset
            .checked_add(bytes.len() as vk::DeviceSize)
            .is_some_and(|end| end <= self.size);
        if !in_bounds {
            return Err(GpuError::InvalidState(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                bytes.len(),
                offset,
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Copy a slice of plain data to the start of the mapping.
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn first_acceptable_index_wins() {
        let props = table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(select_memory_type(&props, 0b111, HOST), Some(1));
        assert_eq!(
            select_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn type_bits_exclude_otherwise_matching_types() {
        let props = table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(select_memory_type(&props, 0b100, HOST), Some(2));
        assert_eq!(select_memory_type(&props, 0b001, HOST), None);
    }

    #[test]
    fn required_flags_must_all_be_present() {
        let props = table(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);

        assert_eq!(select_memory_type(&props, 0b1, HOST), None);
        assert_eq!(
            select_memory_type(&props, 0b1, vk::MemoryPropertyFlags::empty()),
            Some(0)
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let props = table(&[HOST, HOST, vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let first = select_memory_type(&props, 0b110, HOST);
        for _ in 0..16 {
            assert_eq!(select_memory_type(&props, 0b110, HOST), first);
        }
        assert_eq!(first, Some(1));
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST;

        assert_eq!(select_memory_type(&props, u32::MAX, HOST), None);
    }
}
