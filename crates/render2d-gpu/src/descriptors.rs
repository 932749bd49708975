//! Descriptor set management.

use ash::vk;

use crate::device::{DeviceRef, GpuDevice};
use crate::error::Result;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Bindings collected so far.
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'a>] {
        &self.bindings
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor pool for allocating descriptor sets.
///
/// Sets are never freed individually; they go away with the pool.
pub struct DescriptorPool {
    device: DeviceRef,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    pub fn new(device: DeviceRef, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&create_info)? };
        Ok(Self { device, pool })
    }

    /// Pool sized for `max_sets` sets of one uniform buffer each.
    pub fn for_uniform_buffers(device: DeviceRef, max_sets: u32) -> Result<Self> {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: max_sets,
        }];
        Self::new(device, max_sets, &sizes)
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one set per layout.
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool) }
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// The set and buffer must come from `device`, and the set must not be in
/// use by a pending command buffer.
pub unsafe fn write_uniform_buffer(
    device: &dyn GpuDevice,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_binding_is_single_descriptor() {
        let builder =
            DescriptorSetLayoutBuilder::new().uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        let bindings = builder.bindings();

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_count, 1);
        assert_eq!(
            bindings[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
    }
}
