//! Host to device transfers.
//!
//! Every transfer allocates a throwaway command buffer, records one copy,
//! submits it without semaphores and then blocks on a full device-idle wait
//! before the command buffer goes back to the pool. The cost of a call is
//! therefore "wait for everything the GPU is doing", which is acceptable for
//! small uniform and geometry uploads only.

use ash::vk;
use bytemuck::Pod;

use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers, CommandPool};
use crate::device::{DeviceRef, GpuDevice};
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;

/// Copy `region` from `src` into `dst` and wait until the copy has landed.
///
/// # Safety
/// `queue` must belong to the pool's queue family, and both buffers must
/// come from the pool's device.
pub unsafe fn copy_buffer(
    pool: &CommandPool,
    queue: vk::Queue,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    region: vk::BufferCopy,
) -> Result<()> {
    check_region(src.size(), dst.size(), &region)?;

    let device = &**pool.device();
    let cmd = pool.allocate_one()?;

    let submitted =
        unsafe { record_and_submit(device, queue, cmd, src.handle(), dst.handle(), region) };
    let never_submitted = submitted.is_err();
    let result =
        submitted.and_then(|()| unsafe { device.device_wait_idle() }.map_err(GpuError::from));

    // After a failed idle wait the copy may still be pending; the buffer is
    // then left to the pool's teardown.
    if never_submitted || result.is_ok() {
        unsafe { pool.free(cmd) };
    }

    if let Err(e) = &result {
        tracing::debug!(
            "Transfer of {} bytes {:?} -> {:?} failed: {}",
            region.size,
            src.handle(),
            dst.handle(),
            e
        );
    }
    result
}

/// Copy the first `size` bytes of `src` to the start of `dst`.
///
/// # Safety
/// Same as [`copy_buffer`].
pub unsafe fn copy_whole(
    pool: &CommandPool,
    queue: vk::Queue,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    unsafe { copy_buffer(pool, queue, src, dst, region) }
}

unsafe fn record_and_submit(
    device: &dyn GpuDevice,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    region: vk::BufferCopy,
) -> Result<()> {
    unsafe {
        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
        end_command_buffer(device, cmd)?;

        submit_command_buffers(device, queue, &[cmd], &[], &[], &[], vk::Fence::null())
    }
}

fn check_region(
    src_size: vk::DeviceSize,
    dst_size: vk::DeviceSize,
    region: &vk::BufferCopy,
) -> Result<()> {
    let fits = |offset: vk::DeviceSize, limit: vk::DeviceSize| {
        offset
            .checked_add(region.size)
            .is_some_and(|end| end <= limit)
    };

    if region.size == 0 {
        return Err(GpuError::InvalidState("empty copy region".to_string()));
    }
    if !fits(region.src_offset, src_size) || !fits(region.dst_offset, dst_size) {
        return Err(GpuError::InvalidState(format!(
            "copy region {region:?} out of bounds (src {src_size} bytes, dst {dst_size} bytes)"
        )));
    }
    Ok(())
}

/// A host-visible staging buffer paired with a device-local buffer of the
/// same size.
///
/// The staging buffer is created first; dropping releases the device-local
/// buffer first and the staging buffer last.
pub struct StagedBuffer {
    // Field order is drop order.
    device_local: GpuBuffer,
    staging: GpuBuffer,
}

impl StagedBuffer {
    /// Create the pair. `usage` describes how the device-local buffer is
    /// consumed; `TRANSFER_DST` is added automatically.
    pub fn new(device: DeviceRef, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self> {
        let staging = GpuBuffer::new(
            device.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let device_local = GpuBuffer::new(
            device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        Ok(Self {
            device_local,
            staging,
        })
    }

    /// Write plain data into the staging buffer.
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        self.staging.write(data)
    }

    /// Copy the whole staging buffer to the device-local buffer.
    ///
    /// # Safety
    /// Same as [`copy_buffer`].
    pub unsafe fn upload(&self, pool: &CommandPool, queue: vk::Queue) -> Result<()> {
        unsafe { copy_whole(pool, queue, &self.staging, &self.device_local, self.size()) }
    }

    /// Write then upload in one step.
    ///
    /// # Safety
    /// Same as [`copy_buffer`].
    pub unsafe fn write_and_upload<T: Pod>(
        &mut self,
        pool: &CommandPool,
        queue: vk::Queue,
        data: &[T],
    ) -> Result<()> {
        self.write(data)?;
        unsafe { self.upload(pool, queue) }
    }

    /// The host-visible half.
    pub fn staging(&self) -> &GpuBuffer {
        &self.staging
    }

    /// The device-local half.
    pub fn device_local(&self) -> &GpuBuffer {
        &self.device_local
    }

    /// Size of each half in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.staging.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(src_offset: u64, dst_offset: u64, size: u64) -> vk::BufferCopy {
        vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        }
    }

    #[test]
    fn region_inside_both_buffers_is_accepted() {
        assert!(check_region(64, 64, &region(0, 0, 64)).is_ok());
        assert!(check_region(64, 128, &region(16, 64, 48)).is_ok());
    }

    #[test]
    fn region_past_either_end_is_rejected() {
        assert!(check_region(64, 64, &region(1, 0, 64)).is_err());
        assert!(check_region(64, 32, &region(0, 0, 64)).is_err());
        assert!(check_region(64, 64, &region(u64::MAX, 0, 2)).is_err());
    }

    #[test]
    fn empty_region_is_rejected() {
        assert!(matches!(
            check_region(64, 64, &region(0, 0, 0)),
            Err(GpuError::InvalidState(_))
        ));
    }
}
