//! Synchronization primitives.

use ash::vk;

use crate::device::{DeviceRef, GpuDevice};
use crate::error::{GpuError, Result};

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &dyn GpuDevice) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe { device.create_semaphore(&create_info)? };
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &dyn GpuDevice, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = unsafe { device.create_fence(&create_info)? };
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// `timeout_ns == u64::MAX` waits forever; an expired finite wait is
/// reported as [`GpuError::TimedOut`].
///
/// # Safety
/// The fence must come from `device`.
pub unsafe fn wait_for_fence(device: &dyn GpuDevice, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    match unsafe { device.wait_for_fences(&[fence], true, timeout_ns) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(GpuError::TimedOut(timeout_ns)),
        Err(e) => Err(e.into()),
    }
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The fence must not be referenced by a pending submission.
pub unsafe fn reset_fence(device: &dyn GpuDevice, fence: vk::Fence) -> Result<()> {
    unsafe { device.reset_fences(&[fence])? };
    Ok(())
}

/// Per-frame synchronization resources.
pub struct FrameSync {
    device: DeviceRef,
    /// Signaled when the acquired image is ready to be rendered to
    pub image_acquired: vk::Semaphore,
    /// Signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Signaled when the frame's submission has finished on the GPU
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create the semaphores and a fence that starts signaled.
    pub fn new(device: DeviceRef) -> Result<Self> {
        // Null handles are valid to destroy, so a partial failure cleans up in Drop.
        let mut sync = Self {
            device,
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };

        unsafe {
            sync.image_acquired = create_semaphore(&*sync.device)?;
            sync.render_finished = create_semaphore(&*sync.device)?;
            sync.in_flight = create_fence(&*sync.device, true)?;
        }

        Ok(sync)
    }

    /// Block until the GPU has finished the last submission that used this
    /// frame.
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        unsafe { wait_for_fence(&*self.device, self.in_flight, timeout_ns) }
    }

    /// Reset the fence for the next submission.
    ///
    /// # Safety
    /// The fence must not be referenced by a pending submission.
    pub unsafe fn reset(&self) -> Result<()> {
        unsafe { reset_fence(&*self.device, self.in_flight) }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.image_acquired);
            self.device.destroy_semaphore(self.render_finished);
            self.device.destroy_fence(self.in_flight);
        }
    }
}
