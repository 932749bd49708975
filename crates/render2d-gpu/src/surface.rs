//! Surface management for windowed rendering.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{GpuError, Result};

/// A window surface together with its extension loader.
pub struct Surface {
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Create a surface for a window.
    ///
    /// # Safety
    /// The instance must have been created with the extensions reported by
    /// `ash_window` for this window's display, and the window must outlive
    /// the surface.
    pub unsafe fn from_window<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self { surface, loader })
    }

    /// Get the raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether `queue_family` of `physical_device` can present here.
    ///
    /// # Safety
    /// The physical device must belong to the surface's instance.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
        }
        .unwrap_or(false)
    }

    /// Query formats, present modes and capabilities.
    ///
    /// # Safety
    /// The physical device must belong to the surface's instance.
    pub unsafe fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)?,
            })
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain created for this surface may still exist.
    pub unsafe fn destroy(&self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Surface capabilities query result.
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// A device is usable only if it can create at least one swapchain.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}
