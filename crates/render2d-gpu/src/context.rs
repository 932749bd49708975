//! GPU context management.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::device::{DeviceRef, VulkanDevice};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, DebugMessenger};
use crate::surface::Surface;

/// Queue handles used by the renderer.
///
/// Graphics and present may be the same queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSet {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,
}

impl QueueSet {
    /// Whether presentation uses a different queue family than rendering.
    pub fn is_split(&self) -> bool {
        self.graphics_family != self.present_family
    }
}

/// Instance, surface, device and queues for one window.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: Surface,
    physical_device: vk::PhysicalDevice,
    device_name: String,
    device: Arc<ash::Device>,
    gpu: Arc<VulkanDevice>,
    queues: QueueSet,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared device handle for components that issue GPU work.
    pub fn device_ref(&self) -> DeviceRef {
        self.gpu.clone()
    }

    /// Get the Vulkan device wrapper.
    pub fn vulkan(&self) -> &VulkanDevice {
        &self.gpu
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Name reported by the driver.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Get the window surface.
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Get the queue handles.
    pub fn queues(&self) -> QueueSet {
        self.queues
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if Arc::strong_count(&self.gpu) > 1 {
            tracing::warn!("GPU context dropped while device handles are still shared");
        }

        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.surface.destroy();
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::info!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "render2d".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context for `window`.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let instance =
            unsafe { create_instance(&entry, &self.app_name, display, self.enable_validation)? };

        let debug = if self.enable_validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface = unsafe { Surface::from_window(&entry, &instance, window)? };

        let (physical_device, families) = unsafe { select_physical_device(&instance, &surface)? };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unknown>".to_string());
        tracing::info!(
            "Selected GPU: {} ({:?}), graphics family {}, present family {}",
            device_name,
            properties.device_type,
            families.graphics,
            families.present
        );

        let device = unsafe { create_device(&instance, physical_device, families)? };
        let queues = unsafe {
            QueueSet {
                graphics: device.get_device_queue(families.graphics, 0),
                present: device.get_device_queue(families.present, 0),
                graphics_family: families.graphics,
                present_family: families.present,
            }
        };

        let device = Arc::new(device);
        let gpu = Arc::new(unsafe { VulkanDevice::new(&instance, device.clone(), physical_device) });

        Ok(GpuContext {
            entry,
            instance,
            debug,
            surface,
            physical_device,
            device_name,
            device,
            gpu,
            queues,
        })
    }
}

/// Queue family indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// Choose graphics and present families, preferring one family that does both.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let graphics_families: Vec<u32> = families
        .iter()
        .enumerate()
        .filter(|(_, family)| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|(i, _)| i as u32)
        .collect();

    if let Some(&both) = graphics_families.iter().find(|&&i| supports_present(i)) {
        return Some(QueueFamilies {
            graphics: both,
            present: both,
        });
    }

    let graphics = *graphics_families.first()?;
    let present = families
        .iter()
        .enumerate()
        .filter(|(_, family)| family.queue_count > 0)
        .map(|(i, _)| i as u32)
        .find(|&i| supports_present(i))?;

    Some(QueueFamilies { graphics, present })
}

/// Base score for a device type; higher is preferred.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 10,
    }
}

/// Select the best physical device that can render to `surface`.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilies)> = None;
    for device in devices {
        let Some((score, families)) = (unsafe { evaluate_device(instance, surface, device) }) else {
            continue;
        };
        if best.map_or(true, |(best_score, ..)| score > best_score) {
            best = Some((score, device, families));
        }
    }

    best.map(|(_, device, families)| (device, families))
        .ok_or(GpuError::NoSuitableDevice)
}

/// Score a device, or `None` if it cannot be used at all.
unsafe fn evaluate_device(
    instance: &ash::Instance,
    surface: &Surface,
    device: vk::PhysicalDevice,
) -> Option<(u32, QueueFamilies)> {
    let properties = unsafe { instance.get_physical_device_properties(device) };

    let api_version = properties.api_version;
    if vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 1 {
        return None;
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }.ok()?;
    let has_swapchain = extensions
        .iter()
        .any(|ext| {
            ext.extension_name_as_c_str()
                .is_ok_and(|name| name == ash::khr::swapchain::NAME)
        });
    if !has_swapchain {
        return None;
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let families = pick_queue_families(&families, |i| unsafe { surface.supports_present(device, i) })?;

    let support = unsafe { surface.support(device) }.ok()?;
    if !support.is_adequate() {
        return None;
    }

    let mut score = device_type_score(properties.device_type);
    if families.graphics == families.present {
        score += 1;
    }

    Some((score, families))
}

fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::khr::swapchain::NAME]
}

/// Create the logical device with one queue per distinct family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let mut unique_families = vec![families.graphics];
    if families.present != families.graphics {
        unique_families.push(families.present);
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const std::ffi::c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(GpuError::from)?;

    Ok(device)
}
