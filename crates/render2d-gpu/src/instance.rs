//! Vulkan instance creation.

use std::ffi::{c_void, CStr, CString};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::error::{GpuError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions needed to present to `display`, plus debug utils when
/// validation is on.
pub fn required_instance_extensions(
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<Vec<*const std::ffi::c_char>> {
    let mut extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::ExtensionNotSupported(format!("surface extensions: {e}")))?
        .to_vec();

    if enable_validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

    Ok(extensions)
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"render2d")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    let extension_names = required_instance_extensions(display, enable_validation)?;

    let mut layer_names = Vec::new();
    if enable_validation {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let found = available_layers.iter().any(|props| {
            props.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER)
        });
        if found {
            layer_names.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!(
                "Validation layer {} not available",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
    }

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None)? };
    Ok(instance)
}

/// Validation messenger that forwards driver messages to `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the messenger.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils`.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
        Ok(Self { loader, messenger })
    }

    /// Destroy the messenger.
    ///
    /// # Safety
    /// Must be called before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || unsafe { (*callback_data).p_message.is_null() } {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr((*callback_data).p_message) }.to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("[vulkan {:?}] {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("[vulkan {:?}] {}", message_type, message);
    } else {
        tracing::debug!("[vulkan {:?}] {}", message_type, message);
    }

    vk::FALSE
}
