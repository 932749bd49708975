//! Swapchain management.

use ash::vk;

use crate::context::GpuContext;
use crate::error::{GpuError, Result};

/// Swapchain with its image views and, once a render pass is attached, one
/// framebuffer per image.
pub struct Swapchain {
    device: ash::Device,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain for the context's surface.
    ///
    /// `old` is retired by the driver once the new swapchain exists; the
    /// caller still drops it afterwards.
    pub fn new(
        gpu: &GpuContext,
        width: u32,
        height: u32,
        vsync: bool,
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        let support = unsafe { gpu.surface().support(gpu.physical_device())? };
        let caps = &support.capabilities;

        let surface_format = select_surface_format(&support.formats)?;
        let present_mode = select_present_mode(&support.present_modes, vsync);
        let extent = calculate_extent(caps, width, height);
        let image_count = select_image_count(caps);

        let queues = gpu.queues();
        let family_indices = [queues.graphics_family, queues.present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(gpu.surface().handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |s| s.swapchain));

        create_info = if queues.is_split() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = gpu.vulkan().swapchain_loader().clone();
        let device = gpu.device().clone();

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let mut this = Self {
            device,
            loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
        };

        this.images = unsafe { this.loader.get_swapchain_images(swapchain)? };
        for &image in &this.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let view = unsafe { this.device.create_image_view(&view_info, None)? };
            this.image_views.push(view);
        }

        tracing::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            this.images.len(),
            surface_format.format,
            present_mode
        );

        Ok(this)
    }

    /// Create one framebuffer per image for `render_pass`.
    pub fn attach_render_pass(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        self.destroy_framebuffers();

        for &view in &self.image_views {
            let attachments = [view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.create_framebuffer(&info, None)? };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Get the raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get the image format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Get the image extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get the chosen present mode.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of images in the chain.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Framebuffers, indexed by image index.
    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Select the surface format, preferring `B8G8R8A8_SRGB` / sRGB non-linear.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".to_string()))
}

/// Select the present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more image than the minimum, capped by the maximum (0 means no cap).
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn srgb_format_is_preferred() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            select_surface_format(&available).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn first_format_is_fallback() {
        let available = [format(
            vk::Format::R8G8B8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        assert_eq!(
            select_surface_format(&available).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_follows_vsync() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_is_clamped_when_surface_leaves_it_open() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 1024, 720);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(select_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(select_image_count(&caps), 2);
    }
}
