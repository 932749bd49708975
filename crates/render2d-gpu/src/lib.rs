//! Vulkan abstraction layer for the render2d engine.
//!
//! This crate provides:
//! - The [`GpuDevice`] seam all GPU work goes through
//! - Dedicated-memory buffers with persistent host mappings
//! - Command pool management and blocking host to device transfers
//! - Instance, device, surface and swapchain bootstrap
//! - Render pass and graphics pipeline creation

pub mod command;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use command::{begin_command_buffer, end_command_buffer, submit_command_buffers, CommandPool};
pub use context::{GpuContext, GpuContextBuilder, QueueSet};
pub use descriptors::{write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder};
pub use device::{DeviceRef, GpuDevice, VulkanDevice};
pub use error::{GpuError, Result};
pub use memory::{select_memory_type, GpuBuffer};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig, RenderPass};
pub use shader::load_spirv;
pub use surface::{Surface, SurfaceSupport};
pub use swapchain::Swapchain;
pub use sync::{create_fence, create_semaphore, FrameSync};
pub use transfer::{copy_buffer, StagedBuffer};
