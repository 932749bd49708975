//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// No memory type satisfies both the resource and the requested properties.
    #[error("No memory type in mask {type_bits:#b} has properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Command buffer allocation was rejected by the driver.
    #[error("Command pool exhausted: {0}")]
    PoolExhausted(vk::Result),

    /// Queue submission was rejected.
    #[error("Queue submission failed: {0}")]
    Submission(vk::Result),

    /// Swapchain image acquisition failed.
    #[error("Failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),

    /// Presentation failed.
    #[error("Failed to present swapchain image: {0}")]
    Present(vk::Result),

    /// A bounded wait expired.
    #[error("Timed out after {0} ns")]
    TimedOut(u64),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader could not be loaded.
    #[error("Shader load failed: {0}")]
    ShaderLoad(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Whether this is an allocation failure (fatal at construction time).
    pub fn is_allocation_error(&self) -> bool {
        matches!(
            self,
            Self::NoSuitableMemoryType { .. } | Self::AllocationFailed(_)
        )
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
