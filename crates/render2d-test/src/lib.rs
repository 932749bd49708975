//! Test harness for the render2d engine.
//!
//! Provides a simulated GPU device and helpers for driving the frame
//! orchestrator without a display or a Vulkan driver.

pub mod harness;
pub mod mock;

pub use harness::{fake_pipeline, fake_queues, fake_targets, init_tracing, TestHarness};
pub use mock::{Call, Command, DrawRecord, LiveObjects, MockDevice};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] render2d_gpu::GpuError),
    #[error("{} device violation(s): {}", .0.len(), .0.join("; "))]
    Violations(Vec<String>),
    #[error("Resources still alive: {0:?}")]
    Leaked(LiveObjects),
}

pub type Result<T> = std::result::Result<T, TestError>;
