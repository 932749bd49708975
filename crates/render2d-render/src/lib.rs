//! Frame orchestration for the render2d engine.
//!
//! This crate turns a swapchain, a render pass and the quad pipeline into
//! presented frames:
//! - [`FrameOrchestrator`] drives the wait, upload, acquire, record, submit
//!   and present sequence over a ring of frame slots
//! - [`GeometryBuffers`] holds the static unit quad
//! - [`UniformStagingSet`] carries the per-frame transform and color
//! - [`QuadPipeline`] builds the pipeline and its descriptor set layouts

pub mod frame;
pub mod geometry;
pub mod orchestrator;
pub mod quad_pipeline;
pub mod targets;
pub mod uniforms;

pub use frame::{DescriptorBinding, FrameSlot, SlotState};
pub use geometry::{GeometryBuffers, QuadVertex, QUAD_INDICES, QUAD_VERTICES};
pub use orchestrator::{flipped_viewport, FrameConfig, FrameOrchestrator, FrameOutcome, SkipReason};
pub use quad_pipeline::QuadPipeline;
pub use targets::{FrameTargets, PipelineHandles};
pub use uniforms::{TransformUniforms, UniformStagingSet, COLOR_UNIFORM_SIZE};
