//! Application framework for the render2d engine.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and the event loop
//! - GPU context initialization
//! - Swapchain creation and recreation
//! - Driving the frame orchestrator once per redraw
//!
//! # Example
//!
//! ```no_run
//! use render2d_app::{run_app, AppConfig, AppContext, Color, Quad, Rect, Render2dApp};
//!
//! struct MyApp;
//!
//! impl Render2dApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn quad(&self) -> Quad {
//!         Quad::rect(Rect::from_xywh(10.0, 10.0, 50.0, 50.0), Color::RED)
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod runner;

pub use app::{Quad, Render2dApp};
pub use context::AppContext;
pub use runner::{init_logging, run_app, AppConfig};

// Re-export commonly used types for convenience
pub use render2d_core::{Color, Rect, Transform2d};
pub use render2d_render::{FrameOutcome, SkipReason};
pub use winit::event::WindowEvent;
