//! Application runner and event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use render2d_gpu::GpuContextBuilder;
use render2d_render::FrameOutcome;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::Render2dApp;
use crate::context::AppContext;

/// Application configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Ring size override; `None` uses the swapchain image count minus one.
    pub frames_in_flight: Option<usize>,
    /// SPIR-V file replacing the embedded vertex shader.
    pub vertex_shader: Option<PathBuf>,
    /// SPIR-V file replacing the embedded fragment shader.
    pub fragment_shader: Option<PathBuf>,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "render2d".to_string(),
            width: 1024,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: None,
            vertex_shader: None,
            fragment_shader: None,
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Use a fixed number of frames in flight.
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = Some(frames);
        self
    }

    /// Load shaders from `dir/quad.vert.spv` and `dir/quad.frag.spv`
    /// instead of the embedded ones.
    #[must_use]
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.vertex_shader = Some(dir.join("quad.vert.spv"));
        self.fragment_shader = Some(dir.join("quad.frag.spv"));
        self
    }

    /// Set the default log filter.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Minimum time between frames, if a target FPS is set.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Does nothing if a subscriber is
/// already installed.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        debug!("Global subscriber already installed");
    }
}

/// Run a `Render2dApp` with the given configuration.
///
/// This function initializes logging, creates the window and GPU context,
/// and runs the event loop until the window is closed.
pub fn run_app<A: Render2dApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging(&config.log_filter);

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        init_error: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.init_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: Render2dApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    init_error: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: Render2dApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    // Frame statistics
    presented: u64,
    skipped: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: Render2dApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.init_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e:#}");
                        if let Some(mut state) = self.state.take() {
                            state.cleanup();
                        }
                        event_loop.exit();
                        return;
                    }
                    state.ctx.window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e:#}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: Render2dApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build(window.as_ref())?;

        info!("GPU: {}", gpu.device_name());

        let mut ctx = AppContext::new(window, gpu, &self.config)?;

        let app = A::init(&mut ctx)?;

        Ok(AppState {
            ctx,
            app,
            target_frame_time: self.config.target_frame_time(),
            presented: 0,
            skipped: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }
}

impl<A: Render2dApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = frame_start
            .duration_since(self.ctx.last_frame_time)
            .as_secs_f32();
        self.ctx.last_frame_time = frame_start;

        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
        }

        self.app.update(&self.ctx, dt);

        if self.ctx.rebuild_pending() {
            let size = self.ctx.window.inner_size();
            self.handle_resize(size.width, size.height)?;
        }

        match self.ctx.draw(self.app.quad())? {
            Some(FrameOutcome::Presented { .. }) => self.presented += 1,
            Some(FrameOutcome::Skipped { slot, reason }) => {
                debug!("Frame skipped on slot {}: {:?}", slot, reason);
                self.skipped += 1;
            }
            None => {}
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if !self.ctx.resize(width, height)? {
            debug!("Window minimized, rendering paused");
            return Ok(());
        }

        self.app.on_resize(&mut self.ctx, width, height)?;

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        let frames = self.presented + self.skipped;
        if frames > 0 {
            #[allow(clippy::cast_precision_loss)]
            let avg_fps = self.fps_sum / frames as f64;
            info!("Frame statistics:");
            info!("  Min FPS: {:.1}", self.min_fps);
            info!("  Max FPS: {:.1}", self.max_fps);
            info!("  Avg FPS: {:.1}", avg_fps);
            info!("  Presented: {}, skipped: {}", self.presented, self.skipped);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first; context resources are released on drop.
        self.app.cleanup(&mut self.ctx);

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_demo_window() {
        let config = AppConfig::default();

        assert_eq!((config.width, config.height), (1024, 720));
        assert!(config.vsync);
        assert_eq!(config.frames_in_flight, None);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.vertex_shader, None);
        assert_eq!(config.fragment_shader, None);
    }

    #[test]
    fn builders_override_fields() {
        let config = AppConfig::new("demo")
            .with_size(640, 480)
            .with_vsync(false)
            .with_validation(true)
            .with_frames_in_flight(3)
            .with_shader_dir("assets/spv")
            .with_log_filter("debug");

        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(!config.vsync);
        assert!(config.validation);
        assert_eq!(config.frames_in_flight, Some(3));
        assert_eq!(
            config.fragment_shader,
            Some(PathBuf::from("assets/spv").join("quad.frag.spv"))
        );
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn target_frame_time_from_fps() {
        assert_eq!(AppConfig::default().target_frame_time(), None);
        assert_eq!(
            AppConfig::default().with_target_fps(50).target_frame_time(),
            Some(Duration::from_millis(20))
        );
        assert_eq!(AppConfig::default().with_target_fps(0).target_frame_time(), None);
    }
}
