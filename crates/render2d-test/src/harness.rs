//! Helpers for driving the renderer against [`MockDevice`].

use std::sync::Arc;

use ash::vk;
use render2d_gpu::{CommandPool, DeviceRef, QueueSet};
use render2d_render::{FrameConfig, FrameOrchestrator, FrameTargets, PipelineHandles};

use crate::mock::MockDevice;
use crate::{Result, TestError};

/// Route engine logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Swapchain, render pass and framebuffers made of fake handles, one
/// framebuffer per mock swapchain image.
pub fn fake_targets(mock: &MockDevice, width: u32, height: u32) -> FrameTargets {
    FrameTargets {
        swapchain: mock.fake_handle(),
        render_pass: mock.fake_handle(),
        framebuffers: (0..mock.image_count()).map(|_| mock.fake_handle::<vk::Framebuffer>()).collect(),
        extent: vk::Extent2D { width, height },
    }
}

/// Pipeline handles made of fake handles.
pub fn fake_pipeline(mock: &MockDevice) -> PipelineHandles {
    PipelineHandles {
        pipeline: mock.fake_handle(),
        layout: mock.fake_handle(),
        transform_set_layout: mock.fake_handle(),
        color_set_layout: mock.fake_handle(),
    }
}

/// One queue family doing both graphics and present.
pub fn fake_queues(mock: &MockDevice) -> QueueSet {
    let queue: vk::Queue = mock.fake_handle();
    QueueSet {
        graphics: queue,
        present: queue,
        graphics_family: 0,
        present_family: 0,
    }
}

/// Mock device plus everything needed to build an orchestrator on it.
pub struct TestHarness {
    pub mock: Arc<MockDevice>,
    pub queues: QueueSet,
    pub targets: FrameTargets,
    pub pipeline: PipelineHandles,
}

impl TestHarness {
    /// Harness with a three-image swapchain of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_image_count(3, width, height)
    }

    /// Harness with `image_count` swapchain images.
    pub fn with_image_count(image_count: u32, width: u32, height: u32) -> Self {
        init_tracing();
        let mock = MockDevice::with_image_count(image_count);
        let queues = fake_queues(&mock);
        let targets = fake_targets(&mock, width, height);
        let pipeline = fake_pipeline(&mock);
        Self {
            mock,
            queues,
            targets,
            pipeline,
        }
    }

    /// The mock as a device handle.
    pub fn device(&self) -> DeviceRef {
        self.mock.device_ref()
    }

    /// Command pool on the graphics family.
    pub fn command_pool(&self) -> Result<CommandPool> {
        Ok(CommandPool::new(self.device(), self.queues.graphics_family)?)
    }

    /// Orchestrator over the harness targets.
    pub fn orchestrator(&self, config: FrameConfig) -> Result<FrameOrchestrator> {
        Ok(FrameOrchestrator::new(
            self.device(),
            self.command_pool()?,
            self.queues,
            self.targets.clone(),
            self.pipeline,
            config,
        )?)
    }

    /// Fail with every violation the mock recorded.
    pub fn check_violations(&self) -> Result<()> {
        let violations = self.mock.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(TestError::Violations(violations))
        }
    }

    /// Fail if any device object is still alive.
    pub fn check_released(&self) -> Result<()> {
        let live = self.mock.live_objects();
        if live.is_empty() {
            Ok(())
        } else {
            Err(TestError::Leaked(live))
        }
    }
}
