//! `Render2dApp` trait definition.

use render2d_core::{Color, Rect, Transform2d};
use winit::event::WindowEvent;

use crate::context::AppContext;

/// The single quad an application draws each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub transform: Transform2d,
    pub color: Color,
}

impl Quad {
    /// Fill `rect` (screen pixels, y down) with `color`.
    pub fn rect(rect: Rect, color: Color) -> Self {
        Self {
            transform: rect.into(),
            color,
        }
    }
}

/// Trait for render2d applications.
///
/// The framework owns the window, the GPU context, the swapchain and the
/// frame orchestrator. Each redraw it calls [`update`](Self::update), asks
/// for the [`quad`](Self::quad) to draw and hands it to the orchestrator.
pub trait Render2dApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window and GPU context exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state. `dt` is in seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// What to draw this frame.
    fn quad(&self) -> Quad;

    /// Handle window resize.
    ///
    /// Called after the swapchain has been rebuilt for the new size.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Called before shutdown while the GPU is idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn rect_quad_scales_then_translates() {
        let quad = Quad::rect(Rect::from_xywh(100.0, 100.0, 200.0, 300.0), Color::BLUE);

        assert_eq!(quad.transform.translation, Vec2::new(100.0, 100.0));
        assert_eq!(quad.transform.scale, Vec2::new(200.0, 300.0));
        assert_eq!(quad.color, Color::BLUE);
    }
}
