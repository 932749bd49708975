//! Demo application state and input handling.

use glam::Vec2;
use render2d_app::{AppContext, Quad, Render2dApp};
use render2d_core::{Color, Rect};
use tracing::{debug, info};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Pixels moved per key press.
const STEP: f32 = 10.0;

pub struct Demo {
    rect: Rect,
    color: Color,
}

impl Default for Demo {
    fn default() -> Self {
        Self {
            rect: Rect::from_xywh(100.0, 100.0, 200.0, 300.0),
            color: Color::RED,
        }
    }
}

impl Demo {
    /// Apply one key press. Returns `false` for keys the demo ignores.
    pub fn press(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::Digit1 => self.color = Color::RED,
            KeyCode::Digit2 => self.color = Color::GREEN,
            KeyCode::Digit3 => self.color = Color::BLUE,
            KeyCode::Digit4 => self.color = Color::YELLOW,
            KeyCode::Digit5 => self.color = Color::MAGENTA,
            KeyCode::KeyW | KeyCode::ArrowUp => self.rect.translate(Vec2::new(0.0, -STEP)),
            KeyCode::KeyS | KeyCode::ArrowDown => self.rect.translate(Vec2::new(0.0, STEP)),
            KeyCode::KeyA | KeyCode::ArrowLeft => self.rect.translate(Vec2::new(-STEP, 0.0)),
            KeyCode::KeyD | KeyCode::ArrowRight => self.rect.translate(Vec2::new(STEP, 0.0)),
            _ => return false,
        }
        debug!("{:?}: rect at {}, color {:?}", key, self.rect.position, self.color);
        true
    }
}

impl Render2dApp for Demo {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let extent = ctx.extent();
        info!(
            "Demo ready: {}x{}, {} frames in flight",
            extent.width,
            extent.height,
            ctx.orchestrator().frames_in_flight()
        );
        Ok(Self::default())
    }

    fn update(&mut self, _ctx: &AppContext, _dt: f32) {}

    fn quad(&self) -> Quad {
        Quad::rect(self.rect, self.color)
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.press(*key),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_red_at_100_100() {
        let demo = Demo::default();

        assert_eq!(demo.color, Color::RED);
        assert_eq!(demo.rect, Rect::from_xywh(100.0, 100.0, 200.0, 300.0));
    }

    #[test]
    fn digit_keys_pick_colors() {
        let mut demo = Demo::default();

        let expected = [
            (KeyCode::Digit2, Color::GREEN),
            (KeyCode::Digit3, Color::BLUE),
            (KeyCode::Digit4, Color::YELLOW),
            (KeyCode::Digit5, Color::MAGENTA),
            (KeyCode::Digit1, Color::RED),
        ];
        for (key, color) in expected {
            assert!(demo.press(key));
            assert_eq!(demo.color, color);
        }
    }

    #[test]
    fn movement_keys_step_ten_pixels() {
        let mut demo = Demo::default();

        demo.press(KeyCode::KeyW);
        demo.press(KeyCode::ArrowUp);
        assert_eq!(demo.rect.position, Vec2::new(100.0, 80.0));

        demo.press(KeyCode::KeyD);
        demo.press(KeyCode::ArrowDown);
        assert_eq!(demo.rect.position, Vec2::new(110.0, 90.0));

        demo.press(KeyCode::KeyA);
        demo.press(KeyCode::ArrowLeft);
        demo.press(KeyCode::KeyS);
        assert_eq!(demo.rect.position, Vec2::new(90.0, 100.0));
        assert_eq!(demo.rect.size, Vec2::new(200.0, 300.0));
    }

    #[test]
    fn other_keys_are_ignored() {
        let mut demo = Demo::default();

        assert!(!demo.press(KeyCode::KeyQ));
        assert_eq!(demo.color, Color::RED);
        assert_eq!(demo.rect.position, Vec2::new(100.0, 100.0));
    }
}
