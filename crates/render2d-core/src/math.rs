//! Screen-space math: colors, rectangles, transforms and projection.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Linear RGBA color, laid out exactly as the fragment shader's `vec4`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    pub const RED: Self = Self::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Self = Self::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Self = Self::rgb(0.0, 0.0, 1.0);
    pub const YELLOW: Self = Self::rgb(1.0, 1.0, 0.0);
    pub const MAGENTA: Self = Self::rgb(1.0, 0.0, 1.0);

    /// Create a color from all four channels.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color.
    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Channels as an array, e.g. for a clear value.
    #[inline]
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Axis-aligned rectangle in screen space (pixels, y grows downward).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Top-left corner
    pub position: Vec2,
    /// Width and height
    pub size: Vec2,
}

impl Rect {
    #[inline]
    pub const fn new(position: Vec2, size: Vec2) -> Self {
        Self { position, size }
    }

    /// Rectangle from `x, y, width, height`.
    #[inline]
    pub const fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            size: Vec2::new(width, height),
        }
    }

    /// Move the rectangle by `delta`.
    #[inline]
    pub fn translate(&mut self, delta: Vec2) {
        self.position += delta;
    }

    /// Check if a point is inside the rectangle
    #[inline]
    pub fn contains(&self, point: Vec2) -> bool {
        let max = self.position + self.size;
        point.x >= self.position.x
            && point.x <= max.x
            && point.y >= self.position.y
            && point.y <= max.y
    }
}

/// 2D transform applied to the unit quad.
///
/// Scale is applied first, then rotation (radians, around the quad origin),
/// then translation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform2d {
    pub translation: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
}

impl Default for Transform2d {
    fn default() -> Self {
        Self {
            translation: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
        }
    }
}

impl Transform2d {
    /// Model matrix for the vertex shader.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            self.scale.extend(1.0),
            Quat::from_rotation_z(self.rotation),
            self.translation.extend(0.0),
        )
    }

    /// Rotate by `radians` around the quad origin.
    #[must_use]
    pub fn with_rotation(mut self, radians: f32) -> Self {
        self.rotation = radians;
        self
    }
}

impl From<Rect> for Transform2d {
    /// The unit quad spans `[0, 1]²`, so a rectangle is a scale by its size
    /// followed by a translation to its position.
    fn from(rect: Rect) -> Self {
        Self {
            translation: rect.position,
            scale: rect.size,
            rotation: 0.0,
        }
    }
}

/// Orthographic projection volume.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrthoBounds {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

impl OrthoBounds {
    /// Create a projection volume, rejecting degenerate extents.
    pub fn new(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Result<Self> {
        let bounds = Self {
            left,
            right,
            bottom,
            top,
            near,
            far,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Pixel-space projection for a target of `width × height`.
    ///
    /// The origin is the top-left corner of the image.
    pub fn screen(width: u32, height: u32) -> Self {
        Self {
            left: 0.0,
            right: width.max(1) as f32,
            bottom: height.max(1) as f32,
            top: 0.0,
            near: -1.0,
            far: 1.0,
        }
    }

    /// Check that every bound is finite and no axis has zero extent.
    pub fn validate(&self) -> Result<()> {
        let axes = [
            ("x", self.left, self.right),
            ("y", self.bottom, self.top),
            ("z", self.near, self.far),
        ];
        for (axis, min, max) in axes {
            if !min.is_finite() || !max.is_finite() {
                return Err(Error::NonFinite(axis));
            }
            if min == max {
                return Err(Error::DegenerateProjection { axis, min, max });
            }
        }
        Ok(())
    }

    /// Projection matrix with Vulkan `[0, 1]` depth.
    ///
    /// `[0][0] = 2 / (right - left)` and `[1][1] = 2 / (top - bottom)`.
    pub fn matrix(&self) -> Mat4 {
        Mat4::orthographic_rh(self.left, self.right, self.bottom, self.top, self.near, self.far)
    }

    /// Width of the volume.
    #[inline]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Height of the volume.
    #[inline]
    pub fn height(&self) -> f32 {
        (self.bottom - self.top).abs()
    }
}

/// Project a screen-space point through `projection` into clip space.
#[inline]
pub fn to_clip(projection: Mat4, point: Vec2) -> Vec3 {
    projection.project_point3(point.extend(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn projection_diagonal_matches_bounds() {
        let bounds = OrthoBounds::new(0.0, 800.0, 600.0, 0.0, -1.0, 1.0).unwrap();
        let m = bounds.matrix().to_cols_array_2d();

        assert_relative_eq!(m[0][0], 2.0 / 800.0);
        assert_relative_eq!(m[1][1], 2.0 / (0.0 - 600.0));
    }

    #[test]
    fn screen_corners_map_to_clip_corners() {
        let projection = OrthoBounds::screen(800, 600).matrix();

        let top_left = to_clip(projection, Vec2::ZERO);
        assert_relative_eq!(top_left.x, -1.0);
        assert_relative_eq!(top_left.y, 1.0);

        let bottom_right = to_clip(projection, Vec2::new(800.0, 600.0));
        assert_relative_eq!(bottom_right.x, 1.0);
        assert_relative_eq!(bottom_right.y, -1.0);
    }

    #[test]
    fn degenerate_bounds_are_rejected() {
        assert_eq!(
            OrthoBounds::new(10.0, 10.0, 600.0, 0.0, -1.0, 1.0),
            Err(Error::DegenerateProjection {
                axis: "x",
                min: 10.0,
                max: 10.0
            })
        );
        assert!(OrthoBounds::new(0.0, 800.0, 0.0, 0.0, -1.0, 1.0).is_err());
        assert!(OrthoBounds::new(0.0, 800.0, 600.0, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn non_finite_bounds_are_rejected() {
        assert_eq!(
            OrthoBounds::new(0.0, f32::NAN, 600.0, 0.0, -1.0, 1.0),
            Err(Error::NonFinite("x"))
        );
        assert_eq!(
            OrthoBounds::new(0.0, 800.0, 600.0, 0.0, -1.0, f32::INFINITY),
            Err(Error::NonFinite("z"))
        );
    }

    #[test]
    fn screen_bounds_never_degenerate() {
        assert!(OrthoBounds::screen(0, 0).validate().is_ok());
    }

    #[test]
    fn rect_transform_maps_unit_quad_onto_rect() {
        let rect = Rect::from_xywh(100.0, 100.0, 200.0, 300.0);
        let model = Transform2d::from(rect).matrix();

        let origin = model.transform_point3(Vec3::ZERO);
        let far_corner = model.transform_point3(Vec3::new(1.0, 1.0, 0.0));

        assert_relative_eq!(origin.x, 100.0);
        assert_relative_eq!(origin.y, 100.0);
        assert_relative_eq!(far_corner.x, 300.0);
        assert_relative_eq!(far_corner.y, 400.0);
    }

    #[test]
    fn rect_contains_edges() {
        let rect = Rect::from_xywh(0.0, 0.0, 10.0, 10.0);
        assert!(rect.contains(Vec2::new(10.0, 0.0)));
        assert!(!rect.contains(Vec2::new(10.5, 5.0)));
    }

    #[test]
    fn color_layout_matches_vec4() {
        assert_eq!(std::mem::size_of::<Color>(), 16);
        assert_eq!(bytemuck::bytes_of(&Color::RED).len(), 16);
        assert_eq!(Color::MAGENTA.to_array(), [1.0, 0.0, 1.0, 1.0]);
    }
}
