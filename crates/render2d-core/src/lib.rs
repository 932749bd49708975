//! Core types and math for the render2d engine.
//!
//! This crate provides the plain value types shared by every other crate:
//! - Colors and rectangles in screen space
//! - 2D transforms and the orthographic projection
//! - The engine-wide error type

pub mod error;
pub mod math;

pub use error::{Error, Result};
pub use math::{Color, OrthoBounds, Rect, Transform2d};
