//! Error types for value-level validation.

use thiserror::Error;

/// Errors raised while building math values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An orthographic volume with zero extent along one axis.
    #[error("Degenerate projection: {axis} spans {min}..{max}")]
    DegenerateProjection {
        axis: &'static str,
        min: f32,
        max: f32,
    },

    /// A bound that is NaN or infinite.
    #[error("Non-finite projection bound: {0}")]
    NonFinite(&'static str),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
