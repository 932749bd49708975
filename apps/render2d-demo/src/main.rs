//! render2d demo
//!
//! Draws a 200x300 rectangle in a 1024x720 window.
//!
//! ## Controls
//!
//! - `1`..`5`: red, green, blue, yellow, magenta
//! - `W`/`A`/`S`/`D` or arrow keys: move the rectangle by 10 pixels
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p render2d-demo
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use render2d_app::{run_app, AppConfig};

use crate::app::Demo;

const WIDTH: u32 = 1024;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    let config = AppConfig::new("render2d demo").with_size(WIDTH, HEIGHT);

    run_app::<Demo>(config)
}
