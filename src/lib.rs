//! Asset formats and the terrain renderer for Allods maps.

pub mod archive;
pub mod bytes_ext;
pub mod color;
pub mod compound_palette;
pub mod config;
pub mod error;
pub mod image;
pub mod level;
pub mod loader;
pub mod obstacle;
pub mod palette;
pub mod rect;
pub mod registry;
pub mod render;
pub mod resources;
pub mod rle;
pub mod screen;
pub mod services;
pub mod sprite;
pub mod stream;
pub mod world;

pub use error::{Error, Result};
