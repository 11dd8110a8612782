//! Media file to serial display stream
//!
//! Decodes a media file, dithers every frame into a page-packed 1-bit
//! bitmap for a small monochrome panel, reduces the audio to one tone byte
//! per frame and writes both as fixed-size packets at the frame rate.

pub mod assets;
pub mod channel;
pub mod config;
pub mod decoder;
pub mod dither;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod spectrum;
pub mod utils;

pub use error::{PipelineError, Result};
