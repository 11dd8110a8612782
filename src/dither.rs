//! Grayscale to 1-bit conversion for page-addressed monochrome panels
//!
//! A frame is rescaled to the panel size, every 2x2 block is reduced to
//! its average luminance and replaced by one of five fixed black/white
//! patterns, and the result is packed into page-column order: byte `c` of
//! page `p` holds column `c` of rows `p*8..p*8+8`, least significant bit on
//! top. This is the layout SSD1306-style controllers expect.

use crate::error::{PipelineError, Result};
use crate::pipeline::Transform;
use image::GrayImage;
use image::imageops::{self, FilterType};
use std::io::{self, Write};

/// Lower luminance edge of bands 1 to 4
pub const BAND_EDGES: [u8; 4] = [51, 102, 153, 204];

/// White pixels of each band, as `[top-left, top-right, bottom-left, bottom-right]`
pub const BAND_PATTERNS: [[bool; 4]; 5] = [
    [false, false, false, false],
    [false, false, true, false],
    [false, true, true, false],
    [false, true, true, true],
    [true, true, true, true],
];

/// Quantization band (0..=4) of an average block luminance
#[inline]
pub fn band(avg: u8) -> usize {
    BAND_EDGES.iter().take_while(|&&edge| avg >= edge).count()
}

/// Rescales a gray frame to a fixed output size
pub trait FrameScaler: Send {
    fn scale(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<()>;
}

/// Bilinear rescaler backed by `image::imageops`
pub struct BilinearScaler {
    in_width: u32,
    in_height: u32,
    out_width: u32,
    out_height: u32,
}

impl BilinearScaler {
    pub fn new(in_width: u32, in_height: u32, out_width: u32, out_height: u32) -> Self {
        Self {
            in_width,
            in_height,
            out_width,
            out_height,
        }
    }
}

impl FrameScaler for BilinearScaler {
    fn scale(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        dst.clear();
        if self.in_width == self.out_width && self.in_height == self.out_height {
            dst.extend_from_slice(src);
            return Ok(());
        }

        let frame = GrayImage::from_raw(self.in_width, self.in_height, src.to_vec())
            .ok_or_else(|| {
                PipelineError::resource(format!(
                    "frame of {} bytes does not match {}x{}",
                    src.len(),
                    self.in_width,
                    self.in_height
                ))
            })?;
        let scaled = imageops::resize(
            &frame,
            self.out_width,
            self.out_height,
            FilterType::Triangle,
        );
        dst.extend_from_slice(scaled.as_raw());
        Ok(())
    }
}

/// Replace every 2x2 block of `gray` with its band pattern.
///
/// `mono` receives one byte per pixel, 1 for white. With an odd width the
/// last column forms 1-wide blocks averaged over the samples they have.
pub fn dither_blocks(gray: &[u8], width: usize, height: usize, mono: &mut Vec<u8>) {
    mono.clear();
    mono.resize(width * height, 0);

    for row in (0..height).step_by(2) {
        for col in (0..width).step_by(2) {
            let cells = [
                (row, col),
                (row, col + 1),
                (row + 1, col),
                (row + 1, col + 1),
            ];

            let mut sum = 0u32;
            let mut count = 0u32;
            for &(r, c) in &cells {
                if r < height && c < width {
                    sum += gray[r * width + c] as u32;
                    count += 1;
                }
            }
            let pattern = BAND_PATTERNS[band((sum / count) as u8)];

            for (&(r, c), &white) in cells.iter().zip(pattern.iter()) {
                if r < height && c < width {
                    mono[r * width + c] = white as u8;
                }
            }
        }
    }
}

/// Pack a 1-byte-per-pixel image into page-column order, appending to `out`
pub fn pack_pages(mono: &[u8], width: usize, height: usize, out: &mut Vec<u8>) {
    out.reserve(width * height / 8);
    for page in (0..height).step_by(8) {
        for col in 0..width {
            let mut byte = 0u8;
            for bit in 0..8 {
                if mono[(page + bit) * width + col] != 0 {
                    byte |= 1 << bit;
                }
            }
            out.push(byte);
        }
    }
}

/// Inverse of [`pack_pages`]
pub fn unpack_pages(packed: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut mono = vec![0u8; width * height];
    for (index, &byte) in packed.iter().enumerate().take(width * height / 8) {
        let page = index / width;
        let col = index % width;
        for bit in 0..8 {
            mono[(page * 8 + bit) * width + col] = (byte >> bit) & 1;
        }
    }
    mono
}

/// Write a packed bitmap as a plain PBM image (1 = black in PBM, so white
/// panel pixels are written as 0)
pub fn write_pbm<W: Write>(mut out: W, packed: &[u8], width: usize, height: usize) -> io::Result<()> {
    let mono = unpack_pages(packed, width, height);
    writeln!(out, "P1")?;
    writeln!(out, "{} {}", width, height)?;
    for row in mono.chunks(width) {
        let line: Vec<&str> = row
            .iter()
            .map(|&px| if px != 0 { "0" } else { "1" })
            .collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()
}

/// Converts fixed-size gray frames into packed panel bitmaps
pub struct Ditherer<S: FrameScaler = BilinearScaler> {
    in_width: usize,
    in_height: usize,
    out_width: usize,
    out_height: usize,
    scaler: S,
    scaled: Vec<u8>,
    mono: Vec<u8>,
}

impl Ditherer<BilinearScaler> {
    pub fn new(in_width: u32, in_height: u32, out_width: u32, out_height: u32) -> Result<Self> {
        let scaler = BilinearScaler::new(in_width, in_height, out_width, out_height);
        Self::with_scaler(in_width, in_height, out_width, out_height, scaler)
    }
}

impl<S: FrameScaler> Ditherer<S> {
    pub fn with_scaler(
        in_width: u32,
        in_height: u32,
        out_width: u32,
        out_height: u32,
        scaler: S,
    ) -> Result<Self> {
        if in_width == 0 || in_height == 0 {
            return Err(PipelineError::config(format!(
                "input size {}x{} must be positive",
                in_width, in_height
            )));
        }
        if out_width == 0 || out_height == 0 {
            return Err(PipelineError::config(format!(
                "output size {}x{} must be positive",
                out_width, out_height
            )));
        }
        if out_height % 8 != 0 {
            return Err(PipelineError::config(format!(
                "output height {} is not a multiple of 8",
                out_height
            )));
        }

        let out_len = out_width as usize * out_height as usize;
        Ok(Self {
            in_width: in_width as usize,
            in_height: in_height as usize,
            out_width: out_width as usize,
            out_height: out_height as usize,
            scaler,
            scaled: Vec::with_capacity(out_len),
            mono: Vec::with_capacity(out_len),
        })
    }

    /// Bytes in one input frame
    pub fn frame_len(&self) -> usize {
        self.in_width * self.in_height
    }

    /// Bytes in one packed output bitmap
    pub fn bitmap_len(&self) -> usize {
        self.out_width * self.out_height / 8
    }

    /// Dither one frame, appending exactly `bitmap_len()` bytes to `out`
    pub fn convert(&mut self, frame: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if frame.len() != self.frame_len() {
            return Err(PipelineError::resource(format!(
                "expected a frame of {} bytes, got {}",
                self.frame_len(),
                frame.len()
            )));
        }
        self.scaler.scale(frame, &mut self.scaled)?;
        dither_blocks(&self.scaled, self.out_width, self.out_height, &mut self.mono);
        pack_pages(&self.mono, self.out_width, self.out_height, out);
        Ok(())
    }
}

impl<S: FrameScaler> Transform for Ditherer<S> {
    type Input = u8;
    type Output = u8;

    fn unit_len(&self) -> usize {
        self.frame_len()
    }

    fn apply(&mut self, unit: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.convert(unit, out)
    }
}
