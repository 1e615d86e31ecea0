//! Shared test utilities.
//!
//! Synthetic encoded images for the codec, pipeline and HTTP tests. Every
//! helper is deterministic: the same arguments give the same bytes.

use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, Frame, ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};

use crate::imaging::{ContextSettings, DecodeLimits, ImagingContext};

// =========================================================================
// Pixel sources
// =========================================================================

/// Smooth gradient with a diagonal stripe, so crops and resizes are visible.
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let stripe = if (x + y) % 32 < 4 { 255 } else { 0 };
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            stripe,
        ])
    })
}

// =========================================================================
// Encoded fixtures
// =========================================================================

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(gradient(width, height))
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
        .unwrap();
    out
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(gradient(width, height))
        .write_with_encoder(PngEncoder::new(&mut out))
        .unwrap();
    out
}

/// 16 bits per channel RGB PNG.
pub fn png16_bytes(width: u32, height: u32) -> Vec<u8> {
    let img: ImageBuffer<Rgb<u16>, Vec<u16>> = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 257) as u16, (y * 257) as u16, 40_000])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb16(img)
        .write_with_encoder(PngEncoder::new(&mut out))
        .unwrap();
    out
}

/// GIF with `frames` frames of distinct flat colors.
pub fn animated_gif_bytes(width: u32, height: u32, frames: u8) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        let frames = (0..frames).map(|i| {
            Frame::new(RgbaImage::from_pixel(
                width,
                height,
                Rgba([i.wrapping_mul(80), 255 - i.wrapping_mul(80), 0, 255]),
            ))
        });
        encoder.encode_frames(frames).unwrap();
    }
    out
}

// =========================================================================
// Context
// =========================================================================

pub fn test_context() -> ImagingContext {
    ImagingContext::start(ContextSettings {
        workers: 2,
        limits: DecodeLimits::default(),
    })
    .unwrap()
}
