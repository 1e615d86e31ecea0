//! Decoding of uploads and stored masters.
//!
//! Uploads arrive as bytes of unknown format: the format is sniffed from the
//! magic bytes, then the decoder is asked for the pieces of metadata that
//! must be baked into the master (ICC profile, EXIF orientation) and whether
//! the source is animated. Masters are decoded by their stored format.
//!
//! Every decode honours [`DecodeLimits`]. AVIF goes through [`super::avif`],
//! which has no allocation hook, so its dimensions are checked up front.

use super::avif;
use super::error::ImagingError;
use crate::store::StoredFormat;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::metadata::Orientation;
use image::{AnimationDecoder, DynamicImage, ImageDecoder, ImageFormat, ImageReader, Limits};
use std::io::Cursor;

/// Default decode memory ceiling: 256 MiB.
pub const DEFAULT_MAX_ALLOC: u64 = 256 * 1024 * 1024;

/// Memory ceiling applied to every decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_alloc: DEFAULT_MAX_ALLOC,
        }
    }
}

impl DecodeLimits {
    pub fn image_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc);
        limits
    }

    /// Reject a `width × height` buffer of `bytes_per_pixel` that would not
    /// fit under the ceiling.
    pub fn check(&self, width: u32, height: u32, bytes_per_pixel: u64) -> Result<(), String> {
        self.check_bytes(
            buffer_bytes(width, height, bytes_per_pixel),
            &format!("{width}x{height}"),
        )
    }

    /// Reject a total allocation of `needed` bytes. `None` means the size
    /// overflowed `u64`, which is always over the ceiling.
    pub fn check_bytes(&self, needed: Option<u64>, what: &str) -> Result<(), String> {
        match needed {
            Some(needed) if needed <= self.max_alloc => Ok(()),
            Some(needed) => Err(format!(
                "{what} needs {needed} bytes, limit is {}",
                self.max_alloc
            )),
            None => Err(format!(
                "{what} is too large, limit is {} bytes",
                self.max_alloc
            )),
        }
    }
}

/// Size of a `width × height` buffer, or `None` on overflow.
pub fn buffer_bytes(width: u32, height: u32, bytes_per_pixel: u64) -> Option<u64> {
    (width as u64)
        .checked_mul(height as u64)?
        .checked_mul(bytes_per_pixel)
}

/// A decoded upload plus the metadata the master encoder needs.
#[derive(Debug)]
pub struct DecodedUpload {
    /// First frame for animated sources.
    pub image: DynamicImage,
    pub format: ImageFormat,
    pub icc_profile: Option<Vec<u8>>,
    pub orientation: Orientation,
    pub animated: bool,
}

fn decode_err(e: image::ImageError) -> ImagingError {
    ImagingError::Decode(e.to_string())
}

/// Decode an upload of unknown format.
pub fn decode_upload(bytes: &[u8], limits: &DecodeLimits) -> Result<DecodedUpload, ImagingError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImagingError::Decode(e.to_string()))?;
    let format = reader
        .format()
        .ok_or_else(|| ImagingError::Decode("unrecognized image format".into()))?;

    // AVIF `colr`/`prof` and `irot`/`imir` properties are not read: the
    // upload is taken as sRGB and upright.
    if format == ImageFormat::Avif {
        let (w, h) = avif::dimensions(bytes)?;
        limits.check(w, h, 4).map_err(ImagingError::Decode)?;
        return Ok(DecodedUpload {
            image: avif::decode(bytes)?,
            format,
            icc_profile: None,
            orientation: Orientation::NoTransforms,
            animated: false,
        });
    }

    reader.limits(limits.image_limits());
    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let (w, h) = decoder.dimensions();
    limits
        .check(w, h, decoder.color_type().bytes_per_pixel() as u64)
        .map_err(ImagingError::Decode)?;
    let icc_profile = decoder.icc_profile().ok().flatten();
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;

    Ok(DecodedUpload {
        animated: is_animated(bytes, format),
        image,
        format,
        icc_profile,
        orientation,
    })
}

/// True for multi-frame GIF, APNG and animated WebP.
pub fn is_animated(bytes: &[u8], format: ImageFormat) -> bool {
    match format {
        ImageFormat::Gif => GifDecoder::new(Cursor::new(bytes))
            .map(|d| d.into_frames().take(2).count() > 1)
            .unwrap_or(false),
        ImageFormat::Png => PngDecoder::new(Cursor::new(bytes))
            .and_then(|d| d.is_apng())
            .unwrap_or(false),
        ImageFormat::WebP => WebPDecoder::new(Cursor::new(bytes))
            .map(|d| d.has_animation())
            .unwrap_or(false),
        _ => false,
    }
}

/// Decode a stored raster master. Animated masters yield their first frame.
pub fn decode_master(
    bytes: &[u8],
    format: StoredFormat,
    limits: &DecodeLimits,
) -> Result<DynamicImage, ImagingError> {
    let image_format = match format {
        StoredFormat::Avif => {
            let (w, h) = avif::dimensions(bytes)?;
            limits.check(w, h, 4).map_err(ImagingError::Decode)?;
            return avif::decode(bytes);
        }
        StoredFormat::Png => ImageFormat::Png,
        StoredFormat::Gif => ImageFormat::Gif,
        StoredFormat::WebP => ImageFormat::WebP,
        StoredFormat::Svg => {
            return Err(ImagingError::Decode("vector assets are not rasterized".into()));
        }
    };

    let mut reader = ImageReader::with_format(Cursor::new(bytes), image_format);
    reader.limits(limits.image_limits());
    reader.decode().map_err(decode_err)
}
