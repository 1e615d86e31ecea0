//! At-rest master encoding.
//!
//! | Source | Stored as |
//! |---|---|
//! | Animated GIF / APNG / WebP | original bytes, original container |
//! | More than 8 bits per channel | lossless 16-bit PNG |
//! | Everything else | AVIF (metadata stripped) |
//! | AVIF encoder refuses the image | lossless PNG |
//!
//! Before encoding a still image, the EXIF orientation and the embedded ICC
//! profile are baked into the pixels, since neither survives in the master.

use super::decode::DecodedUpload;
use super::error::ImagingError;
use super::icc::{self, IccOutcome};
use super::params::{MasterSettings, Quality, Speed};
use crate::store::StoredFormat;
use image::codecs::avif::AvifEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};

/// An encoded master ready for the store.
#[derive(Debug, Clone)]
pub struct MasterImage {
    pub bytes: Vec<u8>,
    pub format: StoredFormat,
    pub width: u32,
    pub height: u32,
}

/// Produce the at-rest master for a decoded raster upload.
///
/// `original` must be the bytes `upload` was decoded from; animated sources
/// are stored as those bytes unchanged.
pub fn encode_master(
    original: &[u8],
    upload: DecodedUpload,
    settings: &MasterSettings,
) -> Result<MasterImage, ImagingError> {
    let (width, height) = (upload.image.width(), upload.image.height());

    if upload.animated {
        let format = match upload.format {
            ImageFormat::Gif => StoredFormat::Gif,
            ImageFormat::Png => StoredFormat::Png,
            ImageFormat::WebP => StoredFormat::WebP,
            other => {
                return Err(ImagingError::Encode(format!(
                    "no animated container for {other:?}"
                )));
            }
        };
        tracing::debug!(format = format.extension(), "animated source kept in its container");
        return Ok(MasterImage {
            bytes: original.to_vec(),
            format,
            width,
            height,
        });
    }

    let mut image = upload.image;
    image.apply_orientation(upload.orientation);

    let (image, outcome) = icc::normalize(image, upload.icc_profile.as_deref());
    match &outcome {
        IccOutcome::Absent => {}
        IccOutcome::AlreadySrgb => tracing::debug!("embedded profile is sRGB"),
        IccOutcome::Converted { description } => {
            tracing::debug!(profile = description.as_deref().unwrap_or("unnamed"), "converted to sRGB")
        }
        IccOutcome::Discarded(reason) => {
            tracing::warn!(%reason, "embedded color profile discarded, assuming sRGB")
        }
    }

    let (width, height) = (image.width(), image.height());
    let (bytes, format) = if is_high_bit_depth(&image) {
        (encode_png(&image, CompressionType::Best)?, StoredFormat::Png)
    } else {
        match encode_avif(&image, settings.speed, settings.quality) {
            Ok(bytes) => (bytes, StoredFormat::Avif),
            Err(e) => {
                tracing::warn!(error = %e, "AVIF encoder refused image, storing PNG");
                (encode_png(&image, CompressionType::Best)?, StoredFormat::Png)
            }
        }
    };

    Ok(MasterImage {
        bytes,
        format,
        width,
        height,
    })
}

fn is_high_bit_depth(image: &DynamicImage) -> bool {
    let color = image.color();
    color.bytes_per_pixel() / color.channel_count() > 1
}

/// RGB8, or RGBA8 when the source has alpha. The form rav1e and the WebP
/// encoder accept.
pub(super) fn to_rgb8_or_rgba8(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image.clone(),
        _ if image.color().has_alpha() => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    }
}

pub(super) fn encode_avif(
    image: &DynamicImage,
    speed: Speed,
    quality: Quality,
) -> Result<Vec<u8>, ImagingError> {
    let mut out = Vec::new();
    let encoder = AvifEncoder::new_with_speed_quality(&mut out, speed.value(), quality.value() as u8);
    to_rgb8_or_rgba8(image)
        .write_with_encoder(encoder)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(out)
}

/// Lossless PNG at the image's own bit depth.
pub(super) fn encode_png(
    image: &DynamicImage,
    compression: CompressionType,
) -> Result<Vec<u8>, ImagingError> {
    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive);
    image
        .write_with_encoder(encoder)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::avif;
    use crate::imaging::decode::{DecodeLimits, decode_master, decode_upload};
    use crate::imaging::icc::tests::{SRGB_COLORANTS, TestCurve, rgb_profile};
    use crate::test_helpers::{animated_gif_bytes, jpeg_bytes, png16_bytes};
    use image::metadata::Orientation;
    use image::{GenericImageView, Rgb, RgbImage};

    fn fast() -> MasterSettings {
        MasterSettings {
            quality: Quality::new(90),
            speed: Speed::new(10),
        }
    }

    fn still(image: DynamicImage) -> DecodedUpload {
        DecodedUpload {
            image,
            format: ImageFormat::Png,
            icc_profile: None,
            orientation: Orientation::NoTransforms,
            animated: false,
        }
    }

    #[test]
    fn jpeg_becomes_avif() {
        let bytes = jpeg_bytes(48, 32);
        let upload = decode_upload(&bytes, &DecodeLimits::default()).unwrap();
        let master = encode_master(&bytes, upload, &fast()).unwrap();
        assert_eq!(master.format, StoredFormat::Avif);
        assert_eq!((master.width, master.height), (48, 32));
        assert_eq!(avif::dimensions(&master.bytes).unwrap(), (48, 32));
    }

    #[test]
    fn sixteen_bit_becomes_png16() {
        let bytes = png16_bytes(10, 6);
        let upload = decode_upload(&bytes, &DecodeLimits::default()).unwrap();
        let master = encode_master(&bytes, upload, &fast()).unwrap();
        assert_eq!(master.format, StoredFormat::Png);
        let back = decode_master(&master.bytes, StoredFormat::Png, &DecodeLimits::default())
            .unwrap();
        assert!(matches!(back, DynamicImage::ImageRgb16(_)));
        assert_eq!(back.dimensions(), (10, 6));
    }

    #[test]
    fn animated_gif_is_kept_verbatim() {
        let bytes = animated_gif_bytes(12, 12, 3);
        let upload = decode_upload(&bytes, &DecodeLimits::default()).unwrap();
        let master = encode_master(&bytes, upload, &fast()).unwrap();
        assert_eq!(master.format, StoredFormat::Gif);
        assert_eq!(master.bytes, bytes);
    }

    #[test]
    fn orientation_is_applied() {
        let mut upload = still(DynamicImage::ImageRgb8(RgbImage::new(40, 20)));
        upload.orientation = Orientation::Rotate90;
        let master = encode_master(&[], upload, &fast()).unwrap();
        assert_eq!((master.width, master.height), (20, 40));
        assert_eq!(avif::dimensions(&master.bytes).unwrap(), (20, 40));
    }

    #[test]
    fn icc_profile_is_baked_in() {
        let mut upload = still(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            16,
            16,
            Rgb([128, 128, 128]),
        )));
        upload.icc_profile = Some(rgb_profile(SRGB_COLORANTS, TestCurve::Gamma(1.0)));
        let master = encode_master(&[], upload, &fast()).unwrap();
        let decoded = avif::decode(&master.bytes).unwrap().to_rgb8();
        let [r, _, _] = decoded.get_pixel(8, 8).0;
        assert!(r.abs_diff(188) < 12, "{r}");
    }

    #[test]
    fn bad_icc_profile_does_not_fail_ingestion() {
        let mut upload = still(DynamicImage::ImageRgb8(RgbImage::new(8, 8)));
        upload.icc_profile = Some(b"junk".to_vec());
        let master = encode_master(&[], upload, &fast()).unwrap();
        assert_eq!(master.format, StoredFormat::Avif);
    }

    #[test]
    fn alpha_survives_avif() {
        let upload = still(DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            8,
            8,
            image::Rgba([0, 0, 255, 0]),
        )));
        let master = encode_master(&[], upload, &fast()).unwrap();
        let decoded = avif::decode(&master.bytes).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn gray_is_expanded_for_avif() {
        let upload = still(DynamicImage::ImageLuma8(image::GrayImage::new(8, 8)));
        let master = encode_master(&[], upload, &fast()).unwrap();
        assert_eq!(master.format, StoredFormat::Avif);
    }

    #[test]
    fn depth_detection() {
        assert!(!is_high_bit_depth(&DynamicImage::new_rgb8(1, 1)));
        assert!(!is_high_bit_depth(&DynamicImage::new_luma_a8(1, 1)));
        assert!(is_high_bit_depth(&DynamicImage::new_rgb16(1, 1)));
        assert!(is_high_bit_depth(&DynamicImage::new_rgba32f(1, 1)));
    }
}
