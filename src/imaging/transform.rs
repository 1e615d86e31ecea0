//! Retrieval-time resize, crop and delivery encode.
//!
//! Every request decodes the master, cover-fits it to the requested size
//! (see [`super::geometry`]) and encodes the result. Nothing is cached.
//!
//! | Step | Implementation |
//! |---|---|
//! | Decode | [`super::decode::decode_master`] |
//! | Resize | `DynamicImage::resize_exact`, Lanczos3 shrinking / CatmullRom enlarging |
//! | Crop | `DynamicImage::crop_imm` at the centered offset |
//! | Encode | WebP (lossless), PNG, JPEG or AVIF per [`DeliverySettings`] |

use super::decode::{DecodeLimits, buffer_bytes, decode_master};
use super::error::ImagingError;
use super::geometry::{GeometryPlan, plan_cover, resolve_target};
use super::master::{encode_avif, encode_png, to_rgb8_or_rgba8};
use super::params::{DeliveryFormat, DeliverySettings};
use crate::store::StoredFormat;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::CompressionType;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;

/// `Rgba<f32>`, the working pixel of `image`'s separable resampler.
const RESAMPLE_BYTES_PER_PIXEL: u64 = 16;

/// Requested output size. An omitted axis keeps the source's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TransformRequest {
    pub fn exact(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }
}

/// Encoded delivery bytes.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Produce a `width × height` rendition of a stored raster master.
///
/// Deterministic: the same master, request and settings give identical
/// bytes.
pub fn transform(
    master: &[u8],
    format: StoredFormat,
    request: TransformRequest,
    delivery: &DeliverySettings,
    limits: &DecodeLimits,
) -> Result<Delivered, ImagingError> {
    if request.width == Some(0) || request.height == Some(0) {
        return Err(ImagingError::Transform(
            "target dimensions must be at least 1".into(),
        ));
    }

    let source = decode_master(master, format, limits)?;
    let source_dims = (source.width(), source.height());
    let target = resolve_target(source_dims, (request.width, request.height));
    let plan = plan_cover(source_dims, target)
        .ok_or_else(|| ImagingError::Transform("source image is empty".into()))?;

    limits
        .check_bytes(
            resize_bytes(source_dims, &plan, source.color().bytes_per_pixel() as u64),
            &format!("{}x{} resize", plan.scaled_width, plan.scaled_height),
        )
        .map_err(ImagingError::Transform)?;

    let scaled = if plan.is_identity_scale(source_dims) {
        source
    } else {
        let filter = if plan.is_upscale() {
            FilterType::CatmullRom
        } else {
            FilterType::Lanczos3
        };
        source.resize_exact(plan.scaled_width, plan.scaled_height, filter)
    };

    let crop = plan.crop;
    let output = scaled.crop_imm(crop.x, crop.y, crop.width, crop.height);

    let bytes = encode_delivery(&output, delivery)?;
    Ok(Delivered {
        bytes,
        media_type: delivery.format.media_type(),
        width: output.width(),
        height: output.height(),
    })
}

/// Peak allocation of the resample step: the `Rgba<f32>` intermediate that
/// `resize_exact` builds for its vertical pass (`source_w × scaled_h`) plus
/// the scaled output. `None` on overflow.
fn resize_bytes(source: (u32, u32), plan: &GeometryPlan, bytes_per_pixel: u64) -> Option<u64> {
    let output = buffer_bytes(plan.scaled_width, plan.scaled_height, bytes_per_pixel)?;
    if plan.is_identity_scale(source) {
        return Some(output);
    }
    let intermediate = buffer_bytes(source.0, plan.scaled_height, RESAMPLE_BYTES_PER_PIXEL)?;
    output.checked_add(intermediate)
}

fn encode_delivery(image: &DynamicImage, delivery: &DeliverySettings) -> Result<Vec<u8>, ImagingError> {
    let encode_err = |e: image::ImageError| ImagingError::Encode(e.to_string());
    match delivery.format {
        DeliveryFormat::WebP => {
            let mut out = Vec::new();
            to_rgb8_or_rgba8(image)
                .write_with_encoder(WebPEncoder::new_lossless(&mut out))
                .map_err(encode_err)?;
            Ok(out)
        }
        DeliveryFormat::Png => encode_png(image, CompressionType::Fast),
        DeliveryFormat::Jpeg => {
            let mut out = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut out, delivery.quality.value() as u8);
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(encode_err)?;
            Ok(out)
        }
        DeliveryFormat::Avif => encode_avif(image, delivery.speed, delivery.quality),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::{Quality, Speed};
    use crate::test_helpers::{animated_gif_bytes, png_bytes};
    use image::GenericImageView;

    fn webp() -> DeliverySettings {
        DeliverySettings::default()
    }

    fn run(master: &[u8], format: StoredFormat, w: u32, h: u32) -> Delivered {
        transform(
            master,
            format,
            TransformRequest::exact(w, h),
            &webp(),
            &DecodeLimits::default(),
        )
        .unwrap()
    }

    fn delivered_dims(d: &Delivered) -> (u32, u32) {
        image::load_from_memory(&d.bytes).unwrap().dimensions()
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    #[test]
    fn landscape_to_square() {
        let d = run(&png_bytes(1000, 800), StoredFormat::Png, 200, 200);
        assert_eq!(d.media_type, "image/webp");
        assert_eq!((d.width, d.height), (200, 200));
        assert_eq!(delivered_dims(&d), (200, 200));
    }

    #[test]
    fn portrait_to_landscape() {
        let d = run(&png_bytes(600, 800), StoredFormat::Png, 500, 400);
        assert_eq!(delivered_dims(&d), (500, 400));
    }

    #[test]
    fn upscale_is_allowed() {
        let d = run(&png_bytes(100, 50), StoredFormat::Png, 400, 400);
        assert_eq!(delivered_dims(&d), (400, 400));
    }

    #[test]
    fn identity_size() {
        let d = run(&png_bytes(64, 48), StoredFormat::Png, 64, 48);
        assert_eq!(delivered_dims(&d), (64, 48));
    }

    #[test]
    fn extreme_aspect_ratios() {
        let d = run(&png_bytes(2000, 10), StoredFormat::Png, 50, 50);
        assert_eq!(delivered_dims(&d), (50, 50));
        let d = run(&png_bytes(10, 2000), StoredFormat::Png, 300, 7);
        assert_eq!(delivered_dims(&d), (300, 7));
    }

    #[test]
    fn one_by_one() {
        let d = run(&png_bytes(320, 240), StoredFormat::Png, 1, 1);
        assert_eq!(delivered_dims(&d), (1, 1));
    }

    #[test]
    fn omitted_dimension_keeps_source_axis() {
        let d = transform(
            &png_bytes(1000, 800),
            StoredFormat::Png,
            TransformRequest {
                width: Some(200),
                height: None,
            },
            &webp(),
            &DecodeLimits::default(),
        )
        .unwrap();
        assert_eq!((d.width, d.height), (200, 800));
    }

    #[test]
    fn animated_master_uses_first_frame() {
        let d = run(&animated_gif_bytes(30, 20, 3), StoredFormat::Gif, 10, 10);
        assert_eq!(delivered_dims(&d), (10, 10));
    }

    // =========================================================================
    // Output
    // =========================================================================

    #[test]
    fn output_is_deterministic() {
        let master = png_bytes(300, 200);
        let a = run(&master, StoredFormat::Png, 120, 90);
        let b = run(&master, StoredFormat::Png, 120, 90);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn alternative_delivery_formats() {
        let master = png_bytes(80, 60);
        for (format, media_type) in [
            (DeliveryFormat::Png, "image/png"),
            (DeliveryFormat::Jpeg, "image/jpeg"),
            (DeliveryFormat::Avif, "image/avif"),
        ] {
            let settings = DeliverySettings {
                format,
                quality: Quality::new(80),
                speed: Speed::new(10),
            };
            let d = transform(
                &master,
                StoredFormat::Png,
                TransformRequest::exact(40, 40),
                &settings,
                &DecodeLimits::default(),
            )
            .unwrap();
            assert_eq!(d.media_type, media_type);
            assert_eq!((d.width, d.height), (40, 40));
            assert!(!d.bytes.is_empty());
        }
    }

    #[test]
    fn avif_master_is_decoded() {
        let master = encode_avif(
            &DynamicImage::new_rgb8(90, 60),
            Speed::new(10),
            Quality::new(80),
        )
        .unwrap();
        let d = run(&master, StoredFormat::Avif, 30, 30);
        assert_eq!(delivered_dims(&d), (30, 30));
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn zero_dimension_is_transform_error() {
        let err = transform(
            b"not even decoded",
            StoredFormat::Png,
            TransformRequest::exact(0, 10),
            &webp(),
            &DecodeLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::Transform(_)));
    }

    #[test]
    fn corrupt_master_is_decode_error() {
        let err = transform(
            b"garbage",
            StoredFormat::Avif,
            TransformRequest::exact(10, 10),
            &webp(),
            &DecodeLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::Decode(_)));
    }

    #[test]
    fn oversized_target_is_transform_error() {
        let limits = DecodeLimits { max_alloc: 4_000 };
        let err = transform(
            &png_bytes(10, 10),
            StoredFormat::Png,
            TransformRequest::exact(100, 100),
            &webp(),
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::Transform(_)));
    }

    #[test]
    fn huge_targets_are_transform_errors() {
        let master = png_bytes(4, 4);
        for request in [
            TransformRequest::exact(u32::MAX, u32::MAX),
            TransformRequest::exact(4_000_000_000, 1),
        ] {
            let err = transform(
                &master,
                StoredFormat::Png,
                request,
                &webp(),
                &DecodeLimits::default(),
            )
            .unwrap_err();
            assert!(matches!(err, ImagingError::Transform(_)), "{request:?}: {err:?}");
        }
    }

    // =========================================================================
    // Resize memory budget
    // =========================================================================

    #[test]
    fn resize_budget_counts_float_intermediate() {
        // 10x10 RGB8 -> 20x20: 10x20 Rgba<f32> intermediate + 20x20x3 output.
        let plan = plan_cover((10, 10), (20, 20)).unwrap();
        assert_eq!(resize_bytes((10, 10), &plan, 3), Some(10 * 20 * 16 + 20 * 20 * 3));

        // A pure crop resamples nothing.
        let plan = plan_cover((10, 10), (5, 10)).unwrap();
        assert_eq!(resize_bytes((10, 10), &plan, 3), Some(10 * 10 * 3));
    }

    #[test]
    fn resize_at_the_ceiling() {
        let master = png_bytes(10, 10);
        let request = TransformRequest::exact(20, 20);

        let at = DecodeLimits { max_alloc: 4_400 };
        let d = transform(&master, StoredFormat::Png, request, &webp(), &at).unwrap();
        assert_eq!(delivered_dims(&d), (20, 20));

        // The output alone (1200 bytes) fits; the intermediate does not.
        let below = DecodeLimits { max_alloc: 4_399 };
        let err = transform(&master, StoredFormat::Png, request, &webp(), &below).unwrap_err();
        assert!(matches!(err, ImagingError::Transform(_)));
    }
}
