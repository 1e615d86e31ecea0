//! AVIF decoding: `avif-parse` for the container, `rav1d` for the AV1 payload.
//!
//! The `image` crate's `"avif"` feature only provides the encoder (rav1e);
//! its decoder needs the C dav1d library. `rav1d` is the pure Rust port, driven
//! here through its dav1d-compatible C API.
//!
//! Both the primary (color) item and the optional alpha auxiliary item are
//! decoded. Output is always 8 bits per channel; higher bit depths are scaled.

use super::error::ImagingError;
use image::{DynamicImage, RgbImage, RgbaImage};
use rav1d::include::dav1d::data::Dav1dData;
use rav1d::include::dav1d::dav1d::Dav1dSettings;
use rav1d::include::dav1d::headers::{
    DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
    DAV1D_PIXEL_LAYOUT_I444,
};
use rav1d::include::dav1d::picture::Dav1dPicture;
use std::io::Cursor;
use std::ptr::NonNull;

fn parse(bytes: &[u8]) -> Result<avif_parse::AvifData, ImagingError> {
    avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| ImagingError::Decode(format!("AVIF container: {e:?}")))
}

/// Pixel dimensions from the container metadata, without decoding.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32), ImagingError> {
    let avif = parse(bytes)?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| ImagingError::Decode(format!("AVIF metadata: {e:?}")))?;
    Ok((meta.max_frame_width.get(), meta.max_frame_height.get()))
}

/// Decode an AVIF file to RGB8, or RGBA8 when it carries an alpha item.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    let avif = parse(bytes)?;

    let (w, h, rgb) = decode_av1(&avif.primary_item, |planes| {
        Ok((planes.width, planes.height, planes.to_rgb()?))
    })
    .map_err(ImagingError::Decode)?;

    let Some(alpha_item) = avif.alpha_item.as_deref() else {
        return RgbImage::from_raw(w, h, rgb)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| ImagingError::Decode("decoded AVIF buffer size mismatch".into()));
    };

    let (aw, ah, alpha) = decode_av1(alpha_item, |planes| {
        Ok((planes.width, planes.height, planes.to_luma()?))
    })
    .map_err(|e| ImagingError::Decode(format!("alpha plane: {e}")))?;
    if (aw, ah) != (w, h) {
        return Err(ImagingError::Decode(format!(
            "alpha plane is {aw}x{ah}, color is {w}x{h}"
        )));
    }

    let mut rgba = Vec::with_capacity(sample_count(w, h, 4).map_err(ImagingError::Decode)?);
    for (px, &a) in rgb.chunks_exact(3).zip(&alpha) {
        if avif.premultiplied_alpha {
            rgba.extend(px.iter().map(|&c| unpremultiply(c, a)));
        } else {
            rgba.extend_from_slice(px);
        }
        rgba.push(a);
    }

    RgbaImage::from_raw(w, h, rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| ImagingError::Decode("decoded AVIF buffer size mismatch".into()))
}

fn unpremultiply(c: u8, a: u8) -> u8 {
    if a == 0 {
        0
    } else {
        ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8
    }
}

/// Run one AV1 still image through rav1d and hand the picture to `convert`.
///
/// The decoder context and picture are released on every path.
fn decode_av1<T>(
    av1_bytes: &[u8],
    convert: impl FnOnce(&YuvPlanes) -> Result<T, String>,
) -> Result<T, String> {
    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    unsafe {
        rav1d::src::lib::dav1d_default_settings(NonNull::from(&mut settings).cast::<Dav1dSettings>())
    };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc =
        unsafe { rav1d::src::lib::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(format!("rav1d open failed ({})", rc.0));
    }

    let result = (|| {
        let mut data = Dav1dData::default();
        let buf_ptr = unsafe {
            rav1d::src::lib::dav1d_data_create(NonNull::new(&mut data), av1_bytes.len())
        };
        if buf_ptr.is_null() {
            return Err("rav1d data_create failed".to_string());
        }
        unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf_ptr, av1_bytes.len()) };

        let rc = unsafe { rav1d::src::lib::dav1d_send_data(ctx, NonNull::new(&mut data)) };
        if rc.0 != 0 {
            unsafe { rav1d::src::lib::dav1d_data_unref(NonNull::new(&mut data)) };
            return Err(format!("rav1d send_data failed ({})", rc.0));
        }

        let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
        let rc = unsafe { rav1d::src::lib::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
        if rc.0 != 0 {
            return Err(format!("rav1d get_picture failed ({})", rc.0));
        }

        let converted = YuvPlanes::of(&pic).and_then(|planes| convert(&planes));
        unsafe { rav1d::src::lib::dav1d_picture_unref(NonNull::new(&mut pic)) };
        converted
    })();

    unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
    result
}

/// Borrowed view of a decoded picture's YUV planes.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling: horizontal, vertical (e.g. I420 = true, true)
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    fn of(pic: &Dav1dPicture) -> Result<Self, String> {
        let width = pic.p.w as u32;
        let height = pic.p.h as u32;
        let layout = pic.p.layout;
        let y_ptr = pic.data[0]
            .ok_or("picture has no luma plane")?
            .as_ptr() as *const u8;

        let (u_ptr, v_ptr, ss_x, ss_y, monochrome) = if layout == DAV1D_PIXEL_LAYOUT_I400 {
            (y_ptr, y_ptr, false, false, true)
        } else {
            let (ss_x, ss_y) = match layout {
                DAV1D_PIXEL_LAYOUT_I420 => (true, true),
                DAV1D_PIXEL_LAYOUT_I422 => (true, false),
                DAV1D_PIXEL_LAYOUT_I444 => (false, false),
                _ => return Err(format!("unsupported AVIF pixel layout: {layout}")),
            };
            let u_ptr = pic.data[1].ok_or("picture has no U plane")?.as_ptr() as *const u8;
            let v_ptr = pic.data[2].ok_or("picture has no V plane")?.as_ptr() as *const u8;
            (u_ptr, v_ptr, ss_x, ss_y, false)
        };

        Ok(Self {
            y_ptr,
            u_ptr,
            v_ptr,
            y_stride: pic.stride[0],
            uv_stride: if monochrome { 0 } else { pic.stride[1] },
            width,
            height,
            bpc: pic.p.bpc as u32,
            ss_x,
            ss_y,
            monochrome,
        })
    }

    fn scale(&self) -> f32 {
        255.0 / ((1u32 << self.bpc) - 1) as f32
    }

    /// Convert YUV planes to interleaved RGB8 using BT.601 coefficients.
    fn to_rgb(&self) -> Result<Vec<u8>, String> {
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = self.scale();

        let mut rgb = vec![0u8; sample_count(self.width, self.height, 3)?];
        let row_len = self.width as usize * 3;

        for row in 0..self.height {
            for col in 0..self.width {
                let y_val = read_pixel(self.y_ptr, self.y_stride, col, row, self.bpc);

                let (r, g, b) = if self.monochrome {
                    let v = (y_val * scale).clamp(0.0, 255.0);
                    (v, v, v)
                } else {
                    let u_col = if self.ss_x { col / 2 } else { col };
                    let u_row = if self.ss_y { row / 2 } else { row };
                    let cb = read_pixel(self.u_ptr, self.uv_stride, u_col, u_row, self.bpc) - center;
                    let cr = read_pixel(self.v_ptr, self.uv_stride, u_col, u_row, self.bpc) - center;

                    (
                        ((y_val + 1.402 * cr) * scale).clamp(0.0, 255.0),
                        ((y_val - 0.344136 * cb - 0.714136 * cr) * scale).clamp(0.0, 255.0),
                        ((y_val + 1.772 * cb) * scale).clamp(0.0, 255.0),
                    )
                };

                let idx = row as usize * row_len + col as usize * 3;
                rgb[idx] = r.round() as u8;
                rgb[idx + 1] = g.round() as u8;
                rgb[idx + 2] = b.round() as u8;
            }
        }

        Ok(rgb)
    }

    /// Luma plane only, as 8-bit samples. Used for the alpha item.
    fn to_luma(&self) -> Result<Vec<u8>, String> {
        let scale = self.scale();
        let mut out = Vec::with_capacity(sample_count(self.width, self.height, 1)?);
        for row in 0..self.height {
            for col in 0..self.width {
                let v = read_pixel(self.y_ptr, self.y_stride, col, row, self.bpc);
                out.push((v * scale).round().clamp(0.0, 255.0) as u8);
            }
        }
        Ok(out)
    }
}

/// Interleaved buffer length for a `width × height` picture.
fn sample_count(width: u32, height: u32, channels: usize) -> Result<usize, String> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| format!("{width}x{height} picture does not fit in memory"))
}

/// Read a single sample from a plane, handling both 8-bit and 16-bit storage.
#[inline]
fn read_pixel(ptr: *const u8, stride: isize, x: u32, y: u32, bpc: u32) -> f32 {
    if bpc <= 8 {
        (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
    } else {
        // 10-bit and 12-bit are stored as u16
        let byte_offset = y as isize * stride + x as isize * 2;
        (unsafe { (ptr.offset(byte_offset) as *const u16).read_unaligned() }) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::avif::AvifEncoder;
    use image::{GenericImageView, ImageEncoder};

    fn encode_avif(img: &DynamicImage) -> Vec<u8> {
        let mut out = Vec::new();
        AvifEncoder::new_with_speed_quality(&mut out, 10, 90)
            .write_image(img.as_bytes(), img.width(), img.height(), img.color().into())
            .unwrap();
        out
    }

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn dimensions_from_container() {
        let bytes = encode_avif(&gradient(120, 80));
        assert_eq!(dimensions(&bytes).unwrap(), (120, 80));
    }

    #[test]
    fn decode_roundtrip_dimensions() {
        let bytes = encode_avif(&gradient(64, 48));
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn decode_preserves_flat_color() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, image::Rgb([200, 60, 30])));
        let decoded = decode(&encode_avif(&img)).unwrap().to_rgb8();
        let [r, g, b] = decoded.get_pixel(16, 16).0;
        assert!(r.abs_diff(200) < 12 && g.abs_diff(60) < 12 && b.abs_diff(30) < 12, "{r} {g} {b}");
    }

    #[test]
    fn decode_with_alpha_item() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(32, 16, |x, _| {
            image::Rgba([10, 200, 10, if x < 16 { 255 } else { 0 }])
        }));
        let decoded = decode(&encode_avif(&img)).unwrap();
        assert!(decoded.color().has_alpha());
        let rgba = decoded.to_rgba8();
        assert!(rgba.get_pixel(2, 8).0[3] > 240);
        assert!(rgba.get_pixel(30, 8).0[3] < 15);
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(decode(b"not an avif"), Err(ImagingError::Decode(_))));
        assert!(matches!(dimensions(b""), Err(ImagingError::Decode(_))));
    }

    #[test]
    fn sample_count_overflow_is_an_error() {
        assert_eq!(sample_count(4, 2, 3), Ok(24));
        assert_eq!(sample_count(0, 7, 4), Ok(0));
        assert!(sample_count(u32::MAX, u32::MAX, 3).is_err());
    }

    #[test]
    fn unpremultiply_edges() {
        assert_eq!(unpremultiply(0, 0), 0);
        assert_eq!(unpremultiply(100, 255), 100);
        assert_eq!(unpremultiply(64, 128), 128);
        assert_eq!(unpremultiply(200, 100), 255);
    }
}
