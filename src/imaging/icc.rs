//! ICC profile normalization to sRGB.
//!
//! Masters are stored without metadata, so any embedded color profile has to
//! be baked into the pixels at ingestion. This module handles the profiles
//! cameras, phones and editors actually embed: matrix/TRC RGB profiles
//! (Display P3, Adobe RGB, ProPhoto, linear sRGB …) and gray TRC profiles,
//! by re-projecting through the D50 profile connection space:
//!
//! ```text
//! device RGB ──TRC──▶ linear ──colorants──▶ XYZ(D50) ──sRGB⁻¹──▶ linear sRGB ──OETF──▶ sRGB
//! ```
//!
//! Anything else (LUT-only profiles, CMYK/Lab profiles, truncated or
//! self-inconsistent data) is discarded and the pixels are taken as sRGB.
//!
//! Profile parsing is a minimal reader of the ICC.1 header, tag table, and
//! the `XYZ `, `curv` and `para` tag types. No external dependencies.

use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IccError {
    #[error("profile truncated")]
    Truncated,
    #[error("declared size {declared} does not match {actual} bytes")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("missing 'acsp' signature")]
    BadSignature,
    #[error("profile color space {0:?} does not match the decoded pixels")]
    ColorSpaceMismatch(String),
    #[error("missing or unsupported tag {0}")]
    MissingTag(&'static str),
    #[error("unsupported curve: {0}")]
    UnsupportedCurve(String),
    #[error("colorant matrix is singular")]
    SingularMatrix,
}

/// What happened to the embedded profile.
#[derive(Debug, Clone, PartialEq)]
pub enum IccOutcome {
    /// No profile embedded; pixels taken as sRGB.
    Absent,
    /// Profile is equivalent to sRGB; pixels unchanged.
    AlreadySrgb,
    /// Pixels re-projected to sRGB.
    Converted { description: Option<String> },
    /// Profile unusable; pixels taken as sRGB.
    Discarded(IccError),
}

/// sRGB primaries adapted to D50 (Bradford), i.e. the `rXYZ/gXYZ/bXYZ`
/// columns of a standard sRGB profile.
const SRGB_D50: [[f64; 3]; 3] = [
    [0.436_074_7, 0.385_064_9, 0.143_080_4],
    [0.222_504_5, 0.716_878_6, 0.060_616_9],
    [0.013_932_2, 0.097_104_5, 0.714_173_3],
];

/// Inverse of [`SRGB_D50`]: XYZ(D50) → linear sRGB.
const XYZ_D50_TO_SRGB: [[f64; 3]; 3] = [
    [3.133_856_1, -1.616_866_7, -0.490_614_6],
    [-0.978_768_4, 1.916_141_5, 0.033_454_0],
    [0.071_945_3, -0.228_991_0, 1.405_242_7],
];

const COLORANT_TOLERANCE: f64 = 0.002;
const CURVE_TOLERANCE: f64 = 0.004;

// ---------------------------------------------------------------------------
// Tone curves
// ---------------------------------------------------------------------------

/// A device → linear transfer function.
#[derive(Debug, Clone, PartialEq)]
enum ToneCurve {
    Identity,
    Gamma(f64),
    /// Samples over `[0, 1]`, normalized to `[0, 1]`.
    Table(Vec<f64>),
    /// ICC parametric function types 0–4, params padded to 7.
    Parametric { kind: u16, p: [f64; 7] },
}

impl ToneCurve {
    fn eval(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let y = match self {
            ToneCurve::Identity => x,
            ToneCurve::Gamma(g) => x.powf(*g),
            ToneCurve::Table(t) => {
                let pos = x * (t.len() - 1) as f64;
                let i = pos.floor() as usize;
                if i + 1 >= t.len() {
                    t[t.len() - 1]
                } else {
                    let frac = pos - i as f64;
                    t[i] + (t[i + 1] - t[i]) * frac
                }
            }
            ToneCurve::Parametric { kind, p } => {
                let [g, a, b, c, d, e, f] = *p;
                match kind {
                    0 => x.powf(g),
                    1 => {
                        if x >= -b / a {
                            (a * x + b).max(0.0).powf(g)
                        } else {
                            0.0
                        }
                    }
                    2 => {
                        if x >= -b / a {
                            (a * x + b).max(0.0).powf(g) + c
                        } else {
                            c
                        }
                    }
                    3 => {
                        if x >= d {
                            (a * x + b).max(0.0).powf(g)
                        } else {
                            c * x
                        }
                    }
                    _ => {
                        if x >= d {
                            (a * x + b).max(0.0).powf(g) + e
                        } else {
                            c * x + f
                        }
                    }
                }
            }
        };
        y.clamp(0.0, 1.0)
    }

    fn is_srgb(&self) -> bool {
        (0..=16).all(|i| {
            let x = i as f64 / 16.0;
            (self.eval(x) - srgb_eotf(x)).abs() < CURVE_TOLERANCE
        })
    }
}

fn srgb_eotf(v: f64) -> f64 {
    if v <= 0.040_45 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn srgb_oetf(l: f64) -> f64 {
    let l = l.clamp(0.0, 1.0);
    if l <= 0.003_130_8 {
        l * 12.92
    } else {
        1.055 * l.powf(1.0 / 2.4) - 0.055
    }
}

// ---------------------------------------------------------------------------
// Profile parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Profile {
    Rgb {
        /// Columns are the r, g, b colorants in XYZ(D50).
        colorants: [[f64; 3]; 3],
        curves: [ToneCurve; 3],
    },
    Gray {
        curve: ToneCurve,
    },
}

#[derive(Debug)]
struct ParsedProfile {
    profile: Profile,
    description: Option<String>,
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn bytes(&self, at: usize, len: usize) -> Result<&'a [u8], IccError> {
        at.checked_add(len)
            .and_then(|end| self.data.get(at..end))
            .ok_or(IccError::Truncated)
    }

    fn u16(&self, at: usize) -> Result<u16, IccError> {
        let b = self.bytes(at, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&self, at: usize) -> Result<u32, IccError> {
        let b = self.bytes(at, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn s15f16(&self, at: usize) -> Result<f64, IccError> {
        Ok(self.u32(at)? as i32 as f64 / 65536.0)
    }

    fn sig(&self, at: usize) -> Result<[u8; 4], IccError> {
        let b = self.bytes(at, 4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }
}

/// Tag table lookup: returns the tag's bytes.
fn find_tag<'a>(r: &Reader<'a>, wanted: &[u8; 4]) -> Result<Option<&'a [u8]>, IccError> {
    let count = r.u32(128)? as usize;
    if count > (r.data.len().saturating_sub(132)) / 12 {
        return Err(IccError::Truncated);
    }
    for i in 0..count {
        let entry = 132 + i * 12;
        if &r.sig(entry)? == wanted {
            let offset = r.u32(entry + 4)? as usize;
            let size = r.u32(entry + 8)? as usize;
            return r.bytes(offset, size).map(Some);
        }
    }
    Ok(None)
}

fn read_xyz(r: &Reader<'_>, tag: &'static str) -> Result<[f64; 3], IccError> {
    let data = find_tag(r, sig(tag))?.ok_or(IccError::MissingTag(tag))?;
    let t = Reader { data };
    if &t.sig(0)? != b"XYZ " {
        return Err(IccError::MissingTag(tag));
    }
    Ok([t.s15f16(8)?, t.s15f16(12)?, t.s15f16(16)?])
}

fn read_curve(r: &Reader<'_>, tag: &'static str) -> Result<ToneCurve, IccError> {
    let data = find_tag(r, sig(tag))?.ok_or(IccError::MissingTag(tag))?;
    let t = Reader { data };
    match &t.sig(0)? {
        b"curv" => {
            let n = t.u32(8)? as usize;
            match n {
                0 => Ok(ToneCurve::Identity),
                1 => Ok(ToneCurve::Gamma(t.u16(12)? as f64 / 256.0)),
                _ => {
                    let table = (0..n)
                        .map(|i| t.u16(12 + i * 2).map(|v| v as f64 / 65535.0))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(ToneCurve::Table(table))
                }
            }
        }
        b"para" => {
            let kind = t.u16(8)?;
            let n = match kind {
                0 => 1,
                1 => 3,
                2 => 4,
                3 => 5,
                4 => 7,
                other => {
                    return Err(IccError::UnsupportedCurve(format!(
                        "parametric type {other}"
                    )));
                }
            };
            let mut p = [0.0; 7];
            for (i, slot) in p.iter_mut().take(n).enumerate() {
                *slot = t.s15f16(12 + i * 4)?;
            }
            if kind != 0 && p[1] == 0.0 {
                return Err(IccError::UnsupportedCurve("parametric a = 0".into()));
            }
            Ok(ToneCurve::Parametric { kind, p })
        }
        other => Err(IccError::UnsupportedCurve(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

/// Best-effort profile description for logs (`desc` or `mluc`).
fn read_description(r: &Reader<'_>) -> Option<String> {
    let data = find_tag(r, b"desc").ok().flatten()?;
    let t = Reader { data };
    let text = match &t.sig(0).ok()? {
        b"desc" => {
            let len = t.u32(8).ok()? as usize;
            let raw = t.bytes(12, len).ok()?;
            String::from_utf8_lossy(raw).into_owned()
        }
        b"mluc" => {
            let records = t.u32(8).ok()?;
            if records == 0 {
                return None;
            }
            let len = t.u32(20).ok()? as usize;
            let offset = t.u32(24).ok()? as usize;
            let raw = t.bytes(offset, len).ok()?;
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => return None,
    };
    let text = text.trim_end_matches('\0').trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn sig(tag: &'static str) -> &'static [u8; 4] {
    tag.as_bytes().try_into().unwrap_or(b"\0\0\0\0")
}

fn parse(data: &[u8]) -> Result<ParsedProfile, IccError> {
    let r = Reader { data };
    let declared = r.u32(0)? as usize;
    if data.len() < 132 {
        return Err(IccError::Truncated);
    }
    if declared != data.len() {
        return Err(IccError::SizeMismatch {
            declared,
            actual: data.len(),
        });
    }
    if &r.sig(36)? != b"acsp" {
        return Err(IccError::BadSignature);
    }

    let color_space = r.sig(16)?;
    let profile = match &color_space {
        b"RGB " => Profile::Rgb {
            colorants: {
                let [rx, ry, rz] = read_xyz(&r, "rXYZ")?;
                let [gx, gy, gz] = read_xyz(&r, "gXYZ")?;
                let [bx, by, bz] = read_xyz(&r, "bXYZ")?;
                [[rx, gx, bx], [ry, gy, by], [rz, gz, bz]]
            },
            curves: [
                read_curve(&r, "rTRC")?,
                read_curve(&r, "gTRC")?,
                read_curve(&r, "bTRC")?,
            ],
        },
        b"GRAY" => Profile::Gray {
            curve: read_curve(&r, "kTRC")?,
        },
        other => {
            return Err(IccError::ColorSpaceMismatch(
                String::from_utf8_lossy(other).trim().to_string(),
            ));
        }
    };

    Ok(ParsedProfile {
        profile,
        description: read_description(&r),
    })
}

// ---------------------------------------------------------------------------
// Pixel conversion
// ---------------------------------------------------------------------------

fn mat_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Sample types the converter works on.
trait Sample: Copy {
    const LEVELS: usize;
    fn index(self) -> usize;
    fn from_unit(v: f64) -> Self;
}

impl Sample for u8 {
    const LEVELS: usize = 256;
    fn index(self) -> usize {
        self as usize
    }
    fn from_unit(v: f64) -> Self {
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    }
}

impl Sample for u16 {
    const LEVELS: usize = 65536;
    fn index(self) -> usize {
        self as usize
    }
    fn from_unit(v: f64) -> Self {
        (v * 65535.0).round().clamp(0.0, 65535.0) as u16
    }
}

fn linearize_lut<S: Sample>(curve: &ToneCurve) -> Vec<f64> {
    let max = (S::LEVELS - 1) as f64;
    (0..S::LEVELS).map(|i| curve.eval(i as f64 / max)).collect()
}

/// Convert interleaved RGB(A) samples in place. Alpha is untouched.
fn convert_rgb<S: Sample>(
    samples: &mut [S],
    channels: usize,
    curves: &[ToneCurve; 3],
    matrix: &[[f64; 3]; 3],
) {
    let luts = [
        linearize_lut::<S>(&curves[0]),
        linearize_lut::<S>(&curves[1]),
        linearize_lut::<S>(&curves[2]),
    ];
    for px in samples.chunks_exact_mut(channels) {
        let lin = [
            luts[0][px[0].index()],
            luts[1][px[1].index()],
            luts[2][px[2].index()],
        ];
        for (c, row) in matrix.iter().enumerate() {
            let v = row[0] * lin[0] + row[1] * lin[1] + row[2] * lin[2];
            px[c] = S::from_unit(srgb_oetf(v));
        }
    }
}

fn convert_gray<S: Sample>(samples: &mut [S], channels: usize, curve: &ToneCurve) {
    let lut: Vec<S> = linearize_lut::<S>(curve)
        .into_iter()
        .map(|l| S::from_unit(srgb_oetf(l)))
        .collect();
    for px in samples.chunks_exact_mut(channels) {
        px[0] = lut[px[0].index()];
    }
}

fn is_srgb_profile(profile: &Profile) -> bool {
    match profile {
        Profile::Rgb { colorants, curves } => {
            let colorants_match = colorants
                .iter()
                .flatten()
                .zip(SRGB_D50.iter().flatten())
                .all(|(a, b)| (a - b).abs() < COLORANT_TOLERANCE);
            colorants_match && curves.iter().all(ToneCurve::is_srgb)
        }
        Profile::Gray { curve } => curve.is_srgb(),
    }
}

/// Re-project `image` from its embedded profile to sRGB.
///
/// Never fails: unusable profiles are reported as [`IccOutcome::Discarded`]
/// and the pixels are returned unchanged. Float images are narrowed to
/// 16 bits per channel first.
pub fn normalize(image: DynamicImage, profile: Option<&[u8]>) -> (DynamicImage, IccOutcome) {
    let image = match image {
        DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb16(image.to_rgb16()),
        DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba16(image.to_rgba16()),
        other => other,
    };

    let Some(data) = profile.filter(|p| !p.is_empty()) else {
        return (image, IccOutcome::Absent);
    };
    let parsed = match parse(data) {
        Ok(parsed) => parsed,
        Err(e) => return (image, IccOutcome::Discarded(e)),
    };
    if is_srgb_profile(&parsed.profile) {
        return (image, IccOutcome::AlreadySrgb);
    }

    let is_gray_pixels = matches!(
        image,
        DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
    );

    match (&parsed.profile, is_gray_pixels) {
        (Profile::Rgb { .. }, true) => {
            return (image, IccOutcome::Discarded(IccError::ColorSpaceMismatch("RGB".into())));
        }
        (Profile::Gray { .. }, false) => {
            return (image, IccOutcome::Discarded(IccError::ColorSpaceMismatch("GRAY".into())));
        }
        _ => {}
    }

    let mut image = image;
    let supported = match &parsed.profile {
        Profile::Rgb { colorants, curves } => {
            if determinant(colorants).abs() < 1e-6 {
                return (image, IccOutcome::Discarded(IccError::SingularMatrix));
            }
            let matrix = mat_mul(&XYZ_D50_TO_SRGB, colorants);
            match &mut image {
                DynamicImage::ImageRgb8(buf) => {
                    convert_rgb::<u8>(buf, 3, curves, &matrix);
                    true
                }
                DynamicImage::ImageRgba8(buf) => {
                    convert_rgb::<u8>(buf, 4, curves, &matrix);
                    true
                }
                DynamicImage::ImageRgb16(buf) => {
                    convert_rgb::<u16>(buf, 3, curves, &matrix);
                    true
                }
                DynamicImage::ImageRgba16(buf) => {
                    convert_rgb::<u16>(buf, 4, curves, &matrix);
                    true
                }
                _ => false,
            }
        }
        Profile::Gray { curve } => match &mut image {
            DynamicImage::ImageLuma8(buf) => {
                convert_gray::<u8>(buf, 1, curve);
                true
            }
            DynamicImage::ImageLumaA8(buf) => {
                convert_gray::<u8>(buf, 2, curve);
                true
            }
            DynamicImage::ImageLuma16(buf) => {
                convert_gray::<u16>(buf, 1, curve);
                true
            }
            DynamicImage::ImageLumaA16(buf) => {
                convert_gray::<u16>(buf, 2, curve);
                true
            }
            _ => false,
        },
    };
    if !supported {
        let space = match parsed.profile {
            Profile::Rgb { .. } => "RGB",
            Profile::Gray { .. } => "GRAY",
        };
        return (
            image,
            IccOutcome::Discarded(IccError::ColorSpaceMismatch(space.into())),
        );
    }

    (
        image,
        IccOutcome::Converted {
            description: parsed.description,
        },
    )
}
