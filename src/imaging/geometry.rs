//! Pure calculation functions for cover-fit geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// Axis-aligned crop window in scaled-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// How to turn a source image into an exact `target` rectangle.
///
/// The image is scaled uniformly by `scale` to `scaled_width × scaled_height`
/// (which always covers the target), then `crop` is extracted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryPlan {
    pub scale: f64,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub crop: CropRect,
}

impl GeometryPlan {
    /// True when the plan is a pure crop (no resampling needed).
    pub fn is_identity_scale(&self, source: (u32, u32)) -> bool {
        (self.scaled_width, self.scaled_height) == source
    }

    /// True when the plan enlarges the source.
    pub fn is_upscale(&self) -> bool {
        self.scale > 1.0
    }
}

/// Fill in omitted target dimensions from the source.
///
/// An omitted axis takes the source's own pixel size, so the cover scale
/// against that axis is 1.0.
///
/// ```
/// # use image_cdn::imaging::geometry::resolve_target;
/// assert_eq!(resolve_target((1000, 800), (Some(200), None)), (200, 800));
/// assert_eq!(resolve_target((1000, 800), (None, None)), (1000, 800));
/// ```
pub fn resolve_target(source: (u32, u32), requested: (Option<u32>, Option<u32>)) -> (u32, u32) {
    (
        requested.0.unwrap_or(source.0),
        requested.1.unwrap_or(source.1),
    )
}

/// Plan a cover-fit resize followed by a centered crop.
///
/// `scale = max(target_w / source_w, target_h / source_h)`, so one scaled
/// axis matches the target and the other meets or exceeds it. Scaled sizes
/// are rounded and then clamped up to the target so float error can never
/// leave the crop short by a pixel. Crop offsets truncate toward zero.
///
/// Returns `None` if any dimension is zero.
///
/// ```
/// # use image_cdn::imaging::geometry::plan_cover;
/// // 1000x800 → 200x200: scale 0.25 to 250x200, crop 25px off each side
/// let plan = plan_cover((1000, 800), (200, 200)).unwrap();
/// assert_eq!((plan.scaled_width, plan.scaled_height), (250, 200));
/// assert_eq!((plan.crop.x, plan.crop.y), (25, 0));
/// assert_eq!((plan.crop.width, plan.crop.height), (200, 200));
/// ```
pub fn plan_cover(source: (u32, u32), target: (u32, u32)) -> Option<GeometryPlan> {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;
    if src_w == 0 || src_h == 0 || tgt_w == 0 || tgt_h == 0 {
        return None;
    }

    let scale = (tgt_w as f64 / src_w as f64).max(tgt_h as f64 / src_h as f64);
    let scaled_width = scaled_edge(src_w, scale, tgt_w);
    let scaled_height = scaled_edge(src_h, scale, tgt_h);

    let x = (scaled_width - tgt_w) / 2;
    let y = (scaled_height - tgt_h) / 2;

    Some(GeometryPlan {
        scale,
        scaled_width,
        scaled_height,
        crop: CropRect {
            x,
            y,
            width: tgt_w.min(scaled_width - x),
            height: tgt_h.min(scaled_height - y),
        },
    })
}

fn scaled_edge(source: u32, scale: f64, target: u32) -> u32 {
    let scaled = (source as f64 * scale).round();
    if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        (scaled as u32).max(target)
    }
}
