//! Upload classification by declared media type.
//!
//! The declared type from the multipart part header picks the storage path:
//! SVG markup is stored verbatim, every other `image/*` type goes through the
//! raster pipeline. Nothing here looks at the payload bytes; a raster upload
//! whose bytes don't decode fails later, in the decoder.

/// Storage path selected for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Raster,
    Vector,
    Rejected,
}

/// Classify an upload by its declared media type.
///
/// Parameters after `;` are ignored and the comparison is case-insensitive.
///
/// ```
/// use image_cdn::classify::{MediaClass, classify};
/// assert_eq!(classify(Some("image/jpeg")), MediaClass::Raster);
/// assert_eq!(classify(Some("image/svg+xml; charset=utf-8")), MediaClass::Vector);
/// assert_eq!(classify(Some("text/plain")), MediaClass::Rejected);
/// assert_eq!(classify(None), MediaClass::Rejected);
/// ```
pub fn classify(declared: Option<&str>) -> MediaClass {
    let Some(declared) = declared else {
        return MediaClass::Rejected;
    };
    let essence = declared
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let Some(subtype) = essence.strip_prefix("image/") else {
        return MediaClass::Rejected;
    };
    if subtype.is_empty() {
        MediaClass::Rejected
    } else if subtype.starts_with("svg") {
        MediaClass::Vector
    } else {
        MediaClass::Raster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_raster_types() {
        for t in ["image/jpeg", "image/png", "image/gif", "image/webp", "image/avif", "image/tiff"] {
            assert_eq!(classify(Some(t)), MediaClass::Raster, "{t}");
        }
    }

    #[test]
    fn svg_is_vector() {
        assert_eq!(classify(Some("image/svg+xml")), MediaClass::Vector);
        assert_eq!(classify(Some("image/svg")), MediaClass::Vector);
    }

    #[test]
    fn case_and_parameters_ignored() {
        assert_eq!(classify(Some("IMAGE/PNG")), MediaClass::Raster);
        assert_eq!(classify(Some(" image/SVG+XML ; charset=utf-8")), MediaClass::Vector);
    }

    #[test]
    fn non_image_rejected() {
        assert_eq!(classify(Some("text/plain")), MediaClass::Rejected);
        assert_eq!(classify(Some("application/octet-stream")), MediaClass::Rejected);
        assert_eq!(classify(Some("video/mp4")), MediaClass::Rejected);
    }

    #[test]
    fn missing_or_truncated_rejected() {
        assert_eq!(classify(None), MediaClass::Rejected);
        assert_eq!(classify(Some("")), MediaClass::Rejected);
        assert_eq!(classify(Some("image")), MediaClass::Rejected);
        assert_eq!(classify(Some("image/")), MediaClass::Rejected);
        assert_eq!(classify(Some("imag")), MediaClass::Rejected);
    }
}
