//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** (JPEG, PNG, GIF, TIFF, WebP) | `image` crate, with [`DecodeLimits`] |
//! | **Decode** (AVIF) | `avif-parse` + `rav1d` + custom YUV→RGB |
//! | **ICC → sRGB** | custom matrix/TRC profile reader |
//! | **Master encode** | AVIF via rav1e; 16-bit PNG / original container fallbacks |
//! | **Resize** | `resize_exact`, Lanczos3 (shrink) / CatmullRom (enlarge) |
//! | **Delivery encode** | lossless WebP, PNG, JPEG or AVIF |
//!
//! The module is split into:
//! - **Geometry**: Pure functions for cover-fit math (unit testable)
//! - **Parameters**: Encoder settings built once from config
//! - **Codecs**: [`decode`], `avif`, `icc`
//! - **Operations**: [`master::encode_master`] and [`transform::transform`]
//! - **Context**: [`ImagingContext`], the worker pool every operation runs on

mod avif;
mod context;
pub mod decode;
mod error;
pub mod geometry;
mod icc;
pub mod master;
mod params;
pub mod transform;

pub use context::{ContextSettings, ImagingContext};
pub use decode::{DecodeLimits, DecodedUpload, decode_upload};
pub use error::ImagingError;
pub use icc::{IccError, IccOutcome};
pub use master::{MasterImage, encode_master};
pub use params::{DeliveryFormat, DeliverySettings, MasterSettings, Quality, Speed};
pub use transform::{Delivered, TransformRequest, transform};
