//! # Image CDN
//!
//! An image upload and on-demand resize service. Uploads are stored once as a
//! compact master under a generated UUID; every retrieval resizes and crops
//! that master to the exact requested size and re-encodes it for delivery.
//!
//! # Architecture: Two Paths
//!
//! ```text
//! POST /save   multipart  →  classify  →  decode → ICC → AVIF master  →  images/Image-<id>.avif
//!                                     └─  SVG markup as-is            →  images/Image-<id>.svg
//!
//! GET  /get    uuid,w,h   →  validate  →  load master → cover-resize → center-crop → WebP
//! ```
//!
//! Nothing is cached between requests. The filesystem is the only state: an
//! asset's path is derived from its identifier, and its extension records the
//! format chosen at ingestion.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`http`] | axum router: upload form, `/save`, `/get`, envelope for every failure |
//! | [`pipeline`] | Ingestion and retrieval orchestration on the imaging pool |
//! | [`classify`] | Declared media type → raster, vector or rejected |
//! | [`identifier`] | UUID v4 asset identifiers and the `Image-<id>` file stem |
//! | [`store`] | File-system asset store with atomic writes |
//! | [`imaging`] | Decode, ICC normalization, master encode, resize/crop, delivery encode |
//! | [`validate`] | Retrieval query validation (`uuid`, `width`, `height`) |
//! | [`error`] | `ServiceError`: categories, status codes, JSON envelope |
//! | [`config`] | `image-cdn.toml` loading, merging with stock defaults, validation |
//! | [`logging`] | `tracing-subscriber` setup (`RUST_LOG`, optional JSON) |
//!
//! # Design Decisions
//!
//! ## AVIF Masters, WebP Delivery
//!
//! Masters are written once and read on every request, so they favour size:
//! AVIF at quality 90. Delivery favours fast decode on the client and a
//! pure-Rust encoder; the default is lossless WebP. Both are configurable.
//!
//! Some sources cannot survive a trip through an 8-bit still AVIF. Animated
//! GIF, WebP and APNG uploads are kept in their original container; 16-bit and
//! float sources become 16-bit PNG. These are explicit degradations, not errors.
//!
//! ## Cover-Fit, Never Letterbox
//!
//! A retrieval always returns exactly `width × height` pixels. The master is
//! scaled just enough to cover the box and the excess is cropped evenly from
//! both sides. See [`imaging::geometry`].
//!
//! ## Image Work Off the Async Runtime
//!
//! Decode, encode and store I/O run on a fixed rayon pool owned by
//! [`imaging::ImagingContext`]. The number of accepted connections is
//! unbounded by this; the number of images in memory at once is not.
//!
//! ## Pure-Rust Imaging
//!
//! `image` decodes and encodes, `rav1e` (via `image`) encodes AVIF and
//! `rav1d` decodes it. ICC profiles are parsed and applied in [`imaging`]
//! directly. There are no system libraries to install.

pub mod classify;
pub mod config;
pub mod error;
pub mod http;
pub mod identifier;
pub mod imaging;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_helpers;
