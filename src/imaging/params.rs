//! Encoder settings.
//!
//! These types describe *how hard* to encode, not what to encode. The master
//! encoder and the delivery encoder each take one settings struct built from
//! config once at startup.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`Speed`]: rav1e effort (1–10, higher is faster). Clamped on construction.
//! - [`MasterSettings`]: AVIF master quality + speed.
//! - [`DeliveryFormat`] / [`DeliverySettings`]: retrieval output format and its knobs.

use serde::{Deserialize, Serialize};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// AVIF encoder speed (1 = slowest/smallest, 10 = fastest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Speed(pub u8);

impl Speed {
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 10))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self(5)
    }
}

/// At-rest master encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasterSettings {
    pub quality: Quality,
    pub speed: Speed,
}

/// Output format produced at retrieval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFormat {
    /// Lossless WebP, the only WebP mode the pure-Rust encoder offers.
    #[default]
    WebP,
    Png,
    Jpeg,
    Avif,
}

impl DeliveryFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            DeliveryFormat::WebP => "image/webp",
            DeliveryFormat::Png => "image/png",
            DeliveryFormat::Jpeg => "image/jpeg",
            DeliveryFormat::Avif => "image/avif",
        }
    }
}

/// Retrieval-time encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    pub format: DeliveryFormat,
    /// Used by JPEG and AVIF.
    pub quality: Quality,
    /// Used by AVIF only.
    pub speed: Speed,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            format: DeliveryFormat::WebP,
            quality: Quality::new(80),
            speed: Speed::new(8),
        }
    }
}
