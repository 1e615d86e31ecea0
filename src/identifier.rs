//! Asset identifiers.
//!
//! Every stored asset is keyed by a random 128-bit UUID (v4). The identifier
//! is allocated independently of the uploaded content, so two uploads of the
//! same bytes produce two distinct assets. Together with the fixed
//! `Image-<id>.<ext>` naming convention in [`store`](crate::store) the
//! identifier is the whole durable storage key. There is no index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// File stem prefix shared by every stored asset.
pub const FILE_PREFIX: &str = "Image-";

/// Opaque identifier of a stored asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Allocate a fresh identifier.
    ///
    /// Backed by the OS random source; collisions are not a practical concern
    /// at any scale a single filesystem can hold.
    pub fn allocate() -> Self {
        Self(Uuid::new_v4())
    }

    /// File stem for this asset, without extension (`Image-<id>`).
    pub fn file_stem(&self) -> String {
        format!("{FILE_PREFIX}{}", self.0.hyphenated())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for AssetId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
