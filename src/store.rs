//! File-system asset store.
//!
//! One file per asset, named `Image-<id>.<ext>` directly under the storage
//! root. The extension records the format chosen at ingestion, and
//! [`AssetStore::locate`] rediscovers it from the identifier alone by probing
//! the fixed set of extensions this crate can produce. The directory listing
//! *is* the index.
//!
//! ## Atomic writes
//!
//! [`AssetStore::put`] writes to a hidden temporary sibling
//! (`.tmp-Image-<id>.<ext>`), fsyncs it, and renames it into place. Rename
//! within one directory is atomic on POSIX filesystems, so a concurrent
//! [`get`](AssetStore::get) sees either no file or the complete file.
//! Temporaries left behind by a crash are swept by [`AssetStore::open`].

use crate::identifier::{AssetId, FILE_PREFIX};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const TEMP_PREFIX: &str = ".tmp-";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("asset {0} not found")]
    NotFound(AssetId),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Format of a stored asset, as recorded by its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoredFormat {
    /// Regular raster master.
    Avif,
    /// Raster master fallback for high bit depth or AVIF encoder refusal.
    Png,
    /// Animated sources are kept in their original container.
    Gif,
    WebP,
    /// Vector original, stored verbatim.
    Svg,
}

impl StoredFormat {
    /// Probe order used by [`AssetStore::locate`].
    pub const ALL: [StoredFormat; 5] = [
        StoredFormat::Avif,
        StoredFormat::Png,
        StoredFormat::Gif,
        StoredFormat::WebP,
        StoredFormat::Svg,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            StoredFormat::Avif => "avif",
            StoredFormat::Png => "png",
            StoredFormat::Gif => "gif",
            StoredFormat::WebP => "webp",
            StoredFormat::Svg => "svg",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            StoredFormat::Avif => "image/avif",
            StoredFormat::Png => "image/png",
            StoredFormat::Gif => "image/gif",
            StoredFormat::WebP => "image/webp",
            StoredFormat::Svg => "image/svg+xml",
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, StoredFormat::Svg)
    }
}

/// Asset store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    /// Open (and create if needed) the store at `root`.
    ///
    /// Removes temporaries from interrupted writes. Never touches committed
    /// assets.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self { root };
        let swept = store.sweep_temporaries()?;
        if swept > 0 {
            tracing::warn!(count = swept, root = %store.root.display(), "removed stale temporary files");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path of an asset in a given format.
    pub fn path_for(&self, id: &AssetId, format: StoredFormat) -> PathBuf {
        self.root
            .join(format!("{}.{}", id.file_stem(), format.extension()))
    }

    fn temp_path_for(&self, id: &AssetId, format: StoredFormat) -> PathBuf {
        self.root.join(format!(
            "{TEMP_PREFIX}{}.{}",
            id.file_stem(),
            format.extension()
        ))
    }

    /// Durably write a complete asset, or nothing at all.
    pub fn put(
        &self,
        id: &AssetId,
        format: StoredFormat,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let dest = self.path_for(id, format);
        let tmp = self.temp_path_for(id, format);

        let written = write_synced(&tmp, bytes).and_then(|()| fs::rename(&tmp, &dest));
        if let Err(e) = written {
            // Best effort: the temp may not exist if create itself failed.
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io(e));
        }
        sync_dir(&self.root);

        tracing::debug!(%id, format = format.extension(), bytes = bytes.len(), "asset stored");
        Ok(dest)
    }

    /// Read an asset in a known format.
    pub fn get(&self, id: &AssetId, format: StoredFormat) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.path_for(id, format)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(*id)),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Discover which format an asset was stored in.
    pub fn locate(&self, id: &AssetId) -> Result<StoredFormat, StoreError> {
        for format in StoredFormat::ALL {
            match fs::metadata(self.path_for(id, format)) {
                Ok(meta) if meta.is_file() => return Ok(format),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Err(StoreError::NotFound(*id))
    }

    /// Locate and read an asset in one step.
    pub fn load(&self, id: &AssetId) -> Result<(StoredFormat, Vec<u8>), StoreError> {
        let format = self.locate(id)?;
        let bytes = self.get(id, format)?;
        Ok((format, bytes))
    }

    fn sweep_temporaries(&self) -> Result<usize, StoreError> {
        let stale_prefix = format!("{TEMP_PREFIX}{FILE_PREFIX}");
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&stale_prefix) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Persist the rename itself. Not supported on every platform, so failures
/// are ignored.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
