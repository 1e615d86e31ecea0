//! Service configuration module.
//!
//! Handles loading, validating, and merging the `image-cdn.toml` config file.
//! Stock defaults are the base layer; the user file overrides any subset of
//! keys; CLI flags override both.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! bind = "0.0.0.0"
//! port = 8080
//! max_upload_bytes = 20971520   # 20 MiB
//!
//! [storage]
//! root = "images"               # Directory holding Image-<id>.<ext> files
//!
//! [master]
//! quality = 90                  # AVIF quality (1-100)
//! speed = 5                     # rav1e speed (1-10, 10 = fastest)
//!
//! [delivery]
//! format = "webp"               # webp | png | jpeg | avif
//! quality = 80                  # JPEG/AVIF quality (1-100)
//! speed = 8                     # AVIF speed (1-10)
//!
//! [processing]
//! max_workers = 4               # Imaging worker threads (omit for auto = CPU cores)
//! max_decode_memory = 268435456 # Per-decode allocation ceiling in bytes
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [delivery]
//! format = "jpeg"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{
    DecodeLimits, DeliveryFormat, DeliverySettings, MasterSettings, Quality, Speed,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file read when `--config` is not given. Optional.
pub const DEFAULT_CONFIG_FILE: &str = "image-cdn.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Asset store location.
    pub storage: StorageConfig,
    /// At-rest master encoding.
    pub master: MasterConfig,
    /// Retrieval output encoding.
    pub delivery: DeliveryConfig,
    /// Worker pool and decode limits.
    pub processing: ProcessingConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, msg: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Validation(msg.into()))
            }
        }
        check(!self.server.bind.trim().is_empty(), "server.bind must not be empty")?;
        check(self.server.max_upload_bytes > 0, "server.max_upload_bytes must be positive")?;
        check(
            !self.storage.root.as_os_str().is_empty(),
            "storage.root must not be empty",
        )?;
        check(
            (1..=100).contains(&self.master.quality),
            "master.quality must be 1-100",
        )?;
        check((1..=10).contains(&self.master.speed), "master.speed must be 1-10")?;
        check(
            (1..=100).contains(&self.delivery.quality),
            "delivery.quality must be 1-100",
        )?;
        check((1..=10).contains(&self.delivery.speed), "delivery.speed must be 1-10")?;
        check(
            self.processing.max_workers != Some(0),
            "processing.max_workers must be at least 1",
        )?;
        check(
            self.processing.max_decode_memory > 0,
            "processing.max_decode_memory must be positive",
        )?;
        Ok(())
    }

    /// `bind:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface address to bind.
    pub bind: String,
    /// TCP port.
    pub port: u16,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Asset store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding the stored assets. Created on startup.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
        }
    }
}

/// At-rest master encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    /// AVIF quality (1 = worst, 100 = best).
    pub quality: u32,
    /// rav1e speed (1 = slowest/smallest, 10 = fastest).
    pub speed: u8,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            quality: 90,
            speed: 5,
        }
    }
}

impl MasterConfig {
    pub fn settings(&self) -> MasterSettings {
        MasterSettings {
            quality: Quality::new(self.quality),
            speed: Speed::new(self.speed),
        }
    }
}

/// Retrieval output encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliveryConfig {
    pub format: DeliveryFormat,
    /// JPEG/AVIF quality (1-100). WebP and PNG output is lossless.
    pub quality: u32,
    /// AVIF speed (1-10).
    pub speed: u8,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            format: DeliveryFormat::WebP,
            quality: 80,
            speed: 8,
        }
    }
}

impl DeliveryConfig {
    pub fn settings(&self) -> DeliverySettings {
        DeliverySettings {
            format: self.format,
            quality: Quality::new(self.quality),
            speed: Speed::new(self.speed),
        }
    }
}

/// Worker pool and decode limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of imaging worker threads.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
    /// Allocation ceiling for a single decode, in bytes.
    pub max_decode_memory: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            max_decode_memory: DecodeLimits::default().max_alloc,
        }
    }
}

impl ProcessingConfig {
    pub fn limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_alloc: self.max_decode_memory,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServiceConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the service config.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] in the
/// working directory is used if present, stock defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Some(toml::from_str(&content)?)
        }
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# image-cdn Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Read from ./image-cdn.toml, or from the file given with --config.
# Command-line flags (--port, --storage-root) override this file.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# HTTP listener
# ---------------------------------------------------------------------------
[server]
# Interface address to bind.
bind = "0.0.0.0"

# TCP port.
port = 8080

# Largest accepted upload request, in bytes (20 MiB).
max_upload_bytes = 20971520

# ---------------------------------------------------------------------------
# Asset store
# ---------------------------------------------------------------------------
[storage]
# Directory holding Image-<uuid>.<ext> files. Created if missing.
root = "images"

# ---------------------------------------------------------------------------
# At-rest master encoding (AVIF)
# ---------------------------------------------------------------------------
[master]
# AVIF quality (1 = worst, 100 = best).
quality = 90

# rav1e speed (1 = slowest/smallest, 10 = fastest).
speed = 5

# ---------------------------------------------------------------------------
# Retrieval output encoding
# ---------------------------------------------------------------------------
[delivery]
# Output format: "webp" (lossless), "png", "jpeg" or "avif".
format = "webp"

# Quality for jpeg and avif output (1-100).
quality = 80

# rav1e speed for avif output (1-10).
speed = 8

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Imaging worker threads.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4

# Allocation ceiling for a single image decode, in bytes (256 MiB).
max_decode_memory = 268435456
"##
}
