//! Configuration using Figment
//!
//! Configuration for the `snapshot` harness and the pool it drives is loaded
//! from (highest precedence first):
//! 1. Environment variables prefixed with `SNAPSHOT_`
//! 2. A TOML file (default: `snapshot.toml`, optional)
//! 3. Built-in defaults
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! SNAPSHOT_APPLICATION__LOG_LEVEL=debug
//! SNAPSHOT_WINDOW__BUFFER_COUNT=6
//! SNAPSHOT_CAMERA__AUTOFOCUS=false
//! ```
//!
//! # Example
//!
//! ```no_run
//! use camera_window::config::SnapshotConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SnapshotConfig::load_from("snapshot.toml")?;
//!     println!("Buffers: {}", config.window.buffer_count);
//!     Ok(())
//! }
//! ```

use crate::pool::{MAX_SLOTS, MIN_SLOTS};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file looked up by [`SnapshotConfig::load`].
pub const DEFAULT_CONFIG_PATH: &str = "snapshot.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be parsed
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// A value is out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Buffer pool settings
    pub window: WindowConfig,
    /// Simulated camera settings
    pub camera: CameraConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Where the captured image is written
    pub output: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            output: PathBuf::from("snapshot.raw"),
        }
    }
}

/// Buffer pool configuration, applied by
/// [`BufferPool::from_config`](crate::pool::BufferPool::from_config).
///
/// Values are signed because they pass through the same validation as the
/// native setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Eligible slots
    pub buffer_count: usize,
    /// Default buffer width, 0 to leave unset
    pub width: i32,
    /// Default buffer height, 0 to leave unset
    pub height: i32,
    /// HAL pixel format code
    pub format: i32,
    /// Gralloc usage bits
    pub usage: u32,
    /// Fixed timestamp for every queued buffer; unset means clock-driven.
    pub timestamp: Option<i64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            buffer_count: MIN_SLOTS,
            width: 0,
            height: 0,
            format: 0,
            usage: 0,
            timestamp: None,
        }
    }
}

/// Simulated camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Preview frame width
    pub preview_width: i32,
    /// Preview frame height
    pub preview_height: i32,
    /// Preview pixel format (HAL code)
    pub preview_format: i32,
    /// Delay between preview frames in milliseconds
    pub frame_interval_ms: u64,
    /// Run autofocus before taking the picture
    pub autofocus: bool,
    /// Make autofocus report failure (exercises the error path)
    pub autofocus_fails: bool,
    /// Color effect name
    pub effect: String,
    /// Flash mode name
    pub flash_mode: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            preview_width: 640,
            preview_height: 480,
            preview_format: 0x11,
            frame_interval_ms: 33,
            autofocus: true,
            autofocus_fails: false,
            effect: "none".to_string(),
            flash_mode: "auto".to_string(),
        }
    }
}

impl SnapshotConfig {
    /// Load configuration from `snapshot.toml` (if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if extraction or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SNAPSHOT_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(MIN_SLOTS..=MAX_SLOTS).contains(&self.window.buffer_count) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid buffer_count {}. Must be {MIN_SLOTS}-{MAX_SLOTS}",
                self.window.buffer_count
            )));
        }

        for (name, w, h) in [
            ("window", self.window.width, self.window.height),
            ("camera preview", self.camera.preview_width, self.camera.preview_height),
        ] {
            if w < 0 || h < 0 || (w == 0) != (h == 0) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {name} size {w}x{h}. Width and height must both be zero or both positive"
                )));
            }
        }

        if self.window.format < 0 || self.camera.preview_format < 0 {
            return Err(ConfigError::ValidationError(
                "Pixel formats must be non-negative".to_string(),
            ));
        }

        Ok(())
    }
}
