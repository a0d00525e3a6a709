use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::{QualityFilter, DEFAULT_BUFFER_COUNT};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Can not read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Capture settings, usually read from `/etc/redface/config.json`.
/// Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture node; the infrared camera on most face-unlock laptops.
    pub device: PathBuf,
    /// Upper bound on one wait for a frame, and so on shutdown latency.
    pub wait_timeout_ms: u64,
    /// Driver buffers to request.
    pub buffer_count: u32,
    /// Run the exposure filter before conversion.
    pub skip_dark_frames: bool,
    pub quality: QualityFilter,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video2"),
            wait_timeout_ms: 1000,
            buffer_count: DEFAULT_BUFFER_COUNT,
            skip_dark_frames: true,
            quality: QualityFilter::default(),
        }
    }
}

impl CaptureConfig {
    pub const DEFAULT_PATH: &'static str = "/etc/redface/config.json";

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Read { path, source }) if source.kind() == io::ErrorKind::NotFound => {
                warn!("{} not found, using default capture config", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// At least 1 ms, even for a hand-built config that skipped validation;
    /// a zero poll timeout would spin the capture loop.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms.max(1))
    }

    /// The filter the capture loop should run, if any.
    pub fn quality_filter(&self) -> Option<QualityFilter> {
        self.skip_dark_frames.then_some(self.quality)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::Invalid("wait_timeout_ms must be positive".into()));
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::Invalid("buffer_count must be positive".into()));
        }
        let q = &self.quality;
        if q.min_dark_percent >= q.max_dark_percent || q.max_dark_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "quality bounds {}..{} are not a valid percent range",
                q.min_dark_percent, q.max_dark_percent
            )));
        }
        Ok(())
    }
}
