//! Configuration types for sprd-pp

use crate::device::event::IPP_EVENT_SIZE;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Limits of the IPP scaler unit
///
/// A single hardware pass can turn an extent `src` into `dst` when
/// `src <= dst * max_downscale` and `dst <= src * max_upscale`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpConfig {
    /// Maximum chained passes per conversion
    pub max_steps: usize,
    /// Largest single-pass upscale factor
    pub max_upscale: u32,
    /// Largest single-pass downscale factor
    pub max_downscale: u32,
    /// Minimum buffer width
    pub min_width: u32,
    /// Minimum buffer height
    pub min_height: u32,
    /// Maximum buffer width (None = not defined)
    pub max_width: Option<u32>,
    /// Maximum buffer height (None = not defined)
    pub max_height: Option<u32>,
    /// Preferred size alignment
    pub preferred_align: u32,
}

impl Default for PpConfig {
    fn default() -> Self {
        Self {
            max_steps: 2,
            max_upscale: 4,
            max_downscale: 4,
            min_width: 16,
            min_height: 8,
            max_width: None,
            max_height: None,
            preferred_align: 16,
        }
    }
}

impl PpConfig {
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_ratio_limits(mut self, max_upscale: u32, max_downscale: u32) -> Self {
        self.max_upscale = max_upscale;
        self.max_downscale = max_downscale;
        self
    }

    pub fn with_min_size(mut self, width: u32, height: u32) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }

    /// Check the limits are usable by the planner
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(Error::Config("max_steps must be at least 1".into()));
        }
        if self.max_upscale == 0 || self.max_downscale == 0 {
            return Err(Error::Config("scale factors must be at least 1".into()));
        }
        if self.preferred_align == 0 {
            return Err(Error::Config("preferred_align must be at least 1".into()));
        }
        Ok(())
    }
}

/// Backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// DRM device node
    pub device: PathBuf,
    /// Bytes read from the device per event dispatch
    pub event_buffer_size: usize,
    /// PP unit limits
    pub pp: PpConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/dri/card0"),
            event_buffer_size: 1024,
            pp: PpConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: BackendConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::debug!("Loaded backend config from {}", path.display());
        Ok(config)
    }

    pub fn with_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_pp(mut self, pp: PpConfig) -> Self {
        self.pp = pp;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size < IPP_EVENT_SIZE {
            return Err(Error::Config(format!(
                "event_buffer_size {} is smaller than one IPP event ({} bytes)",
                self.event_buffer_size, IPP_EVENT_SIZE
            )));
        }
        self.pp.validate()
    }

    /// Serialize to TOML (used by `sprd-pp info --dump-config`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
