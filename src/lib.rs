pub mod capture;
pub mod control;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod sync;

#[cfg(test)]
mod mock;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use driver::CameraDriver;
pub use error::{CameraError, Result};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub control: ControlConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 node to capture from; empty means auto-detect.
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Only accept native formats with exactly the requested pixel format.
    pub exact_pixel_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub processing_unit_id: u8,
    pub transfer_timeout_ms: u64,
    /// Claim the video control interface before issuing requests.
    pub claim_interface: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: String::new(),
            width: 1280,
            height: 720,
            fps: 30.0,
            format: PixelFormat::Yuyv,
            buffer_count: 4,
            exact_pixel_format: true,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            processing_unit_id: control::uvc::PROCESSING_UNIT_ID,
            transfer_timeout_ms: 1000,
            claim_interface: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Defaults, overlaid by the TOML file at `path` if given, overlaid by
    /// `PANACAM__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("PANACAM").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
