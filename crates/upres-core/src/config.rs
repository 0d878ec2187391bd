//! Unit configuration and its flat JSON parameter document.
//!
//! A [`UnitConfiguration`] is immutable for the lifetime of a run.  Every
//! field carries a serde default so a document holding any subset of keys
//! deserializes; unknown keys are ignored so a record can sit inside a larger
//! node description.
//!
//! ```json
//! {
//!   "model_path": "models/realesrgan_x2.onnx",
//!   "scale": 2,
//!   "tiling_size": 0,
//!   "sharpen": false,
//!   "sharpen_amount": 0.5,
//!   "fast_fallback": true,
//!   "model_variant": "realesrgan",
//!   "interpolation": "bicubic"
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpresError};

// ─── Scale ───────────────────────────────────────────────────────────────────

/// Integer upscale factor.  Only 2× and 4× are supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScaleFactor {
    #[default]
    X2,
    X4,
}

impl ScaleFactor {
    #[inline]
    pub const fn get(self) -> usize {
        match self {
            Self::X2 => 2,
            Self::X4 => 4,
        }
    }
}

impl TryFrom<u32> for ScaleFactor {
    type Error = UpresError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            other => Err(UpresError::UnsupportedScale(other)),
        }
    }
}

impl From<ScaleFactor> for u32 {
    fn from(value: ScaleFactor) -> Self {
        value.get() as u32
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.get())
    }
}

// ─── Enumerated parameters ───────────────────────────────────────────────────

/// Which learned model family the model tier loads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    /// Heavy RRDB-style network; eligible for tiled execution.
    #[default]
    #[serde(rename = "realesrgan")]
    RealEsrgan,
    /// Light residual network; always runs on the whole frame.
    #[serde(rename = "srresnet", alias = "light")]
    SrResNet,
}

impl ModelVariant {
    pub fn is_light(self) -> bool {
        matches!(self, Self::SrResNet)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RealEsrgan => "realesrgan",
            Self::SrResNet => "srresnet",
        }
    }
}

/// Resampling kernel used when interpolation is the selected tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationKernel {
    #[default]
    Bicubic,
    Lanczos,
}

impl InterpolationKernel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bicubic => "bicubic",
            Self::Lanczos => "lanczos",
        }
    }
}

// ─── Unit configuration ──────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub scale: ScaleFactor,
    /// Tile edge in input pixels; `0` disables tiling.
    #[serde(default)]
    pub tiling_size: usize,
    #[serde(default)]
    pub sharpen: bool,
    #[serde(default = "default_sharpen_amount")]
    pub sharpen_amount: f32,
    /// Skip the model entirely when no accelerator is present.
    #[serde(default = "default_true")]
    pub fast_fallback: bool,
    #[serde(default)]
    pub model_variant: ModelVariant,
    #[serde(default)]
    pub interpolation: InterpolationKernel,
}

fn default_sharpen_amount() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Default for UnitConfiguration {
    fn default() -> Self {
        Self {
            model_path: None,
            scale: ScaleFactor::default(),
            tiling_size: 0,
            sharpen: false,
            sharpen_amount: default_sharpen_amount(),
            fast_fallback: true,
            model_variant: ModelVariant::default(),
            interpolation: InterpolationKernel::default(),
        }
    }
}

impl UnitConfiguration {
    pub fn validate(&self) -> Result<()> {
        if !self.sharpen_amount.is_finite() || !(0.0..=1.0).contains(&self.sharpen_amount) {
            return Err(UpresError::Config(format!(
                "sharpen_amount must be within [0, 1], got {}",
                self.sharpen_amount
            )));
        }
        Ok(())
    }
}

// ─── Parameter store ─────────────────────────────────────────────────────────

/// Serializer for the flat per-unit parameter document.
pub struct ParameterStore;

impl ParameterStore {
    pub fn serialize(config: &UnitConfiguration) -> Result<String> {
        Ok(serde_json::to_string(config)?)
    }

    pub fn serialize_pretty(config: &UnitConfiguration) -> Result<String> {
        Ok(serde_json::to_string_pretty(config)?)
    }

    /// Parse and validate a document.  Missing keys take their defaults.
    pub fn deserialize(document: &str) -> Result<UnitConfiguration> {
        let value: serde_json::Value = serde_json::from_str(document)
            .map_err(|err| UpresError::Config(format!("Invalid parameter document: {err}")))?;
        if !value.is_object() {
            return Err(UpresError::Config(
                "Parameter document must be a JSON object".into(),
            ));
        }
        // A bad scale reports `UnsupportedScale`, not a generic parse error.
        if let Some(scale) = value.get("scale").and_then(serde_json::Value::as_u64) {
            let scale = u32::try_from(scale).map_err(|_| {
                UpresError::Config(format!("scale {scale} is out of range"))
            })?;
            ScaleFactor::try_from(scale)?;
        }
        let config: UnitConfiguration = serde_json::from_value(value)
            .map_err(|err| UpresError::Config(format!("Invalid parameter document: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<UnitConfiguration> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            UpresError::Config(format!(
                "Failed to read parameter document {}: {err}",
                path.display()
            ))
        })?;
        Self::deserialize(&data)
    }

    pub fn save(path: &Path, config: &UnitConfiguration) -> Result<()> {
        std::fs::write(path, Self::serialize_pretty(config)?)?;
        Ok(())
    }
}

// ─── Pacing ──────────────────────────────────────────────────────────────────

/// Rate governor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Emission rate used until (or unless) the source reports its own.
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
    /// Ask the source for its native rate on the first frame.
    #[serde(default = "default_true")]
    pub auto_fps: bool,
}

fn default_target_fps() -> f64 {
    30.0
}

/// Slowest usable emission rate: one frame every 100 s.
pub const MIN_TARGET_FPS: f64 = 0.01;

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            auto_fps: true,
        }
    }
}

impl PacingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(UpresError::Config(format!(
                "target_fps must be a positive number, got {}",
                self.target_fps
            )));
        }
        if self.target_fps < MIN_TARGET_FPS {
            return Err(UpresError::Config(format!(
                "target_fps must be at least {MIN_TARGET_FPS}, got {}",
                self.target_fps
            )));
        }
        Ok(())
    }
}
