//! Accelerator detection.
//!
//! A [`DeviceProbe`] is asked exactly once per unit initialization and its
//! [`CapabilityDescriptor`] is treated as a constant for the rest of the run.
//! Probing never fails: every error path collapses to "no accelerator, full
//! precision".
//!
//! [`SystemProbe`] checks, in order:
//! 1. the `UPRES_ACCELERATOR` environment override,
//! 2. the CUDA driver (only with the `cuda` feature),
//! 3. on Linux, the NVIDIA driver's `/proc/driver/nvidia/gpus/*/information`.

use std::env;

use serde::Serialize;
use tracing::{debug, info};

use crate::cuda_query;

/// Environment variable that forces accelerator detection on or off.
pub const ACCELERATOR_ENV: &str = "UPRES_ACCELERATOR";

/// Numeric precision a model tier should run at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 32-bit float tensors.
    #[default]
    Full,
    /// 16-bit float tensors where the model accepts them.
    Reduced,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Reduced => "reduced",
        }
    }
}

/// What the probe found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapabilityDescriptor {
    pub accelerator_present: bool,
    pub accelerator_name: Option<String>,
    pub recommended_precision: Precision,
}

impl CapabilityDescriptor {
    /// No accelerator; full precision.
    pub fn cpu_only() -> Self {
        Self {
            accelerator_present: false,
            accelerator_name: None,
            recommended_precision: Precision::Full,
        }
    }

    /// Accelerator present; reduced precision recommended.
    pub fn accelerated(name: impl Into<String>) -> Self {
        Self {
            accelerator_present: true,
            accelerator_name: Some(name.into()),
            recommended_precision: Precision::Reduced,
        }
    }
}

impl Default for CapabilityDescriptor {
    fn default() -> Self {
        Self::cpu_only()
    }
}

/// One-shot hardware capability query.
pub trait DeviceProbe: Send + Sync {
    fn probe(&self) -> CapabilityDescriptor;
}

/// Probe backed by the environment, the CUDA driver and procfs.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

/// Probe that always reports a fixed descriptor.
#[derive(Clone, Debug, Default)]
pub struct StaticProbe(pub CapabilityDescriptor);

impl DeviceProbe for StaticProbe {
    fn probe(&self) -> CapabilityDescriptor {
        self.0.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcceleratorOverride {
    Auto,
    ForceOff,
    ForceOn,
}

fn parse_override(raw: Option<&str>) -> AcceleratorOverride {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("0" | "off" | "none" | "false" | "cpu") => AcceleratorOverride::ForceOff,
        Some("1" | "on" | "force" | "true") => AcceleratorOverride::ForceOn,
        _ => AcceleratorOverride::Auto,
    }
}

impl DeviceProbe for SystemProbe {
    fn probe(&self) -> CapabilityDescriptor {
        let raw = env::var(ACCELERATOR_ENV).ok();
        let caps = match parse_override(raw.as_deref()) {
            AcceleratorOverride::ForceOff => {
                debug!(env = ACCELERATOR_ENV, "Accelerator disabled by override");
                CapabilityDescriptor::cpu_only()
            }
            AcceleratorOverride::ForceOn => {
                debug!(env = ACCELERATOR_ENV, "Accelerator forced by override");
                CapabilityDescriptor::accelerated(format!("forced ({ACCELERATOR_ENV})"))
            }
            AcceleratorOverride::Auto => detect(),
        };
        info!(
            accelerator = caps.accelerator_present,
            name = caps.accelerator_name.as_deref().unwrap_or("none"),
            precision = caps.recommended_precision.as_str(),
            "Device probe complete"
        );
        caps
    }
}

fn detect() -> CapabilityDescriptor {
    match cuda_query::first_device_name() {
        Ok(Some(name)) => return CapabilityDescriptor::accelerated(name),
        Ok(None) => debug!("CUDA driver reports no devices"),
        Err(e) => debug!(error = %e, "CUDA driver query unavailable"),
    }
    match procfs_gpu_name() {
        Some(name) => CapabilityDescriptor::accelerated(name),
        None => CapabilityDescriptor::cpu_only(),
    }
}

#[cfg(target_os = "linux")]
fn procfs_gpu_name() -> Option<String> {
    let entries = std::fs::read_dir("/proc/driver/nvidia/gpus").ok()?;
    for entry in entries.flatten() {
        let Ok(info) = std::fs::read_to_string(entry.path().join("information")) else {
            continue;
        };
        if let Some(name) = parse_model_line(&info) {
            return Some(name);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn procfs_gpu_name() -> Option<String> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_model_line(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("Model:"))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
