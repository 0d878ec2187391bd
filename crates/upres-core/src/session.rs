//! Model runtime seam.
//!
//! The unit never talks to an inference runtime directly.  It asks a
//! [`ModelLoader`] for a boxed [`InferenceSession`] once at initialization and
//! then feeds it NCHW `f32` tensors in `[0, 1]`.

use std::path::Path;

use ndarray::{Array4, ArrayView4};

use crate::config::{ModelVariant, ScaleFactor};
use crate::device::Precision;
use crate::error::Result;

/// Metadata reported by a loaded model.
#[derive(Clone, Debug)]
pub struct ModelMetadata {
    /// Human-readable model identifier.
    pub name: String,
    /// Name of the model's input tensor node.
    pub input_name: String,
    /// Name of the model's output tensor node.
    pub output_name: String,
    /// Upscale factor derived from static shapes, `None` for dynamic axes.
    pub declared_scale: Option<usize>,
    /// Precision the session actually runs at.
    pub precision: Precision,
    /// Execution provider that was requested first.
    pub provider: String,
}

/// Everything a loader needs to open a model.
#[derive(Clone, Copy, Debug)]
pub struct LoadRequest<'a> {
    pub model_path: &'a Path,
    pub variant: ModelVariant,
    pub scale: ScaleFactor,
    pub precision: Precision,
    pub accelerated: bool,
}

/// A loaded model.  Owned by exactly one unit.
pub trait InferenceSession: Send {
    /// Run one forward pass on a `1×3×H×W` tensor.
    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>>;

    fn metadata(&self) -> &ModelMetadata;
}

/// Opens models from disk.
pub trait ModelLoader: Send + Sync {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceSession>>;
}
