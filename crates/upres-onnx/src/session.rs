//! ONNX Runtime model loader.
//!
//! # Provider policy
//!
//! | `UPRES_ORT_PROVIDER` | accelerator found | sessions tried          |
//! |----------------------|-------------------|-------------------------|
//! | unset / `auto`       | yes               | CUDA, then CPU on error |
//! | unset / `auto`       | no                | CPU                     |
//! | `cuda`               | any               | CUDA only               |
//! | `cpu`                | any               | CPU only                |

use std::env;
use std::path::Path;

use half::f16;
use ndarray::{Array4, ArrayView4};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use tracing::{debug, info, warn};

use upres_core::device::Precision;
use upres_core::error::{Result, UpresError};
use upres_core::session::{InferenceSession, LoadRequest, ModelLoader, ModelMetadata};

use crate::precision::{to_contiguous_f32, to_f16, to_f32};

pub const PROVIDER_ENV: &str = "UPRES_ORT_PROVIDER";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProviderMode {
    Auto,
    CudaOnly,
    CpuOnly,
}

fn provider_mode() -> ProviderMode {
    match env::var(PROVIDER_ENV)
        .unwrap_or_else(|_| "auto".to_string())
        .to_lowercase()
        .as_str()
    {
        "cuda" | "gpu" => ProviderMode::CudaOnly,
        "cpu" => ProviderMode::CpuOnly,
        _ => ProviderMode::Auto,
    }
}

/// Always `true` when compiled with `onnx-runtime`.
pub fn runtime_available() -> bool {
    true
}

fn load_err(e: impl std::fmt::Display) -> UpresError {
    UpresError::ModelLoad(e.to_string())
}

fn run_err(e: impl std::fmt::Display) -> UpresError {
    UpresError::Inference(e.to_string())
}

/// Loads `.onnx` files through `ort`.
#[derive(Clone, Debug)]
pub struct OnnxModelLoader {
    intra_threads: usize,
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl OnnxModelLoader {
    pub fn new() -> Self {
        Self {
            intra_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    fn build_cuda_session(&self, path: &Path) -> Result<Session> {
        Session::builder()
            .map_err(load_err)?
            .with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(0)
                .build()
                .error_on_failure()])
            .map_err(load_err)?
            .with_intra_threads(self.intra_threads)
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(load_err)
    }

    fn build_cpu_session(&self, path: &Path) -> Result<Session> {
        Session::builder()
            .map_err(load_err)?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(load_err)?
            .with_intra_threads(self.intra_threads)
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(load_err)
    }

    fn build_session(&self, path: &Path, accelerated: bool) -> Result<(Session, &'static str)> {
        match (provider_mode(), accelerated) {
            (ProviderMode::CudaOnly, _) => {
                Ok((self.build_cuda_session(path)?, "CUDAExecutionProvider"))
            }
            (ProviderMode::CpuOnly, _) | (ProviderMode::Auto, false) => {
                Ok((self.build_cpu_session(path)?, "CPUExecutionProvider"))
            }
            (ProviderMode::Auto, true) => match self.build_cuda_session(path) {
                Ok(session) => Ok((session, "CUDAExecutionProvider")),
                Err(e) => {
                    warn!(
                        error = %e,
                        "CUDA EP registration failed; falling back to CPUExecutionProvider"
                    );
                    Ok((self.build_cpu_session(path)?, "CPUExecutionProvider"))
                }
            },
        }
    }
}

/// Static spatial dims `(h, w)` of a 4-D tensor type; `None` for dynamic axes.
fn static_hw(dims: &[i64]) -> Option<(i64, i64)> {
    match dims {
        [_, _, h, w] if *h > 0 && *w > 0 => Some((*h, *w)),
        _ => None,
    }
}

fn extract_metadata(
    session: &Session,
    request: &LoadRequest<'_>,
    provider: &str,
) -> Result<(ModelMetadata, bool)> {
    let inputs = session.inputs();
    let outputs = session.outputs();
    let (Some(input), Some(output)) = (inputs.first(), outputs.first()) else {
        return Err(UpresError::ModelLoad(
            "Model must declare at least one input and one output".into(),
        ));
    };

    let (in_ty, in_dims) = match input.dtype() {
        ValueType::Tensor { ty, shape, .. } => (*ty, shape.iter().copied().collect::<Vec<i64>>()),
        other => {
            return Err(UpresError::ModelLoad(format!(
                "Expected tensor input, got {other:?}"
            )));
        }
    };
    let out_dims = match output.dtype() {
        ValueType::Tensor { shape, .. } => shape.iter().copied().collect::<Vec<i64>>(),
        other => {
            return Err(UpresError::ModelLoad(format!(
                "Expected tensor output, got {other:?}"
            )));
        }
    };
    if in_dims.len() != 4 || out_dims.len() != 4 {
        return Err(UpresError::ModelLoad(format!(
            "Expected 4-D NCHW tensors, got input {in_dims:?} output {out_dims:?}"
        )));
    }
    if in_dims[1] > 0 && in_dims[1] != 3 {
        return Err(UpresError::ModelLoad(format!(
            "Model expects {} input channels; frames carry 3",
            in_dims[1]
        )));
    }

    let declared_scale = match (static_hw(&in_dims), static_hw(&out_dims)) {
        (Some((ih, iw)), Some((oh, ow))) if oh % ih == 0 && ow % iw == 0 && oh / ih == ow / iw => {
            Some((oh / ih) as usize)
        }
        _ => None,
    };
    if let Some(scale) = declared_scale {
        if scale != request.scale.get() {
            return Err(UpresError::ModelLoad(format!(
                "Model upscales {scale}x but {} was configured",
                request.scale
            )));
        }
    }

    let half_io = in_ty == TensorElementType::Float16;
    if request.precision == Precision::Reduced && !half_io {
        debug!("Model input is float32; running at full precision");
    }

    let name = request
        .model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.variant.as_str().to_string());

    Ok((
        ModelMetadata {
            name,
            input_name: input.name().to_string(),
            output_name: output.name().to_string(),
            declared_scale,
            precision: if half_io {
                Precision::Reduced
            } else {
                Precision::Full
            },
            provider: provider.to_string(),
        },
        half_io,
    ))
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceSession>> {
        if !request.model_path.is_file() {
            return Err(UpresError::ModelLoad(format!(
                "Model file not found: {}",
                request.model_path.display()
            )));
        }
        info!(
            path = %request.model_path.display(),
            variant = request.variant.as_str(),
            accelerated = request.accelerated,
            mode = ?provider_mode(),
            "Loading ONNX model"
        );

        let (session, provider) = self.build_session(request.model_path, request.accelerated)?;
        let (metadata, half_io) = extract_metadata(&session, request, provider)?;
        info!(
            name = %metadata.name,
            input = %metadata.input_name,
            output = %metadata.output_name,
            declared_scale = ?metadata.declared_scale,
            precision = metadata.precision.as_str(),
            provider,
            "Model loaded"
        );

        Ok(Box::new(OnnxSession {
            session,
            metadata,
            half_io,
        }))
    }
}

/// One loaded ONNX model.
pub struct OnnxSession {
    session: Session,
    metadata: ModelMetadata,
    half_io: bool,
}

impl OnnxSession {
    fn run_f32(&mut self, shape: [usize; 4], data: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let tensor = Tensor::from_array((shape, data)).map_err(run_err)?;
        let outputs = self
            .session
            .run(ort::inputs![self.metadata.input_name.as_str() => &tensor])
            .map_err(run_err)?;
        let (out_shape, out_data) = outputs[self.metadata.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(run_err)?;
        let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, out_data.to_vec()))
    }

    fn run_f16(&mut self, shape: [usize; 4], data: Vec<f16>) -> Result<(Vec<usize>, Vec<f32>)> {
        let tensor = Tensor::from_array((shape, data)).map_err(run_err)?;
        let outputs = self
            .session
            .run(ort::inputs![self.metadata.input_name.as_str() => &tensor])
            .map_err(run_err)?;
        let (out_shape, out_data) = outputs[self.metadata.output_name.as_str()]
            .try_extract_tensor::<f16>()
            .map_err(run_err)?;
        let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, to_f32(out_data)))
    }
}

impl InferenceSession for OnnxSession {
    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = input.dim();
        let shape = [n, c, h, w];
        let (dims, data) = if self.half_io {
            self.run_f16(shape, to_f16(input))?
        } else {
            self.run_f32(shape, to_contiguous_f32(input))?
        };

        let [on, oc, oh, ow] = dims[..] else {
            return Err(UpresError::ModelOutputShape(format!(
                "expected 4-D output, got {dims:?}"
            )));
        };
        Array4::from_shape_vec((on, oc, oh, ow), data)
            .map_err(|e| UpresError::ModelOutputShape(e.to_string()))
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
