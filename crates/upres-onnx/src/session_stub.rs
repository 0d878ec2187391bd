//! Stub loader for builds without the `onnx-runtime` feature.

use upres_core::error::{Result, UpresError};
use upres_core::session::{InferenceSession, LoadRequest, ModelLoader};

pub const PROVIDER_ENV: &str = "UPRES_ORT_PROVIDER";

/// Always `false` in stub builds.
pub fn runtime_available() -> bool {
    false
}

fn runtime_disabled_err() -> UpresError {
    UpresError::RuntimeUnavailable(
        "upres-onnx was built without `onnx-runtime`; rebuild with --features onnx-runtime"
            .into(),
    )
}

#[derive(Clone, Debug, Default)]
pub struct OnnxModelLoader;

impl OnnxModelLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn with_intra_threads(self, _threads: usize) -> Self {
        self
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceSession>> {
        if !request.model_path.is_file() {
            return Err(UpresError::ModelLoad(format!(
                "Model file not found: {}",
                request.model_path.display()
            )));
        }
        tracing::warn!(
            path = %request.model_path.display(),
            "ONNX runtime not compiled in; model cannot be loaded"
        );
        Err(runtime_disabled_err())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use upres_core::config::{ModelVariant, ScaleFactor};
    use upres_core::device::Precision;

    use super::*;

    fn request(path: &Path) -> LoadRequest<'_> {
        LoadRequest {
            model_path: path,
            variant: ModelVariant::RealEsrgan,
            scale: ScaleFactor::X2,
            precision: Precision::Full,
            accelerated: false,
        }
    }

    #[test]
    fn existing_file_reports_runtime_unavailable() {
        let path = std::env::temp_dir().join(format!("upres_stub_model_{}.onnx", std::process::id()));
        std::fs::write(&path, b"not a model").unwrap();
        let err = OnnxModelLoader::new().load(&request(&path)).err().unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, UpresError::RuntimeUnavailable(_)), "got {err:?}");
        assert!(!runtime_available());
    }

    #[test]
    fn missing_file_reports_load_error() {
        let err = OnnxModelLoader::new()
            .load(&request(Path::new("/nonexistent/model.onnx")))
            .err()
            .unwrap();
        assert!(matches!(err, UpresError::ModelLoad(_)));
    }
}
