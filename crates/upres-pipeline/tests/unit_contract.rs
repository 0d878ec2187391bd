use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ndarray::{Array4, ArrayView4};

use upres_core::config::{ModelVariant, ParameterStore, ScaleFactor, UnitConfiguration};
use upres_core::device::{CapabilityDescriptor, Precision, StaticProbe};
use upres_core::error::{Result, UpresError};
use upres_core::frame::FrameBuffer;
use upres_core::session::{InferenceSession, LoadRequest, ModelLoader, ModelMetadata};
use upres_pipeline::{Status, SuperResolutionUnit, TierKind};

fn metadata() -> ModelMetadata {
    ModelMetadata {
        name: "flaky-nearest".into(),
        input_name: "input".into(),
        output_name: "output".into(),
        declared_scale: None,
        precision: Precision::Full,
        provider: "test".into(),
    }
}

/// Nearest-neighbour model that fails whenever `fail_next` is raised.
struct FlakySession {
    scale: usize,
    fail_next: Arc<AtomicBool>,
    meta: ModelMetadata,
}

impl InferenceSession for FlakySession {
    fn run(&mut self, x: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(UpresError::Inference("injected fault".into()));
        }
        let s = self.scale;
        let (n, c, h, w) = x.dim();
        Ok(Array4::from_shape_fn((n, c, h * s, w * s), |(b, ch, y, xx)| {
            x[[b, ch, y / s, xx / s]]
        }))
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.meta
    }
}

#[derive(Clone, Default)]
struct FlakyLoader {
    loads: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
}

impl ModelLoader for FlakyLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceSession>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakySession {
            scale: request.scale.get(),
            fail_next: Arc::clone(&self.fail_next),
            meta: metadata(),
        }))
    }
}

/// Loader that refuses every model, like a missing file would.
#[derive(Clone, Default)]
struct MissingFileLoader {
    loads: Arc<AtomicUsize>,
}

impl ModelLoader for MissingFileLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceSession>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(UpresError::ModelLoad(format!(
            "Model file not found: {}",
            request.model_path.display()
        )))
    }
}

fn gradient(h: usize, w: usize) -> FrameBuffer {
    let data = (0..h * w * 3).map(|i| (i * 13 % 256) as u8).collect();
    FrameBuffer::new(h, w, data).unwrap()
}

fn cpu() -> StaticProbe {
    StaticProbe(CapabilityDescriptor::cpu_only())
}

fn gpu() -> StaticProbe {
    StaticProbe(CapabilityDescriptor::accelerated("Test Accelerator"))
}

#[test]
fn missing_model_degrades_to_interpolation_and_still_scales() {
    let loader = MissingFileLoader::default();
    let config = UnitConfiguration {
        model_path: Some(PathBuf::from("/nonexistent/model.onnx")),
        scale: ScaleFactor::X2,
        fast_fallback: false,
        ..UnitConfiguration::default()
    };
    let mut unit = SuperResolutionUnit::new(config)
        .unwrap()
        .with_probe(cpu())
        .with_loader(loader.clone());

    let out = unit.process(&gradient(256, 256));
    assert_eq!(out.status, Status::Ok);
    let frame = out.frame.unwrap();
    assert_eq!((frame.height(), frame.width(), frame.channels()), (512, 512, 3));
    assert_eq!(unit.active_tier(), Some(TierKind::Interpolation));
    assert!(unit.is_degraded());
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn fast_fallback_without_accelerator_never_touches_the_model() {
    let loader = FlakyLoader::default();
    let config = UnitConfiguration {
        model_path: Some(PathBuf::from("/models/present.onnx")),
        fast_fallback: true,
        ..UnitConfiguration::default()
    };
    let mut unit = SuperResolutionUnit::new(config)
        .unwrap()
        .with_probe(cpu())
        .with_loader(loader.clone());

    let selection = unit.initialize().clone();
    assert_eq!(selection.tier, TierKind::Interpolation);
    assert!(!selection.degraded);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    assert_eq!(unit.process(&gradient(8, 8)).status, Status::Ok);
}

#[test]
fn empty_frame_is_invalid_and_unit_stays_usable() {
    let mut unit = SuperResolutionUnit::new(UnitConfiguration::default())
        .unwrap()
        .with_probe(cpu());

    let out = unit.process(&FrameBuffer::empty());
    assert_eq!(out.status, Status::InvalidInput);
    assert_eq!(out.status.as_str(), "invalid-input");
    assert!(out.frame.is_none());

    let out = unit.process(&gradient(4, 6));
    assert_eq!(out.status, Status::Ok);
    let frame = out.frame.unwrap();
    assert_eq!((frame.height(), frame.width()), (8, 12));
    assert_eq!(unit.metrics().invalid_inputs, 1);
}

#[test]
fn shape_law_holds_for_every_scale_and_tier() {
    for scale in [ScaleFactor::X2, ScaleFactor::X4] {
        for variant in [ModelVariant::RealEsrgan, ModelVariant::SrResNet] {
            let config = UnitConfiguration {
                model_path: Some(PathBuf::from("/models/any.onnx")),
                scale,
                tiling_size: 16,
                fast_fallback: false,
                model_variant: variant,
                ..UnitConfiguration::default()
            };
            let mut unit = SuperResolutionUnit::new(config)
                .unwrap()
                .with_probe(gpu())
                .with_loader(FlakyLoader::default());
            for (h, w) in [(1, 1), (17, 5), (40, 33)] {
                let out = unit.process(&gradient(h, w));
                let frame = out.frame.expect("valid input yields a frame");
                assert_eq!(
                    (frame.height(), frame.width(), frame.channels()),
                    (h * scale.get(), w * scale.get(), 3),
                    "{scale} {variant:?} {h}x{w}"
                );
                assert!(frame.is_contiguous());
            }
        }
    }
}

#[test]
fn injected_fault_falls_back_for_one_frame_only() {
    let loader = FlakyLoader::default();
    let config = UnitConfiguration {
        model_path: Some(PathBuf::from("/models/flaky.onnx")),
        fast_fallback: false,
        ..UnitConfiguration::default()
    };
    let mut unit = SuperResolutionUnit::new(config)
        .unwrap()
        .with_probe(gpu())
        .with_loader(loader.clone());
    unit.initialize();
    assert_eq!(unit.active_tier(), Some(TierKind::Model));

    loader.fail_next.store(true, Ordering::SeqCst);
    let faulted = unit.process(&gradient(12, 12));
    assert_eq!(faulted.status, Status::Ok);
    assert_eq!(faulted.served_by, Some(TierKind::Interpolation));
    assert_eq!(faulted.frame.unwrap().height(), 24);

    let recovered = unit.process(&gradient(12, 12));
    assert_eq!(recovered.served_by, Some(TierKind::Model));
    assert_eq!(unit.active_tier(), Some(TierKind::Model));
    assert!(!unit.is_degraded());

    let metrics = unit.metrics();
    assert_eq!(metrics.frames_processed, 2);
    assert_eq!(metrics.fallback_frames, 1);
}

#[test]
fn shutdown_releases_model_but_keeps_serving() {
    let config = UnitConfiguration {
        model_path: Some(PathBuf::from("/models/any.onnx")),
        fast_fallback: false,
        ..UnitConfiguration::default()
    };
    let mut unit = SuperResolutionUnit::new(config)
        .unwrap()
        .with_probe(gpu())
        .with_loader(FlakyLoader::default());
    unit.process(&gradient(4, 4));
    let snapshot = unit.shutdown();
    assert_eq!(snapshot.frames_processed, 1);

    let out = unit.process(&gradient(4, 4));
    assert_eq!(out.served_by, Some(TierKind::Interpolation));
    assert_eq!(out.frame.unwrap().width(), 8);
}

#[test]
fn persisted_configuration_drives_a_fresh_unit() {
    let config = UnitConfiguration {
        scale: ScaleFactor::X4,
        sharpen: true,
        sharpen_amount: 0.25,
        model_variant: ModelVariant::SrResNet,
        ..UnitConfiguration::default()
    };
    let document = ParameterStore::serialize(&config).unwrap();
    let restored = ParameterStore::deserialize(&document).unwrap();
    assert_eq!(restored, config);

    let mut unit = SuperResolutionUnit::new(restored).unwrap().with_probe(cpu());
    let frame = unit.process(&gradient(3, 5)).frame.unwrap();
    assert_eq!((frame.height(), frame.width()), (12, 20));
}

#[test]
fn out_of_range_sharpen_amount_is_rejected_at_construction() {
    let config = UnitConfiguration {
        sharpen: true,
        sharpen_amount: 1.5,
        ..UnitConfiguration::default()
    };
    let err = SuperResolutionUnit::new(config).err().unwrap();
    assert!(matches!(err, UpresError::Config(_)), "{err}");
}
