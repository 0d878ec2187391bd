//! The super-resolution unit.
//!
//! # Lifecycle
//!
//! 1. [`SuperResolutionUnit::new`] validates the configuration.  This is the
//!    only fallible step.
//! 2. [`SuperResolutionUnit::initialize`] probes the device once and selects
//!    a tier once.  Model problems degrade to interpolation; initialization
//!    itself always succeeds.
//! 3. [`SuperResolutionUnit::process`] runs synchronously per frame and never
//!    returns an error: bad input yields [`Status::InvalidInput`], tier
//!    failures are absorbed by the per-frame bicubic fallback.
//! 4. [`SuperResolutionUnit::shutdown`] reports metrics and drops the model.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use upres_core::config::UnitConfiguration;
use upres_core::device::{CapabilityDescriptor, DeviceProbe, SystemProbe};
use upres_core::error::{Result, UpresError};
use upres_core::frame::{FRAME_CHANNELS, FrameBuffer};
use upres_core::session::ModelLoader;
use upres_kernels::sharpen::UnsharpMask;
use upres_onnx::OnnxModelLoader;

use crate::chain::{TierChain, TierSelection};
use crate::metrics::{UnitMetrics, UnitMetricsSnapshot};
use crate::tier::{InterpolationTier, TierKind};

/// Progress is logged every this many frames.
const PROGRESS_EVERY: u64 = 30;

/// Per-call status signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Ok,
    InvalidInput,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidInput => "invalid-input",
        }
    }
}

/// What one `process` call produced.
#[derive(Debug)]
pub struct Processed {
    pub status: Status,
    pub frame: Option<FrameBuffer>,
    /// Tier that actually produced `frame`.
    pub served_by: Option<TierKind>,
}

impl Processed {
    fn invalid() -> Self {
        Self {
            status: Status::InvalidInput,
            frame: None,
            served_by: None,
        }
    }
}

pub struct SuperResolutionUnit {
    config: UnitConfiguration,
    probe: Box<dyn DeviceProbe>,
    loader: Arc<dyn ModelLoader>,
    capabilities: Option<CapabilityDescriptor>,
    chain: Option<TierChain>,
    sharpen: Option<UnsharpMask>,
    metrics: UnitMetrics,
    frames_seen: u64,
}

impl SuperResolutionUnit {
    /// Validate `config` and build an uninitialized unit using the system
    /// probe and the ONNX loader.
    pub fn new(config: UnitConfiguration) -> Result<Self> {
        config.validate()?;
        let sharpen = if config.sharpen {
            let mask = UnsharpMask::new(config.sharpen_amount);
            mask.validate()?;
            Some(mask)
        } else {
            None
        };
        Ok(Self {
            config,
            probe: Box::new(SystemProbe),
            loader: Arc::new(OnnxModelLoader::new()),
            capabilities: None,
            chain: None,
            sharpen,
            metrics: UnitMetrics::new(),
            frames_seen: 0,
        })
    }

    pub fn with_probe(mut self, probe: impl DeviceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_loader(mut self, loader: impl ModelLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_shared_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &UnitConfiguration {
        &self.config
    }

    /// Probe the device and select the tier.  Always succeeds.
    ///
    /// Calling it again re-probes and re-selects, which is how a unit picks up
    /// a new device or model between runs.
    pub fn initialize(&mut self) -> &TierSelection {
        let caps = self.probe.probe();
        let chain = TierChain::select(&self.config, &caps, self.loader.as_ref());
        let selection = chain.selection();
        info!(
            tier = %selection.tier,
            degraded = selection.degraded,
            precision = selection.precision.as_str(),
            tiling_size = selection.tiling_size,
            sharpen = self.sharpen.is_some(),
            scale = %self.config.scale,
            "Super-resolution unit initialized"
        );
        self.capabilities = Some(caps);
        self.frames_seen = 0;
        self.chain.insert(chain).selection()
    }

    pub fn is_initialized(&self) -> bool {
        self.chain.is_some()
    }

    /// Upscale one frame.  Never fails; see [`Status`].
    pub fn process(&mut self, frame: &FrameBuffer) -> Processed {
        if let Err(e) = check_input(frame) {
            self.metrics.record_invalid();
            warn!(
                height = frame.height(),
                width = frame.width(),
                error = %e,
                code = e.error_code(),
                "Rejected input frame"
            );
            return Processed::invalid();
        }

        if self.chain.is_none() {
            warn!("process() called before initialize(); initializing now");
            self.initialize();
        }

        let started = Instant::now();
        let scale = self.config.scale;
        let (upscaled, served_by, fell_back) = match self.chain.as_mut() {
            Some(chain) => {
                let dispatch = chain.execute(frame);
                (dispatch.frame, dispatch.served_by, dispatch.fell_back)
            }
            None => (
                InterpolationTier::bicubic(scale).upscale(frame),
                TierKind::Interpolation,
                true,
            ),
        };

        let sharpened = match &self.sharpen {
            Some(mask) => FrameBuffer::from_array(mask.apply(upscaled.view())),
            None => upscaled,
        };

        let mut output = sharpened.into_contiguous();
        let expected = (frame.height() * scale.get(), frame.width() * scale.get());
        if (output.height(), output.width()) != expected || output.channels() != FRAME_CHANNELS {
            let violation = UpresError::InvariantViolation(format!(
                "output {}x{}x{} for input {}x{} at {scale}",
                output.height(),
                output.width(),
                output.channels(),
                frame.height(),
                frame.width()
            ));
            warn!(
                error = %violation,
                code = violation.error_code(),
                "Output shape check failed; replacing with bicubic"
            );
            output = InterpolationTier::bicubic(scale).upscale(frame);
        }

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.metrics.record(elapsed_us, fell_back);
        self.frames_seen += 1;
        if self.frames_seen == 1 {
            info!(
                in_h = frame.height(),
                in_w = frame.width(),
                out_h = output.height(),
                out_w = output.width(),
                tier = %served_by,
                elapsed_us,
                "First frame processed"
            );
        } else if self.frames_seen % PROGRESS_EVERY == 0 {
            debug!(
                frames = self.frames_seen,
                tier = %served_by,
                elapsed_us,
                "Super-resolution progress"
            );
        }

        Processed {
            status: Status::Ok,
            frame: Some(output),
            served_by: Some(served_by),
        }
    }

    /// Selected tier, `None` before initialization.
    pub fn active_tier(&self) -> Option<TierKind> {
        self.chain.as_ref().map(TierChain::active_tier)
    }

    pub fn is_degraded(&self) -> bool {
        self.chain
            .as_ref()
            .is_some_and(|chain| chain.selection().degraded)
    }

    pub fn selection(&self) -> Option<&TierSelection> {
        self.chain.as_ref().map(TierChain::selection)
    }

    pub fn capabilities(&self) -> Option<&CapabilityDescriptor> {
        self.capabilities.as_ref()
    }

    pub fn metrics(&self) -> UnitMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Report final metrics and release the model.  Later `process` calls
    /// still succeed through bicubic interpolation.
    pub fn shutdown(&mut self) -> UnitMetricsSnapshot {
        if let Some(chain) = self.chain.as_mut() {
            chain.release_model();
        }
        let snapshot = self.metrics.snapshot();
        snapshot.report();
        info!(
            tier = ?self.active_tier(),
            degraded = self.is_degraded(),
            "Super-resolution unit shut down"
        );
        snapshot
    }
}

fn check_input(frame: &FrameBuffer) -> Result<()> {
    if frame.is_empty() {
        return Err(UpresError::EmptyFrame);
    }
    if frame.channels() != FRAME_CHANNELS {
        return Err(UpresError::ChannelCount(frame.channels()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use upres_core::config::ScaleFactor;
    use upres_core::device::StaticProbe;
    use upres_core::error::UpresError;
    use upres_core::session::{InferenceSession, LoadRequest};

    use super::*;
    use crate::tier::test_sessions::NearestSession;

    struct NearestLoader;

    impl ModelLoader for NearestLoader {
        fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceSession>> {
            Ok(Box::new(NearestSession::new(request.scale.get())))
        }
    }

    fn frame(h: usize, w: usize) -> FrameBuffer {
        FrameBuffer::new(h, w, (0..h * w * 3).map(|i| (i * 7 % 256) as u8).collect()).unwrap()
    }

    fn cpu_unit(config: UnitConfiguration) -> SuperResolutionUnit {
        SuperResolutionUnit::new(config)
            .unwrap()
            .with_probe(StaticProbe(CapabilityDescriptor::cpu_only()))
            .with_loader(NearestLoader)
    }

    #[test]
    fn invalid_sharpen_amount_fails_construction() {
        let config = UnitConfiguration {
            sharpen: true,
            sharpen_amount: 2.0,
            ..UnitConfiguration::default()
        };
        assert!(matches!(
            SuperResolutionUnit::new(config),
            Err(UpresError::Config(_))
        ));
    }

    #[test]
    fn wrong_channel_count_is_invalid_input() {
        let mut unit = cpu_unit(UnitConfiguration::default());
        unit.initialize();
        let four = FrameBuffer::with_channels(2, 2, 4, vec![0; 16]).unwrap();
        let result = unit.process(&four);
        assert_eq!(result.status, Status::InvalidInput);
        assert!(result.frame.is_none());
        assert_eq!(unit.metrics().invalid_inputs, 1);
    }

    #[test]
    fn process_before_initialize_initializes_lazily() {
        let mut unit = cpu_unit(UnitConfiguration::default());
        assert_eq!(unit.active_tier(), None);
        let result = unit.process(&frame(3, 3));
        assert_eq!(result.status, Status::Ok);
        assert_eq!(unit.active_tier(), Some(TierKind::Interpolation));
    }

    #[test]
    fn non_contiguous_input_produces_contiguous_output() {
        let base = Array3::from_shape_fn((4, 6, 3), |(y, x, c)| (y * 18 + x * 3 + c) as u8);
        let strided = FrameBuffer::from_array(base.permuted_axes([1, 0, 2]));
        assert!(!strided.is_contiguous());
        let mut unit = cpu_unit(UnitConfiguration::default());
        unit.initialize();
        let out = unit.process(&strided).frame.unwrap();
        assert!(out.is_contiguous());
        assert_eq!((out.height(), out.width(), out.channels()), (12, 8, 3));
    }

    #[test]
    fn sharpening_keeps_shape_on_model_tier() {
        let config = UnitConfiguration {
            model_path: Some("model.onnx".into()),
            fast_fallback: false,
            scale: ScaleFactor::X4,
            sharpen: true,
            sharpen_amount: 0.7,
            ..UnitConfiguration::default()
        };
        let mut unit = cpu_unit(config);
        assert_eq!(unit.initialize().tier, TierKind::Model);
        let result = unit.process(&frame(5, 7));
        assert_eq!(result.served_by, Some(TierKind::Model));
        let out = result.frame.unwrap();
        assert_eq!((out.height(), out.width(), out.channels()), (20, 28, 3));
    }

    #[test]
    fn shutdown_releases_model_but_keeps_serving() {
        let config = UnitConfiguration {
            model_path: Some("model.onnx".into()),
            fast_fallback: false,
            ..UnitConfiguration::default()
        };
        let mut unit = cpu_unit(config);
        unit.initialize();
        unit.process(&frame(2, 2));
        let snapshot = unit.shutdown();
        assert_eq!(snapshot.frames_processed, 1);
        assert_eq!(unit.active_tier(), Some(TierKind::Interpolation));

        let result = unit.process(&frame(2, 2));
        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.served_by, Some(TierKind::Interpolation));
    }

    #[test]
    fn status_strings_match_wire_names() {
        assert_eq!(Status::Ok.as_str(), "ok");
        assert_eq!(Status::InvalidInput.as_str(), "invalid-input");
    }
}
