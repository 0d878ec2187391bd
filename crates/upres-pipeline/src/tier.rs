//! Execution tiers.
//!
//! [`ExecutionTier`] is a closed enum; [`ExecutionTier::scale`] is the one
//! place that dispatches over it.  Model tiers report failures as values
//! ([`TierFailure`]) so the caller decides what to do with the frame.
//! [`InterpolationTier`] cannot fail for a non-empty 3-channel frame.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use upres_core::config::ScaleFactor;
use upres_core::error::{Result, UpresError};
use upres_core::frame::{FRAME_CHANNELS, FrameBuffer};
use upres_core::session::InferenceSession;
use upres_kernels::resample::{self, ResampleKernel};
use upres_kernels::tensor::{hwc_to_nchw, nchw_to_hwc};
use upres_kernels::tile::{TILE_PAD, run_tiled};

/// Tier discriminant, for introspection and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Model,
    LightModel,
    Interpolation,
}

impl TierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::LightModel => "light_model",
            Self::Interpolation => "interpolation",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tier could not produce a frame.
#[derive(Debug)]
pub struct TierFailure {
    pub tier: TierKind,
    pub reason: UpresError,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tier failed: {}", self.tier, self.reason)
    }
}

/// Result of one [`ExecutionTier::scale`] call.
pub type TierOutcome = std::result::Result<FrameBuffer, TierFailure>;

// ─── Model tiers ─────────────────────────────────────────────────────────────

fn run_model(
    session: &mut dyn InferenceSession,
    frame: &FrameBuffer,
    scale: ScaleFactor,
    tiling_size: usize,
) -> Result<FrameBuffer> {
    let input = hwc_to_nchw(frame.view());
    let output = run_tiled(input.view(), scale.get(), tiling_size, TILE_PAD, |window| {
        session.run(window)
    })?;
    let pixels = nchw_to_hwc(output.view())?;
    if pixels.dim().2 != FRAME_CHANNELS {
        return Err(UpresError::ModelOutputShape(format!(
            "model produced {} channels",
            pixels.dim().2
        )));
    }
    Ok(FrameBuffer::from_array(pixels))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a model call, turning a panic inside the runtime into an error.
fn guarded<F>(stage: &'static str, f: F) -> Result<FrameBuffer>
where
    F: FnOnce() -> Result<FrameBuffer>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(UpresError::PanicRecovered {
            stage,
            message: panic_message(payload),
        })
    })
}

/// Heavy learned model, optionally tiled.
pub struct ModelTier {
    session: Box<dyn InferenceSession>,
    scale: ScaleFactor,
    tiling_size: usize,
}

impl ModelTier {
    pub fn new(session: Box<dyn InferenceSession>, scale: ScaleFactor, tiling_size: usize) -> Self {
        Self {
            session,
            scale,
            tiling_size,
        }
    }

    pub fn tiling_size(&self) -> usize {
        self.tiling_size
    }

    pub fn session(&self) -> &dyn InferenceSession {
        self.session.as_ref()
    }

    fn run(&mut self, frame: &FrameBuffer) -> Result<FrameBuffer> {
        run_model(self.session.as_mut(), frame, self.scale, self.tiling_size)
    }
}

/// Light learned model; always runs on the whole frame.
pub struct LightModelTier {
    session: Box<dyn InferenceSession>,
    scale: ScaleFactor,
}

impl LightModelTier {
    pub fn new(session: Box<dyn InferenceSession>, scale: ScaleFactor) -> Self {
        Self { session, scale }
    }

    pub fn session(&self) -> &dyn InferenceSession {
        self.session.as_ref()
    }

    fn run(&mut self, frame: &FrameBuffer) -> Result<FrameBuffer> {
        run_model(self.session.as_mut(), frame, self.scale, 0)
    }
}

// ─── Interpolation ───────────────────────────────────────────────────────────

/// Classical resampling.  Pure, stateless, infallible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterpolationTier {
    scale: ScaleFactor,
    kernel: ResampleKernel,
}

impl InterpolationTier {
    pub fn new(scale: ScaleFactor, kernel: ResampleKernel) -> Self {
        Self { scale, kernel }
    }

    pub fn bicubic(scale: ScaleFactor) -> Self {
        Self::new(scale, ResampleKernel::Bicubic)
    }

    pub fn kernel(&self) -> ResampleKernel {
        self.kernel
    }

    pub fn upscale(&self, frame: &FrameBuffer) -> FrameBuffer {
        resample::upscale(frame, self.scale, self.kernel)
    }
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

pub enum ExecutionTier {
    Model(ModelTier),
    LightModel(LightModelTier),
    Interpolation(InterpolationTier),
}

impl ExecutionTier {
    pub fn kind(&self) -> TierKind {
        match self {
            Self::Model(_) => TierKind::Model,
            Self::LightModel(_) => TierKind::LightModel,
            Self::Interpolation(_) => TierKind::Interpolation,
        }
    }

    /// Upscale one frame.  Model runtime errors and panics come back as a
    /// [`TierFailure`]; nothing unwinds out of here.
    pub fn scale(&mut self, frame: &FrameBuffer) -> TierOutcome {
        let tier = self.kind();
        let result = match self {
            Self::Model(t) => guarded("model_tier", || t.run(frame)),
            Self::LightModel(t) => guarded("light_model_tier", || t.run(frame)),
            Self::Interpolation(t) => Ok(t.upscale(frame)),
        };
        result.map_err(|reason| TierFailure { tier, reason })
    }
}

impl fmt::Debug for ExecutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(t) => f
                .debug_struct("Model")
                .field("model", &t.session.metadata().name)
                .field("scale", &t.scale)
                .field("tiling_size", &t.tiling_size)
                .finish(),
            Self::LightModel(t) => f
                .debug_struct("LightModel")
                .field("model", &t.session.metadata().name)
                .field("scale", &t.scale)
                .finish(),
            Self::Interpolation(t) => f.debug_tuple("Interpolation").field(t).finish(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_sessions::*;
    use super::*;

    fn frame(h: usize, w: usize) -> FrameBuffer {
        let data = (0..h * w * 3).map(|i| (i % 251) as u8).collect();
        FrameBuffer::new(h, w, data).unwrap()
    }

    fn all_tiers(scale: ScaleFactor) -> Vec<ExecutionTier> {
        vec![
            ExecutionTier::Model(ModelTier::new(
                Box::new(NearestSession::new(scale.get())),
                scale,
                0,
            )),
            ExecutionTier::Model(ModelTier::new(
                Box::new(NearestSession::new(scale.get())),
                scale,
                8,
            )),
            ExecutionTier::LightModel(LightModelTier::new(
                Box::new(NearestSession::new(scale.get())),
                scale,
            )),
            ExecutionTier::Interpolation(InterpolationTier::bicubic(scale)),
            ExecutionTier::Interpolation(InterpolationTier::new(scale, ResampleKernel::Lanczos3)),
        ]
    }

    #[test]
    fn every_tier_obeys_the_shape_law() {
        let input = frame(19, 23);
        for (scale, s) in [(ScaleFactor::X2, 2), (ScaleFactor::X4, 4)] {
            for mut tier in all_tiers(scale) {
                let kind = tier.kind();
                let out = tier.scale(&input).unwrap_or_else(|f| panic!("{kind}: {f}"));
                assert_eq!((out.height(), out.width()), (19 * s, 23 * s), "{kind}");
                assert_eq!(out.channels(), 3, "{kind}");
                assert!(out.is_contiguous(), "{kind}");
            }
        }
    }

    #[test]
    fn tiled_model_matches_untiled_model() {
        let input = frame(30, 41);
        let mut whole = ExecutionTier::Model(ModelTier::new(
            Box::new(NearestSession::new(2)),
            ScaleFactor::X2,
            0,
        ));
        let mut tiled = ExecutionTier::Model(ModelTier::new(
            Box::new(NearestSession::new(2)),
            ScaleFactor::X2,
            16,
        ));
        assert_eq!(tiled.scale(&input).unwrap(), whole.scale(&input).unwrap());
    }

    #[test]
    fn wrong_model_output_shape_is_a_tier_failure() {
        let mut tier = ExecutionTier::Model(ModelTier::new(
            Box::new(WrongShapeSession(metadata("wrong"))),
            ScaleFactor::X2,
            0,
        ));
        let failure = tier.scale(&frame(4, 4)).unwrap_err();
        assert_eq!(failure.tier, TierKind::Model);
        assert!(matches!(failure.reason, UpresError::ModelOutputShape(_)));
    }

    #[test]
    fn runtime_errors_and_panics_become_failures() {
        let mut erroring = ExecutionTier::LightModel(LightModelTier::new(
            Box::new(ErrorSession(metadata("err"))),
            ScaleFactor::X2,
        ));
        let failure = erroring.scale(&frame(4, 4)).unwrap_err();
        assert_eq!(failure.tier, TierKind::LightModel);
        assert!(failure.reason.is_recoverable());

        let mut panicking = ExecutionTier::Model(ModelTier::new(
            Box::new(PanicSession(metadata("panic"))),
            ScaleFactor::X4,
            0,
        ));
        let failure = panicking.scale(&frame(4, 4)).unwrap_err();
        match failure.reason {
            UpresError::PanicRecovered { stage, message } => {
                assert_eq!(stage, "model_tier");
                assert!(message.contains("runtime exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
