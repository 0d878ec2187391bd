//! One-time tier selection and the per-frame fallback.
//!
//! Selection policy, in priority order:
//! 1. `fast_fallback` and no accelerator: interpolation; no model file is
//!    touched.
//! 2. Otherwise load the configured model (light variant when requested).
//!    A missing path, missing file, load error or unavailable runtime
//!    degrades to interpolation.
//! 3. Accelerator present: reduced precision is requested; otherwise full.
//!    The loaded model has the final word, so a float32-only model reports
//!    full precision even on an accelerator.
//! 4. `tiling_size > 0` applies to the heavy model tier only.
//!
//! The selection is never revisited per frame.  When the selected tier fails
//! on a frame, that frame alone is re-run through bicubic interpolation.

use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::{info, warn};

use upres_core::config::UnitConfiguration;
use upres_core::device::{CapabilityDescriptor, Precision};
use upres_core::error::UpresError;
use upres_core::frame::FrameBuffer;
use upres_core::session::{InferenceSession, LoadRequest, ModelLoader};

use crate::tier::{ExecutionTier, InterpolationTier, LightModelTier, ModelTier, TierKind};

/// Outcome of tier selection, fixed for the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TierSelection {
    pub tier: TierKind,
    pub precision: Precision,
    /// Tile edge in input pixels; `0` when tiling is off or not applicable.
    pub tiling_size: usize,
    /// A model was requested but could not be used.
    pub degraded: bool,
    /// Why the model tier was not used, when it was not.
    pub reason: Option<String>,
}

/// Which tier produced a frame.
#[derive(Debug)]
pub struct Dispatch {
    pub frame: FrameBuffer,
    pub served_by: TierKind,
    pub fell_back: bool,
}

#[derive(Debug)]
pub struct TierChain {
    selected: ExecutionTier,
    fallback: InterpolationTier,
    selection: TierSelection,
}

impl TierChain {
    pub fn select(
        config: &UnitConfiguration,
        caps: &CapabilityDescriptor,
        loader: &dyn ModelLoader,
    ) -> Self {
        let precision = if caps.accelerator_present {
            Precision::Reduced
        } else {
            Precision::Full
        };
        let fallback = InterpolationTier::bicubic(config.scale);
        let interpolation = InterpolationTier::new(config.scale, config.interpolation.into());

        let interpolation_chain = |degraded: bool, reason: String| {
            let selection = TierSelection {
                tier: TierKind::Interpolation,
                precision,
                tiling_size: 0,
                degraded,
                reason: Some(reason),
            };
            Self {
                selected: ExecutionTier::Interpolation(interpolation),
                fallback,
                selection,
            }
        };

        if config.fast_fallback && !caps.accelerator_present {
            info!(
                kernel = config.interpolation.as_str(),
                "No accelerator and fast_fallback set; using interpolation tier"
            );
            return interpolation_chain(false, "fast fallback: no accelerator".into());
        }

        let Some(model_path) = config.model_path.as_deref() else {
            warn!("No model_path configured; degrading to interpolation tier");
            return interpolation_chain(true, "no model_path configured".into());
        };

        let request = LoadRequest {
            model_path,
            variant: config.model_variant,
            scale: config.scale,
            precision,
            accelerated: caps.accelerator_present,
        };
        let session = match load_guarded(loader, &request) {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    path = %model_path.display(),
                    error = %e,
                    code = e.error_code(),
                    "Model tier unavailable; degrading to interpolation tier"
                );
                return interpolation_chain(true, e.to_string());
            }
        };

        let effective = session.metadata().precision;
        if effective != precision {
            warn!(
                requested = precision.as_str(),
                effective = effective.as_str(),
                model = %session.metadata().name,
                "Model does not support the requested precision"
            );
        }

        let (selected, tiling_size) = if config.model_variant.is_light() {
            (
                ExecutionTier::LightModel(LightModelTier::new(session, config.scale)),
                0,
            )
        } else {
            (
                ExecutionTier::Model(ModelTier::new(session, config.scale, config.tiling_size)),
                config.tiling_size,
            )
        };
        let selection = TierSelection {
            tier: selected.kind(),
            precision: effective,
            tiling_size,
            degraded: false,
            reason: None,
        };
        info!(
            tier = %selection.tier,
            precision = effective.as_str(),
            tiling_size,
            scale = %config.scale,
            "Model tier selected"
        );
        Self {
            selected,
            fallback,
            selection,
        }
    }

    pub fn selection(&self) -> &TierSelection {
        &self.selection
    }

    pub fn active_tier(&self) -> TierKind {
        self.selected.kind()
    }

    /// Run the selected tier; on failure re-run this frame through bicubic.
    pub fn execute(&mut self, frame: &FrameBuffer) -> Dispatch {
        match self.selected.scale(frame) {
            Ok(out) => Dispatch {
                frame: out,
                served_by: self.selected.kind(),
                fell_back: false,
            },
            Err(failure) => {
                warn!(
                    tier = %failure.tier,
                    error = %failure.reason,
                    code = failure.reason.error_code(),
                    "Tier failed on frame; falling back to bicubic for this frame"
                );
                Dispatch {
                    frame: self.fallback.upscale(frame),
                    served_by: TierKind::Interpolation,
                    fell_back: true,
                }
            }
        }
    }

    /// Drop the model handle; later frames use the bicubic fallback.
    pub fn release_model(&mut self) {
        if matches!(self.selected, ExecutionTier::Interpolation(_)) {
            return;
        }
        self.selected = ExecutionTier::Interpolation(self.fallback);
        self.selection.tier = TierKind::Interpolation;
        self.selection.tiling_size = 0;
        self.selection.reason = Some("model released at shutdown".into());
    }
}

fn load_guarded(
    loader: &dyn ModelLoader,
    request: &LoadRequest<'_>,
) -> Result<Box<dyn InferenceSession>, UpresError> {
    panic::catch_unwind(AssertUnwindSafe(|| loader.load(request))).unwrap_or_else(|_| {
        Err(UpresError::PanicRecovered {
            stage: "model_load",
            message: "model loader panicked".into(),
        })
    })
}
