#![doc = include_str!("../README.md")]

pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod session;
pub mod stream_traits;

#[cfg(feature = "cuda")]
mod cuda_query;
#[cfg(not(feature = "cuda"))]
#[path = "cuda_query_stub.rs"]
mod cuda_query;

pub use config::{
    InterpolationKernel, ModelVariant, PacingConfig, ParameterStore, ScaleFactor,
    UnitConfiguration,
};
pub use device::{CapabilityDescriptor, DeviceProbe, Precision, StaticProbe, SystemProbe};
pub use error::{Result, UpresError};
pub use frame::FrameBuffer;
pub use session::{InferenceSession, LoadRequest, ModelLoader, ModelMetadata};
pub use stream_traits::{FrameSink, FrameSource};
