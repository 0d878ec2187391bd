#![doc = include_str!("../README.md")]

pub mod precision;

#[cfg(feature = "onnx-runtime")]
pub mod session;
#[cfg(not(feature = "onnx-runtime"))]
#[path = "session_stub.rs"]
pub mod session;

pub use session::{OnnxModelLoader, runtime_available};
