#![doc = include_str!("../README.md")]

pub mod resample;
pub mod sharpen;
pub mod tensor;
pub mod tile;

pub use resample::{ResampleKernel, resize, upscale};
pub use sharpen::UnsharpMask;
pub use tensor::{hwc_to_nchw, nchw_to_hwc};
pub use tile::{TILE_PAD, TileRect, check_scaled_shape, plan_tiles, run_tiled};
