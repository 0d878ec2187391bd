//! Frame ↔ model tensor layout conversion.
//!
//! Frames are interleaved `H×W×C` bytes; models consume planar
//! `1×C×H×W` floats in `[0, 1]`.  Channel order is carried through as is.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4};

use upres_core::error::{Result, UpresError};

/// `H×W×C` bytes → `1×C×H×W` floats in `[0, 1]`.
pub fn hwc_to_nchw(src: ArrayView3<'_, u8>) -> Array4<f32> {
    let (h, w, c) = src.dim();
    Array4::from_shape_fn((1, c, h, w), |(_, ch, y, x)| f32::from(src[[y, x, ch]]) / 255.0)
}

/// `1×C×H×W` floats → `H×W×C` bytes, clamping to `[0, 1]` before scaling.
pub fn nchw_to_hwc(tensor: ArrayView4<'_, f32>) -> Result<Array3<u8>> {
    let (n, c, h, w) = tensor.dim();
    if n != 1 {
        return Err(UpresError::ModelOutputShape(format!(
            "expected batch of 1, got {n}"
        )));
    }
    Ok(Array3::from_shape_fn((h, w, c), |(y, x, ch)| {
        (tensor[[0, ch, y, x]].clamp(0.0, 1.0) * 255.0).round() as u8
    }))
}
