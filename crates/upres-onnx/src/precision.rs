//! `f32` ↔ `f16` tensor conversion for reduced-precision models.

use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::ArrayView4;

/// Flatten a tensor view (any layout) into standard-order `f16` values.
pub fn to_f16(input: ArrayView4<'_, f32>) -> Vec<f16> {
    let mut out = vec![f16::ZERO; input.len()];
    match input.as_slice() {
        Some(src) => out.convert_from_f32_slice(src),
        None => {
            for (dst, &src) in out.iter_mut().zip(input.iter()) {
                *dst = f16::from_f32(src);
            }
        }
    }
    out
}

/// Widen `f16` values back to `f32`.
pub fn to_f32(input: &[f16]) -> Vec<f32> {
    let mut out = vec![0.0f32; input.len()];
    input.convert_to_f32_slice(&mut out);
    out
}

/// Flatten a tensor view (any layout) into standard-order `f32` values.
pub fn to_contiguous_f32(input: ArrayView4<'_, f32>) -> Vec<f32> {
    match input.as_slice() {
        Some(src) => src.to_vec(),
        None => input.iter().copied().collect(),
    }
}

/// Largest absolute error introduced by an `f16` round trip over `[0, 1]`.
pub fn f16_unit_range_error_bound() -> f32 {
    f16::EPSILON.to_f32() / 2.0
}
