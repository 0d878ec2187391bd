//! Separable resampling of interleaved `u8` frames.
//!
//! Both kernels are evaluated in two passes (horizontal into an `f32`
//! scratch buffer, then vertical with rounding back to `u8`).  Source
//! coordinates follow the pixel-centre convention
//! `src = (dst + 0.5) / scale - 0.5` and borders are clamped.

use std::borrow::Cow;
use std::f64::consts::PI;

use ndarray::{Array3, ArrayView3};

use upres_core::config::{InterpolationKernel, ScaleFactor};
use upres_core::frame::FrameBuffer;

/// Cubic convolution coefficient (matches the common `INTER_CUBIC` choice).
const CUBIC_A: f64 = -0.75;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResampleKernel {
    Bicubic,
    Lanczos3,
}

impl ResampleKernel {
    fn support(self) -> f64 {
        match self {
            Self::Bicubic => 2.0,
            Self::Lanczos3 => 3.0,
        }
    }

    fn weight(self, x: f64) -> f64 {
        match self {
            Self::Bicubic => cubic(x),
            Self::Lanczos3 => lanczos3(x),
        }
    }
}

impl From<InterpolationKernel> for ResampleKernel {
    fn from(value: InterpolationKernel) -> Self {
        match value {
            InterpolationKernel::Bicubic => Self::Bicubic,
            InterpolationKernel::Lanczos => Self::Lanczos3,
        }
    }
}

fn cubic(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        ((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

fn lanczos3(x: f64) -> f64 {
    if x.abs() < 3.0 { sinc(x) * sinc(x / 3.0) } else { 0.0 }
}

/// Per-output-coordinate source taps `(index, weight)`, weights normalized.
fn contributions(in_len: usize, out_len: usize, kernel: ResampleKernel) -> Vec<Vec<(usize, f32)>> {
    let ratio = in_len as f64 / out_len as f64;
    // Widen the filter when shrinking so every source pixel contributes.
    let filter_scale = ratio.max(1.0);
    let support = kernel.support() * filter_scale;
    let last = in_len as i64 - 1;

    (0..out_len)
        .map(|o| {
            let center = (o as f64 + 0.5) * ratio - 0.5;
            let left = (center - support).floor() as i64 + 1;
            let right = (center + support).floor() as i64;
            let mut taps = Vec::with_capacity((right - left + 1).max(0) as usize);
            let mut sum = 0.0f64;
            for i in left..=right {
                let w = kernel.weight((center - i as f64) / filter_scale);
                if w == 0.0 {
                    continue;
                }
                taps.push((i.clamp(0, last) as usize, w));
                sum += w;
            }
            if sum == 0.0 {
                let nearest = center.round().clamp(0.0, last as f64) as usize;
                return vec![(nearest, 1.0)];
            }
            taps.into_iter()
                .map(|(i, w)| (i, (w / sum) as f32))
                .collect()
        })
        .collect()
}

#[inline]
fn quantize(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Resize an interleaved `H×W×C` image to `out_h×out_w×C`.
///
/// Infallible: an empty source yields a zero-filled output of the requested
/// size.
pub fn resize(
    src: ArrayView3<'_, u8>,
    out_h: usize,
    out_w: usize,
    kernel: ResampleKernel,
) -> Array3<u8> {
    let (in_h, in_w, ch) = src.dim();
    let mut out = Array3::<u8>::zeros((out_h, out_w, ch));
    if in_h == 0 || in_w == 0 || out_h == 0 || out_w == 0 || ch == 0 {
        return out;
    }

    let pixels: Cow<'_, [u8]> = match src.as_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(src.iter().copied().collect()),
    };

    let x_taps = contributions(in_w, out_w, kernel);
    let y_taps = contributions(in_h, out_h, kernel);

    // Horizontal pass: in_h × out_w × ch.
    let in_stride = in_w * ch;
    let stride = out_w * ch;
    let mut scratch = vec![0.0f32; in_h * stride];
    for (src_row, dst_row) in pixels
        .chunks_exact(in_stride)
        .zip(scratch.chunks_exact_mut(stride))
    {
        for (x, taps) in x_taps.iter().enumerate() {
            for c in 0..ch {
                let mut acc = 0.0f32;
                for &(ix, w) in taps {
                    acc += f32::from(src_row[ix * ch + c]) * w;
                }
                dst_row[x * ch + c] = acc;
            }
        }
    }

    // Vertical pass.
    for (mut row, taps) in out.outer_iter_mut().zip(y_taps.iter()) {
        for ((x, c), value) in row.indexed_iter_mut() {
            let offset = x * ch + c;
            let mut acc = 0.0f32;
            for &(iy, w) in taps {
                acc += scratch[iy * stride + offset] * w;
            }
            *value = quantize(acc);
        }
    }
    out
}

/// Upscale a frame by an integer factor.
pub fn upscale(frame: &FrameBuffer, scale: ScaleFactor, kernel: ResampleKernel) -> FrameBuffer {
    let s = scale.get();
    FrameBuffer::from_array(resize(
        frame.view(),
        frame.height() * s,
        frame.width() * s,
        kernel,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(h: usize, w: usize) -> Array3<u8> {
        Array3::from_shape_fn((h, w, 3), |(y, x, c)| ((y * 31 + x * 17 + c * 5) % 256) as u8)
    }

    #[test]
    fn kernels_vanish_at_nonzero_integers() {
        for kernel in [ResampleKernel::Bicubic, ResampleKernel::Lanczos3] {
            assert!((kernel.weight(0.0) - 1.0).abs() < 1e-12);
            for n in 1..=3 {
                assert!(kernel.weight(n as f64).abs() < 1e-12, "{kernel:?} at {n}");
            }
        }
    }

    #[test]
    fn same_size_resize_is_identity() {
        let src = gradient(7, 9);
        for kernel in [ResampleKernel::Bicubic, ResampleKernel::Lanczos3] {
            assert_eq!(resize(src.view(), 7, 9, kernel), src, "{kernel:?}");
        }
    }

    #[test]
    fn constant_image_stays_constant() {
        let src = Array3::from_elem((5, 6, 3), 200u8);
        for kernel in [ResampleKernel::Bicubic, ResampleKernel::Lanczos3] {
            let out = resize(src.view(), 20, 24, kernel);
            assert!(out.iter().all(|&v| v == 200), "{kernel:?}");
        }
    }

    #[test]
    fn upscale_follows_shape_law_for_both_scales() {
        let frame = FrameBuffer::from_array(gradient(6, 10));
        for (scale, factor) in [(ScaleFactor::X2, 2), (ScaleFactor::X4, 4)] {
            for kernel in [ResampleKernel::Bicubic, ResampleKernel::Lanczos3] {
                let out = upscale(&frame, scale, kernel);
                assert_eq!(out.height(), 6 * factor);
                assert_eq!(out.width(), 10 * factor);
                assert_eq!(out.channels(), 3);
                assert!(out.is_contiguous());
            }
        }
    }

    #[test]
    fn channels_are_not_mixed() {
        let src = Array3::from_shape_fn((4, 4, 3), |(_, _, c)| [10u8, 128, 250][c]);
        let out = resize(src.view(), 8, 8, ResampleKernel::Bicubic);
        for ((_, _, c), &v) in out.indexed_iter() {
            assert_eq!(v, [10u8, 128, 250][c]);
        }
    }

    #[test]
    fn non_contiguous_source_matches_contiguous() {
        let src = gradient(5, 8);
        let transposed = src.view().permuted_axes([1, 0, 2]);
        let owned = transposed.as_standard_layout().into_owned();
        assert_eq!(
            resize(transposed, 16, 10, ResampleKernel::Lanczos3),
            resize(owned.view(), 16, 10, ResampleKernel::Lanczos3)
        );
    }

    #[test]
    fn single_pixel_upscales_to_flat_block() {
        let src = Array3::from_shape_vec((1, 1, 3), vec![1, 2, 3]).unwrap();
        let out = resize(src.view(), 4, 4, ResampleKernel::Bicubic);
        for ((_, _, c), &v) in out.indexed_iter() {
            assert_eq!(v, [1u8, 2, 3][c]);
        }
    }
}
