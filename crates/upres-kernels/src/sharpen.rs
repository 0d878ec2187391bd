//! Gaussian blur and unsharp mask.

use ndarray::{Array3, ArrayView3};

use upres_core::error::{Result, UpresError};

/// Unsharp mask: `out = img * (1 + amount) - blur(img, sigma) * amount`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnsharpMask {
    /// Gaussian standard deviation in output pixels.
    pub sigma: f32,
    /// Blend weight in `[0, 1]`.
    pub amount: f32,
}

impl UnsharpMask {
    pub const DEFAULT_SIGMA: f32 = 3.0;

    pub fn new(amount: f32) -> Self {
        Self {
            sigma: Self::DEFAULT_SIGMA,
            amount,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(UpresError::Config(format!(
                "unsharp sigma must be > 0, got {}",
                self.sigma
            )));
        }
        if !self.amount.is_finite() || !(0.0..=1.0).contains(&self.amount) {
            return Err(UpresError::Config(format!(
                "unsharp amount must be within [0, 1], got {}",
                self.amount
            )));
        }
        Ok(())
    }

    pub fn apply(&self, src: ArrayView3<'_, u8>) -> Array3<u8> {
        if self.amount == 0.0 || src.is_empty() {
            return src.to_owned();
        }
        let blurred = gaussian_blur(src, self.sigma);
        let a = self.amount;
        let mut out = Array3::<u8>::zeros(src.dim());
        ndarray::Zip::from(&mut out)
            .and(&src)
            .and(&blurred)
            .for_each(|o, &s, &b| {
                let v = f32::from(s) * (1.0 + a) - b * a;
                *o = v.round().clamp(0.0, 255.0) as u8;
            });
        out
    }
}

/// Kernel radius covering ±4σ.
pub fn gaussian_radius(sigma: f32) -> usize {
    (sigma * 4.0).ceil().max(1.0) as usize
}

/// Normalized 1-D Gaussian weights of length `2 * radius + 1`.
pub fn gaussian_kernel(sigma: f32, radius: usize) -> Vec<f32> {
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut weights: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-(d * d) / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Separable Gaussian blur with clamped borders, returned as `f32`.
pub fn gaussian_blur(src: ArrayView3<'_, u8>, sigma: f32) -> Array3<f32> {
    let (h, w, ch) = src.dim();
    let radius = gaussian_radius(sigma) as isize;
    let kernel = gaussian_kernel(sigma, radius as usize);

    let mut horizontal = Array3::<f32>::zeros((h, w, ch));
    for ((y, x, c), value) in horizontal.indexed_iter_mut() {
        let mut acc = 0.0f32;
        for (k, weight) in kernel.iter().enumerate() {
            let xx = (x as isize + k as isize - radius).clamp(0, w as isize - 1) as usize;
            acc += f32::from(src[[y, xx, c]]) * weight;
        }
        *value = acc;
    }

    let mut out = Array3::<f32>::zeros((h, w, ch));
    for ((y, x, c), value) in out.indexed_iter_mut() {
        let mut acc = 0.0f32;
        for (k, weight) in kernel.iter().enumerate() {
            let yy = (y as isize + k as isize - radius).clamp(0, h as isize - 1) as usize;
            acc += horizontal[[yy, x, c]] * weight;
        }
        *value = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_blur(src: &Array3<u8>, sigma: f32) -> Array3<f32> {
        let (h, w, ch) = src.dim();
        let radius = gaussian_radius(sigma) as isize;
        let kernel = gaussian_kernel(sigma, radius as usize);
        Array3::from_shape_fn((h, w, ch), |(y, x, c)| {
            let mut acc = 0.0f32;
            for dy in -radius..=radius {
                let yy = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                for dx in -radius..=radius {
                    let xx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                    let weight = kernel[(dy + radius) as usize] * kernel[(dx + radius) as usize];
                    acc += f32::from(src[[yy, xx, c]]) * weight;
                }
            }
            acc
        })
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(UnsharpMask::new(0.5).validate().is_ok());
        assert!(UnsharpMask::new(1.5).validate().is_err());
        assert!(UnsharpMask { sigma: 0.0, amount: 0.5 }.validate().is_err());
        assert!(UnsharpMask::new(f32::NAN).validate().is_err());
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let radius = gaussian_radius(3.0);
        assert_eq!(radius, 12);
        let k = gaussian_kernel(3.0, radius);
        assert_eq!(k.len(), 25);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        for i in 0..radius {
            assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-7);
        }
    }

    #[test]
    fn separable_blur_matches_direct_2d_reference() {
        let src = Array3::from_shape_fn((9, 11, 3), |(y, x, c)| ((y * 37 + x * 11 + c * 60) % 256) as u8);
        let got = gaussian_blur(src.view(), 1.5);
        let want = ref_blur(&src, 1.5);
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-2, "got {g}, want {w}");
        }
    }

    #[test]
    fn flat_image_is_unchanged_by_sharpening() {
        let src = Array3::from_elem((8, 8, 3), 90u8);
        let out = UnsharpMask::new(0.8).apply(src.view());
        assert_eq!(out, src);
    }

    #[test]
    fn zero_amount_is_identity() {
        let src = Array3::from_shape_fn((4, 5, 3), |(y, x, c)| (y * 50 + x * 3 + c) as u8);
        assert_eq!(UnsharpMask::new(0.0).apply(src.view()), src);
    }

    #[test]
    fn edges_gain_contrast() {
        let src = Array3::from_shape_fn((6, 12, 3), |(_, x, _)| if x < 6 { 60u8 } else { 180u8 });
        let out = UnsharpMask::new(1.0).apply(src.view());
        assert!(out[[3, 5, 0]] < 60, "dark side of edge should darken: {}", out[[3, 5, 0]]);
        assert!(out[[3, 6, 0]] > 180, "bright side of edge should brighten: {}", out[[3, 6, 0]]);
    }
}
