//! Tiled model execution.
//!
//! The input is cut into `tile × tile` cores.  Each core is grown by a pad
//! margin on every side (clamped to the image) before it is handed to the
//! model, and only the core region of the scaled output is kept.  Cores
//! partition the image, so every output pixel is written exactly once.

use ndarray::{Array4, ArrayView4, s};
use tracing::trace;

use upres_core::error::{Result, UpresError};

/// Pad margin, in input pixels, added on each side of a tile.
pub const TILE_PAD: usize = 10;

/// One tile: the core it owns plus the padded window sent to the model.
/// Ranges are half-open, in input pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRect {
    pub y0: usize,
    pub y1: usize,
    pub x0: usize,
    pub x1: usize,
    pub pad_y0: usize,
    pub pad_y1: usize,
    pub pad_x0: usize,
    pub pad_x1: usize,
}

impl TileRect {
    pub fn padded_height(&self) -> usize {
        self.pad_y1 - self.pad_y0
    }

    pub fn padded_width(&self) -> usize {
        self.pad_x1 - self.pad_x0
    }
}

/// Row-major tile plan.  `tile == 0` yields a single unpadded tile.
pub fn plan_tiles(height: usize, width: usize, tile: usize, pad: usize) -> Vec<TileRect> {
    if height == 0 || width == 0 {
        return Vec::new();
    }
    if tile == 0 {
        return vec![TileRect {
            y0: 0,
            y1: height,
            x0: 0,
            x1: width,
            pad_y0: 0,
            pad_y1: height,
            pad_x0: 0,
            pad_x1: width,
        }];
    }

    let rows = height.div_ceil(tile);
    let cols = width.div_ceil(tile);
    let mut tiles = Vec::with_capacity(rows * cols);
    for ty in 0..rows {
        for tx in 0..cols {
            let y0 = ty * tile;
            let x0 = tx * tile;
            let y1 = (y0 + tile).min(height);
            let x1 = (x0 + tile).min(width);
            tiles.push(TileRect {
                y0,
                y1,
                x0,
                x1,
                pad_y0: y0.saturating_sub(pad),
                pad_y1: (y1 + pad).min(height),
                pad_x0: x0.saturating_sub(pad),
                pad_x1: (x1 + pad).min(width),
            });
        }
    }
    tiles
}

/// Fail unless `output` is exactly `input` scaled spatially by `scale`.
pub fn check_scaled_shape(
    input: (usize, usize, usize, usize),
    output: (usize, usize, usize, usize),
    scale: usize,
) -> Result<()> {
    let (n, c, h, w) = input;
    let expected = (n, c, h * scale, w * scale);
    if output != expected {
        return Err(UpresError::ModelOutputShape(format!(
            "expected {expected:?} for input {input:?} at {scale}x, got {output:?}"
        )));
    }
    Ok(())
}

/// Run `infer` over each padded tile of `input` and stitch the cropped
/// outputs into a `scale×` tensor.
///
/// Any tile whose output is not exactly its padded window scaled by `scale`
/// aborts the whole frame with [`UpresError::ModelOutputShape`].
pub fn run_tiled<F>(
    input: ArrayView4<'_, f32>,
    scale: usize,
    tile: usize,
    pad: usize,
    mut infer: F,
) -> Result<Array4<f32>>
where
    F: FnMut(ArrayView4<'_, f32>) -> Result<Array4<f32>>,
{
    let (n, c, h, w) = input.dim();
    let mut output = Array4::<f32>::zeros((n, c, h * scale, w * scale));

    let plan = plan_tiles(h, w, tile, pad);
    trace!(tiles = plan.len(), tile, pad, height = h, width = w, "Tiled inference");
    for rect in plan {
        let window = input.slice(s![.., .., rect.pad_y0..rect.pad_y1, rect.pad_x0..rect.pad_x1]);
        let scaled = infer(window)?;
        check_scaled_shape(window.dim(), scaled.dim(), scale)?;

        let crop_y = (rect.y0 - rect.pad_y0) * scale;
        let crop_x = (rect.x0 - rect.pad_x0) * scale;
        let core_h = (rect.y1 - rect.y0) * scale;
        let core_w = (rect.x1 - rect.x0) * scale;
        output
            .slice_mut(s![
                ..,
                ..,
                rect.y0 * scale..rect.y1 * scale,
                rect.x0 * scale..rect.x1 * scale
            ])
            .assign(&scaled.slice(s![
                ..,
                ..,
                crop_y..crop_y + core_h,
                crop_x..crop_x + core_w
            ]));
    }
    Ok(output)
}
