//! Host-resident frame type exchanged at the unit boundary.
//!
//! # Layout
//!
//! [`FrameBuffer`] owns an `ndarray::Array3<u8>` indexed `[row, column,
//! channel]`.  The unit contract is 3 interleaved 8-bit channels in
//! row-major order; the channel order itself is opaque and preserved by
//! every stage (nothing swaps BGR and RGB).
//!
//! # Invariants
//!
//! 1. `data.len() == height × width × channels`, checked by every constructor.
//! 2. A frame built from a non-standard-layout array (for example a transposed
//!    or strided view) is still valid, but [`FrameBuffer::is_contiguous`]
//!    reports `false` until [`FrameBuffer::into_contiguous`] normalizes it.
//! 3. Frames are never mutated in place once handed to the unit.

use ndarray::{Array3, ArrayView3};

use crate::error::{Result, UpresError};

/// Channel count required at the unit boundary.
pub const FRAME_CHANNELS: usize = 3;

/// Owned interleaved `u8` frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Array3<u8>,
}

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<FrameBuffer>();
};

impl FrameBuffer {
    /// Build a 3-channel frame from a row-major byte buffer.
    pub fn new(height: usize, width: usize, data: Vec<u8>) -> Result<Self> {
        Self::with_channels(height, width, FRAME_CHANNELS, data)
    }

    /// Build a frame with an arbitrary channel count.
    ///
    /// Only 3-channel frames are accepted by the unit; other counts exist so
    /// sources can hand over what they decoded and let the unit report it.
    pub fn with_channels(
        height: usize,
        width: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        let need = height * width * channels;
        if data.len() != need {
            return Err(UpresError::BufferLength {
                need,
                have: data.len(),
            });
        }
        let data = Array3::from_shape_vec((height, width, channels), data)
            .map_err(|e| UpresError::DimensionMismatch(e.to_string()))?;
        Ok(Self { data })
    }

    /// Wrap an existing array without copying.
    pub fn from_array(data: Array3<u8>) -> Self {
        Self { data }
    }

    /// A zero-sized 3-channel frame.
    pub fn empty() -> Self {
        Self {
            data: Array3::zeros((0, 0, FRAME_CHANNELS)),
        }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// `true` when the frame has no pixels (zero height or width).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// Total byte count (`height × width × channels`).
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Whether the backing storage is in standard row-major order.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.data.is_standard_layout()
    }

    /// Re-lay the frame out in row-major order if it is not already.
    pub fn into_contiguous(self) -> Self {
        if self.is_contiguous() {
            return self;
        }
        Self {
            data: self.data.as_standard_layout().into_owned(),
        }
    }

    pub fn view(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// Row-major bytes, if the frame is contiguous.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.data.as_slice()
    }

    /// Copy out the row-major bytes regardless of layout.
    pub fn to_vec(&self) -> Vec<u8> {
        match self.data.as_slice() {
            Some(bytes) => bytes.to_vec(),
            None => self.data.iter().copied().collect(),
        }
    }

    pub fn into_array(self) -> Array3<u8> {
        self.data
    }
}
