//! Sliding-window reshaping shared by convolution and pooling.
//!
//! For one channel-major sample of `H×W×C`, `im2col` builds a row-major
//! matrix with `C·k·k` rows and `H_out·W_out` columns. Row
//! `c·k·k + ky·k + kx` holds, for every output position, the input value
//! under kernel offset `(ky, kx)` of channel `c`, so the rows of one channel
//! form a contiguous block. Positions that fall into the zero padding read as
//! zero. `col2im` is the adjoint: it scatter-adds a column matrix back onto
//! the input grid, summing overlapping windows and dropping padding.

use crate::error::{NetError, NetResult};
use crate::record::Dims;
use lenet_core::Float;

/// Square sliding window: kernel size, stride and symmetric zero padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub kernel: usize,
    pub stride: usize,
    pub pad: usize,
}

impl Window {
    pub fn new(kernel: usize, stride: usize, pad: usize) -> NetResult<Self> {
        if kernel == 0 || stride == 0 {
            return Err(NetError::Configuration(format!(
                "kernel_size and stride must be positive, got kernel_size={} stride={}",
                kernel, stride
            )));
        }
        Ok(Window {
            kernel,
            stride,
            pad,
        })
    }

    /// `floor((in + 2·pad − kernel) / stride) + 1`.
    pub fn output_len(&self, input: usize) -> NetResult<usize> {
        let padded = input + 2 * self.pad;
        if padded < self.kernel {
            return Err(NetError::Configuration(format!(
                "kernel_size {} exceeds padded input extent {}",
                self.kernel, padded
            )));
        }
        Ok((padded - self.kernel) / self.stride + 1)
    }

    /// Output spatial shape for `input`, carrying `channels` through.
    pub fn output_dims(&self, input: Dims, channels: usize) -> NetResult<Dims> {
        Ok(Dims::new(
            self.output_len(input.height)?,
            self.output_len(input.width)?,
            channels,
        ))
    }

    /// Rows per channel block in the column matrix.
    pub fn area(&self) -> usize {
        self.kernel * self.kernel
    }

    /// Input coordinate for output position `o` and kernel offset `k`, or
    /// `None` when it lands in the padding.
    #[inline]
    fn source(&self, o: usize, k: usize, extent: usize) -> Option<usize> {
        (o * self.stride + k)
            .checked_sub(self.pad)
            .filter(|&i| i < extent)
    }
}

/// Unroll one sample into its column matrix (`C·k·k` × `H_out·W_out`).
pub fn im2col<T: Float>(sample: &[T], input: Dims, window: &Window, output: Dims) -> Vec<T> {
    let k = window.kernel;
    let (h, w) = (input.height, input.width);
    let n_cols = output.height * output.width;
    let mut cols = vec![T::ZERO; input.channels * k * k * n_cols];

    for c in 0..input.channels {
        let plane = &sample[c * h * w..(c + 1) * h * w];
        for ky in 0..k {
            for kx in 0..k {
                let row = (c * k + ky) * k + kx;
                let dst = &mut cols[row * n_cols..(row + 1) * n_cols];
                for oy in 0..output.height {
                    let Some(iy) = window.source(oy, ky, h) else {
                        continue;
                    };
                    for ox in 0..output.width {
                        if let Some(ix) = window.source(ox, kx, w) {
                            dst[oy * output.width + ox] = plane[iy * w + ix];
                        }
                    }
                }
            }
        }
    }
    cols
}

/// Scatter-add a column matrix back onto a zeroed `H×W×C` sample.
pub fn col2im<T: Float>(cols: &[T], input: Dims, window: &Window, output: Dims) -> Vec<T> {
    let k = window.kernel;
    let (h, w) = (input.height, input.width);
    let n_cols = output.height * output.width;
    let mut sample = vec![T::ZERO; input.numel()];

    for c in 0..input.channels {
        let plane = &mut sample[c * h * w..(c + 1) * h * w];
        for ky in 0..k {
            for kx in 0..k {
                let row = (c * k + ky) * k + kx;
                let src = &cols[row * n_cols..(row + 1) * n_cols];
                for oy in 0..output.height {
                    let Some(iy) = window.source(oy, ky, h) else {
                        continue;
                    };
                    for ox in 0..output.width {
                        if let Some(ix) = window.source(ox, kx, w) {
                            plane[iy * w + ix] += src[oy * output.width + ox];
                        }
                    }
                }
            }
        }
    }
    sample
}
