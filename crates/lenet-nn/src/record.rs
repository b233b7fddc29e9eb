use crate::error::{NetError, NetResult};
use lenet_core::{Float, Tensor};
use std::fmt;

/// Spatial shape of one sample: height × width × channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Dims {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Dims {
            height,
            width,
            channels,
        }
    }

    /// A flat feature vector of `n` entries.
    pub fn flat(n: usize) -> Self {
        Dims::new(1, 1, n)
    }

    /// Features per sample.
    pub fn numel(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn to_vec(&self) -> Vec<usize> {
        vec![self.height, self.width, self.channels]
    }

    pub(crate) fn ensure_positive(&self, context: &str) -> NetResult<()> {
        if self.height == 0 || self.width == 0 || self.channels == 0 {
            return Err(NetError::Configuration(format!(
                "{} produced an empty shape {}",
                context, self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Forward message between layers.
///
/// `data` is `[batch, height·width·channels]`; each row is one sample laid out
/// channel-major (`c·H·W + y·W + x`). The constructor enforces that the row
/// width matches the record's own triple.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRecord<T: Float> {
    dims: Dims,
    data: Tensor<T>,
}

impl<T: Float> TensorRecord<T> {
    pub fn new(dims: Dims, data: Tensor<T>) -> NetResult<Self> {
        let (_, cols) = data.dims2()?;
        if cols != dims.numel() {
            return Err(NetError::shape(
                format!("record data for {}", dims),
                vec![dims.numel()],
                vec![cols],
            ));
        }
        Ok(TensorRecord { dims, data })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn height(&self) -> usize {
        self.dims.height
    }

    pub fn width(&self) -> usize {
        self.dims.width
    }

    pub fn channels(&self) -> usize {
        self.dims.channels
    }

    pub fn batch_size(&self) -> usize {
        self.data.shape().dims()[0]
    }

    pub fn data(&self) -> &Tensor<T> {
        &self.data
    }

    pub fn into_data(self) -> Tensor<T> {
        self.data
    }

    /// Same shape metadata, new buffer.
    pub fn with_data(&self, data: Tensor<T>) -> NetResult<Self> {
        TensorRecord::new(self.dims, data)
    }
}

/// Backward message: gradient with respect to a forward record's data.
///
/// Carries no spatial metadata; layers recover it from their cached forward
/// input.
#[derive(Debug, Clone, PartialEq)]
pub struct GradRecord<T: Float> {
    pub grad: Tensor<T>,
}

impl<T: Float> GradRecord<T> {
    pub fn new(grad: Tensor<T>) -> Self {
        GradRecord { grad }
    }

    /// Fail unless the gradient is shaped like `expected`.
    pub(crate) fn expect_shape(&self, context: &str, expected: &[usize]) -> NetResult<()> {
        if self.grad.shape().dims() != expected {
            return Err(NetError::shape(
                context,
                expected.to_vec(),
                self.grad.shape_vec(),
            ));
        }
        Ok(())
    }
}

/// Output of the terminal loss layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LossRecord<T: Float> {
    /// Mean negative log-likelihood of the true classes.
    pub loss: T,
    /// Fraction of the batch whose arg-max logit equals the label.
    pub accuracy: T,
    /// d(loss)/d(logits), already divided by the batch size.
    pub grad: Tensor<T>,
}

impl<T: Float> LossRecord<T> {
    pub fn grad_record(&self) -> GradRecord<T> {
        GradRecord::new(self.grad.clone())
    }
}
