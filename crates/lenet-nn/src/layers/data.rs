use crate::error::{NetError, NetResult};
use crate::record::{Dims, TensorRecord};
use lenet_core::{Float, Tensor};

/// Entry layer: declares the static input shape and wraps raw batches.
#[derive(Debug, Clone)]
pub struct DataLayer {
    dims: Dims,
}

impl DataLayer {
    pub fn new(height: usize, width: usize, channels: usize) -> NetResult<Self> {
        let dims = Dims::new(height, width, channels);
        dims.ensure_positive("data layer")?;
        Ok(DataLayer { dims })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Wrap `[batch, H·W·C]` raw samples into a record. The batch must hold
    /// at least one sample.
    pub fn forward<T: Float>(&self, batch_x: &Tensor<T>) -> NetResult<TensorRecord<T>> {
        let (batch, cols) = batch_x.dims2()?;
        if batch == 0 {
            return Err(NetError::shape(
                "input batch size",
                vec![1, self.dims.numel()],
                vec![0, cols],
            ));
        }
        if cols != self.dims.numel() {
            return Err(NetError::shape(
                format!("input batch for data layer {}", self.dims),
                vec![self.dims.numel()],
                vec![cols],
            ));
        }
        TensorRecord::new(self.dims, batch_x.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_batch() {
        let layer = DataLayer::new(2, 2, 1).unwrap();
        let x = Tensor::<f64>::new(vec![0.0, 0.1, 0.2, 0.3, 1.0, 0.9, 0.8, 0.7], vec![2, 4]).unwrap();
        let rec = layer.forward(&x).unwrap();
        assert_eq!(rec.dims(), Dims::new(2, 2, 1));
        assert_eq!(rec.data(), &x);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let layer = DataLayer::new(28, 28, 1).unwrap();
        let x = Tensor::<f32>::zeros(vec![3, 783]);
        assert!(matches!(layer.forward(&x), Err(NetError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_empty_batch() {
        let layer = DataLayer::new(2, 2, 1).unwrap();
        let x = Tensor::<f64>::zeros(vec![0, 4]);
        assert!(matches!(layer.forward(&x), Err(NetError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_empty_shape() {
        assert!(matches!(DataLayer::new(28, 0, 1), Err(NetError::Configuration(_))));
    }
}
