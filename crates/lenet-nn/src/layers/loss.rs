use crate::error::{NetError, NetResult};
use crate::record::{Dims, LossRecord, TensorRecord};
use lenet_core::{Float, Tensor};

/// Terminal softmax cross-entropy layer.
///
/// Produces the mean negative log-likelihood of the true classes, the batch
/// accuracy, and `(softmax(logits) − one_hot(labels)) / batch` as the gradient
/// that starts backpropagation.
#[derive(Debug, Clone)]
pub struct LossLayer {
    n_classes: usize,
}

impl LossLayer {
    pub fn new(n_classes: usize) -> NetResult<Self> {
        if n_classes == 0 {
            return Err(NetError::Configuration(
                "loss layer needs n_classes > 0".to_string(),
            ));
        }
        Ok(LossLayer { n_classes })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// The incoming record must be exactly one logit per class.
    pub fn init(&self, input: Dims) -> NetResult<()> {
        if input.numel() != self.n_classes {
            return Err(NetError::Configuration(format!(
                "loss layer declares {} classes but receives {} features ({})",
                self.n_classes,
                input.numel(),
                input
            )));
        }
        Ok(())
    }

    /// One label per sample, each below `n_classes`, for a non-empty batch.
    pub fn check_labels(&self, batch: usize, labels: &[usize]) -> NetResult<()> {
        if batch == 0 {
            return Err(NetError::shape("loss batch", vec![1], vec![0]));
        }
        if labels.len() != batch {
            return Err(NetError::shape("labels", vec![batch], vec![labels.len()]));
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= self.n_classes) {
            return Err(NetError::InvalidLabel {
                label,
                n_classes: self.n_classes,
            });
        }
        Ok(())
    }

    /// Score `input` logits against `labels`.
    ///
    /// Only the training form is supported: `return_grad = false` is a
    /// sequencing error, since the network always needs the gradient.
    pub fn forward<T: Float>(
        &self,
        input: &TensorRecord<T>,
        labels: &[usize],
        return_grad: bool,
    ) -> NetResult<LossRecord<T>> {
        if !return_grad {
            return Err(NetError::Sequencing(
                "loss layer forward requires return_grad".to_string(),
            ));
        }
        let logits = input.data();
        let (batch, cols) = logits.dims2()?;
        if cols != self.n_classes {
            return Err(NetError::shape("loss logits", vec![self.n_classes], vec![cols]));
        }
        self.check_labels(batch, labels)?;

        let scale = T::from_usize(batch);
        let mut grad = Vec::with_capacity(batch * cols);
        let mut total = T::ZERO;
        for (row, &label) in logits.data().chunks(cols).zip(labels) {
            let max = row.iter().copied().fold(T::NEG_INFINITY, T::max);
            let log_norm = max + row.iter().map(|&v| (v - max).exp()).sum::<T>().ln();
            total += log_norm - row[label];
            for (j, &v) in row.iter().enumerate() {
                let p = (v - log_norm).exp();
                let target = if j == label { T::ONE } else { T::ZERO };
                grad.push((p - target) / scale);
            }
        }

        let hits = logits
            .argmax_rows()?
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count();

        Ok(LossRecord {
            loss: total / scale,
            accuracy: T::from_usize(hits) / scale,
            grad: Tensor::new(grad, vec![batch, cols])?,
        })
    }
}
