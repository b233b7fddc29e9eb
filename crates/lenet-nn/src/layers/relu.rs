use super::Layer;
use crate::error::{NetError, NetResult};
use crate::record::{Dims, GradRecord, TensorRecord};
use lenet_core::{Float, Tensor};
use rand::rngs::StdRng;

/// Rectified linear activation, `max(0, x)`.
///
/// The derivative at exactly zero is taken as 0: gradient flows only where the
/// cached pre-activation was strictly positive.
#[derive(Debug, Clone, Default)]
pub struct ReluLayer<T: Float> {
    cache: Option<Tensor<T>>,
}

impl<T: Float> ReluLayer<T> {
    pub fn new() -> Self {
        ReluLayer { cache: None }
    }
}

impl<T: Float> Layer<T> for ReluLayer<T> {
    fn kind(&self) -> &'static str {
        "relu"
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }

    fn output_dims(&self, input: Dims) -> NetResult<Dims> {
        Ok(input)
    }

    fn init(&mut self, _input: Dims, _rng: &mut StdRng) -> NetResult<()> {
        self.cache = None;
        Ok(())
    }

    fn forward(&mut self, input: &TensorRecord<T>) -> NetResult<TensorRecord<T>> {
        let out = input
            .data()
            .apply(|x| if x > T::ZERO { x } else { T::ZERO });
        self.cache = Some(input.data().clone());
        input.with_data(out)
    }

    fn backward(&mut self, output_grad: &GradRecord<T>) -> NetResult<GradRecord<T>> {
        let x = self.cache.as_ref().ok_or_else(|| {
            NetError::Sequencing("relu backward called without a preceding forward".to_string())
        })?;
        output_grad.expect_shape("relu upstream gradient", x.shape().dims())?;
        let data = output_grad
            .grad
            .data()
            .iter()
            .zip(x.data())
            .map(|(&g, &x)| if x > T::ZERO { g } else { T::ZERO })
            .collect();
        let grad = Tensor::new(data, x.shape_vec())?;
        self.cache = None;
        Ok(GradRecord::new(grad))
    }
}
