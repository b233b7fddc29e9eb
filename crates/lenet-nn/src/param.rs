use crate::error::{NetError, NetResult};
use lenet_core::{Float, Tensor};

/// A learnable tensor and its gradient slot.
///
/// The value is written by the optimizer (and by `Network::load_model`), the
/// gradient only by the owning layer's backward pass. `grad` is `None` after
/// `zero_grad` and holds exactly the last backward pass's gradient otherwise;
/// gradients never accumulate across passes.
#[derive(Debug, Clone)]
pub struct Parameter<T: Float> {
    pub value: Tensor<T>,
    pub grad: Option<Tensor<T>>,
}

/// Borrowed view over a layer's parameters, in the layer's fixed order.
pub type ParamRefs<'a, T> = Vec<(&'static str, &'a Parameter<T>)>;

/// Mutable view over a layer's parameters, in the layer's fixed order.
pub type ParamRefsMut<'a, T> = Vec<(&'static str, &'a mut Parameter<T>)>;

impl<T: Float> Parameter<T> {
    /// Placeholder created at layer construction; shaped by `init`.
    pub fn uninit() -> Self {
        Parameter {
            value: Tensor::zeros(vec![0]),
            grad: None,
        }
    }

    pub fn new(value: Tensor<T>) -> Self {
        Parameter { value, grad: None }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.value.shape_vec()
    }

    /// Replace the gradient, which must have the value's shape.
    pub fn set_grad(&mut self, grad: Tensor<T>) -> NetResult<()> {
        if grad.shape() != self.value.shape() {
            return Err(NetError::shape(
                "parameter gradient",
                self.value.shape_vec(),
                grad.shape_vec(),
            ));
        }
        self.grad = Some(grad);
        Ok(())
    }

    pub fn clear_grad(&mut self) {
        self.grad = None;
    }
}
