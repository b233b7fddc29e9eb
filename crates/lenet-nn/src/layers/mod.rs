pub mod data;
pub mod conv;
pub mod pool;
pub mod dense;
pub mod relu;
pub mod loss;

pub use conv::ConvLayer;
pub use data::DataLayer;
pub use dense::{DenseLayer, InitKind};
pub use loss::LossLayer;
pub use pool::{PoolKind, PoolLayer};
pub use relu::ReluLayer;

use crate::error::NetResult;
use crate::param::{ParamRefs, ParamRefsMut};
use crate::record::{Dims, GradRecord, TensorRecord};
use lenet_core::Float;
use rand::rngs::StdRng;

/// A hidden layer: everything between the Data layer and the Loss layer.
///
/// Configuration is fixed at construction. `init` runs once, from
/// `Network::new`, and fixes every parameter's shape for the input dims the
/// network threads through. `forward` overwrites the layer's backward cache;
/// `backward` consumes it, so each forward answers exactly one backward.
pub trait Layer<T: Float>: Send + Sync {
    /// Short tag matching the configuration `type`.
    fn kind(&self) -> &'static str;

    /// Output dims this layer produces for `input`.
    fn output_dims(&self, input: Dims) -> NetResult<Dims>;

    /// Shape and initialize parameters for `input`.
    fn init(&mut self, input: Dims, rng: &mut StdRng) -> NetResult<()>;

    fn forward(&mut self, input: &TensorRecord<T>) -> NetResult<TensorRecord<T>>;

    /// Gradient w.r.t. this layer's input; populates parameter gradients.
    fn backward(&mut self, output_grad: &GradRecord<T>) -> NetResult<GradRecord<T>>;

    /// Drop the backward cache so the next `backward` is a sequencing error.
    fn clear_cache(&mut self);

    fn params(&self) -> ParamRefs<'_, T> {
        Vec::new()
    }

    fn params_mut(&mut self) -> ParamRefsMut<'_, T> {
        Vec::new()
    }
}
