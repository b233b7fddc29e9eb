use crate::config::NetworkConfig;
use crate::error::{NetError, NetResult};
use crate::layers::{DataLayer, Layer, LossLayer};
use crate::param::{ParamRefs, ParamRefsMut};
use crate::record::{Dims, LossRecord, TensorRecord};
use lenet_core::{Float, Tensor};
use lenet_io::ModelArchive;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, trace};

/// An ordered layer pipeline: a Data layer, hidden layers, a Loss layer.
///
/// Layer indices count the Data layer as 0 and the Loss layer as
/// `len() - 1`; parameter groups are keyed by these indices.
pub struct Network<T: Float> {
    data: DataLayer,
    hidden: Vec<Box<dyn Layer<T>>>,
    loss: LossLayer,
}

impl<T: Float> Network<T> {
    /// Build every layer from `config` and initialize the parameters.
    ///
    /// The first entry must be `data`, the last `loss`, and neither may appear
    /// anywhere else.
    pub fn new(config: &NetworkConfig) -> NetResult<Self> {
        let (first, rest) = config.layers.split_first().ok_or_else(|| {
            NetError::Configuration("network config has no layers".to_string())
        })?;
        let (last, middle) = rest.split_last().ok_or_else(|| {
            NetError::Configuration("network needs at least a data and a loss layer".to_string())
        })?;

        let data = first.build_data()?;
        let loss = last.build_loss()?;
        let hidden = middle
            .iter()
            .enumerate()
            .map(|(i, layer)| layer.build_hidden(i + 1))
            .collect::<NetResult<Vec<_>>>()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut net = Network { data, hidden, loss };
        net.initialize(&mut rng)?;
        Ok(net)
    }

    /// Thread the Data layer's shape through every layer, fixing parameter
    /// shapes. Runs once, from `new`.
    fn initialize(&mut self, rng: &mut StdRng) -> NetResult<()> {
        let mut dims = self.data.dims();
        debug!(index = 0, kind = "data", output = %dims, "initialize");
        for (i, layer) in self.hidden.iter_mut().enumerate() {
            layer.init(dims, rng)?;
            let output = layer.output_dims(dims)?;
            let shapes: Vec<Vec<usize>> = layer.params().iter().map(|(_, p)| p.shape()).collect();
            debug!(
                index = i + 1,
                kind = layer.kind(),
                input = %dims,
                output = %output,
                params = ?shapes,
                "initialize"
            );
            dims = output;
        }
        self.loss.init(dims)?;
        debug!(
            index = self.hidden.len() + 1,
            kind = "loss",
            n_classes = self.loss.n_classes(),
            "initialize"
        );
        Ok(())
    }

    /// Total layer count, Data and Loss included.
    pub fn len(&self) -> usize {
        self.hidden.len() + 2
    }

    /// Always false: a network holds at least its Data and Loss layers.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn input_dims(&self) -> Dims {
        self.data.dims()
    }

    pub fn n_classes(&self) -> usize {
        self.loss.n_classes()
    }

    pub fn layer_kinds(&self) -> Vec<&'static str> {
        std::iter::once("data")
            .chain(self.hidden.iter().map(|l| l.kind()))
            .chain(std::iter::once("loss"))
            .collect()
    }

    fn forward_hidden(&mut self, batch_x: &Tensor<T>) -> NetResult<TensorRecord<T>> {
        let mut record = self.data.forward(batch_x)?;
        for layer in self.hidden.iter_mut() {
            record = layer.forward(&record)?;
        }
        Ok(record)
    }

    fn clear_caches(&mut self) {
        for layer in self.hidden.iter_mut() {
            layer.clear_cache();
        }
    }

    /// Run the batch through every layer and score it against `batch_y`.
    ///
    /// `batch_x` is `[batch, H·W·C]` in channel-major sample layout. Labels
    /// are checked before any layer runs. A failed forward leaves no backward
    /// cache behind, so a `LossRecord` from an earlier pass cannot be
    /// backpropagated against it.
    pub fn forward(&mut self, batch_x: &Tensor<T>, batch_y: &[usize]) -> NetResult<LossRecord<T>> {
        let result = self.score(batch_x, batch_y);
        if result.is_err() {
            self.clear_caches();
        }
        result
    }

    fn score(&mut self, batch_x: &Tensor<T>, batch_y: &[usize]) -> NetResult<LossRecord<T>> {
        let (batch, _) = batch_x.dims2()?;
        self.loss.check_labels(batch, batch_y)?;
        let logits = self.forward_hidden(batch_x)?;
        let cost = self.loss.forward(&logits, batch_y, true)?;
        trace!(batch = batch_y.len(), loss = %cost.loss, "forward");
        Ok(cost)
    }

    /// Backpropagate `cost` through the hidden layers in reverse order,
    /// leaving each parameter holding its gradient. The Data and Loss layers
    /// take no part.
    pub fn backward(&mut self, cost: &LossRecord<T>) -> NetResult<()> {
        let mut grad = cost.grad_record();
        for layer in self.hidden.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        trace!(layers = self.hidden.len(), "backward");
        Ok(())
    }

    /// Arg-max class per sample; the Loss layer is skipped so no labels are
    /// needed. Inference leaves no backward cache: a `backward` after
    /// `predict` is a sequencing error until the next `forward`.
    pub fn predict(&mut self, batch_x: &Tensor<T>) -> NetResult<Vec<usize>> {
        let logits = self.forward_hidden(batch_x);
        self.clear_caches();
        Ok(logits?.data().argmax_rows()?)
    }

    /// Parameter groups of every hidden layer, keyed by layer index.
    /// Parameter-free layers map to an empty group.
    pub fn parameters(&self) -> BTreeMap<usize, ParamRefs<'_, T>> {
        self.hidden
            .iter()
            .enumerate()
            .map(|(i, layer)| (i + 1, layer.params()))
            .collect()
    }

    pub fn parameters_mut(&mut self) -> BTreeMap<usize, ParamRefsMut<'_, T>> {
        self.hidden
            .iter_mut()
            .enumerate()
            .map(|(i, layer)| (i + 1, layer.params_mut()))
            .collect()
    }

    /// Shapes of all parameters in layer order, then each layer's own order.
    pub fn parameter_shapes(&self) -> Vec<Vec<usize>> {
        self.parameters()
            .values()
            .flat_map(|group| group.iter().map(|(_, p)| p.shape()))
            .collect()
    }

    /// Persist every parameter value, in `parameter_shapes` order.
    pub fn save_model(&self, path: impl AsRef<Path>) -> NetResult<()> {
        let tensors: Vec<Tensor<T>> = self
            .parameters()
            .values()
            .flat_map(|group| group.iter().map(|(_, p)| p.value.clone()))
            .collect();
        let archive = ModelArchive::new(tensors);
        archive.save(path.as_ref())?;
        info!(path = %path.as_ref().display(), tensors = archive.len(), "saved model");
        Ok(())
    }

    /// Replace every parameter value from an archive written by `save_model`.
    ///
    /// The tensor count and every shape are checked first; on mismatch the
    /// network is left untouched.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> NetResult<()> {
        let archive = ModelArchive::<T>::load(path.as_ref())?;
        let count = archive.len();
        self.restore(archive.into_tensors())?;
        info!(path = %path.as_ref().display(), tensors = count, "loaded model");
        Ok(())
    }

    fn restore(&mut self, tensors: Vec<Tensor<T>>) -> NetResult<()> {
        let shapes = self.parameter_shapes();
        if shapes.len() != tensors.len() {
            return Err(NetError::shape(
                "model archive tensor count",
                vec![shapes.len()],
                vec![tensors.len()],
            ));
        }
        for (i, (shape, tensor)) in shapes.iter().zip(&tensors).enumerate() {
            if tensor.shape().dims() != shape.as_slice() {
                return Err(NetError::shape(
                    format!("model archive tensor {}", i),
                    shape.clone(),
                    tensor.shape_vec(),
                ));
            }
        }

        let mut incoming = tensors.into_iter();
        for group in self.parameters_mut().values_mut() {
            for (_, param) in group.iter_mut() {
                if let Some(value) = incoming.next() {
                    param.value = value;
                }
            }
        }
        Ok(())
    }
}
