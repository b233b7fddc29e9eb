use super::Layer;
use crate::error::{NetError, NetResult};
use crate::im2col::{col2im, im2col, Window};
use crate::record::{Dims, GradRecord, TensorRecord};
use lenet_core::{Float, Tensor};
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::str::FromStr;

/// Reduction applied over each pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
}

impl FromStr for PoolKind {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(PoolKind::Max),
            other => Err(NetError::Configuration(format!(
                "pool act_type '{}' not supported (expected 'max')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct PoolCache {
    input: Dims,
    output: Dims,
    /// Per sample, per output entry (`c·n_cols + col`): winning row offset
    /// inside the channel's `k·k` block.
    switches: Vec<Vec<usize>>,
}

/// Channel-wise max pooling over square windows.
///
/// Zero padding takes part in the max; gradient routed to a padded position
/// is dropped. Ties go to the first window position in row-major order.
#[derive(Debug, Clone)]
pub struct PoolLayer<T: Float> {
    kind: PoolKind,
    window: Window,
    cache: Option<PoolCache>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Float> PoolLayer<T> {
    /// `act_type` must be `"max"`.
    pub fn new(act_type: &str, kernel_size: usize, stride: usize, pad: usize) -> NetResult<Self> {
        Ok(PoolLayer {
            kind: act_type.parse()?,
            window: Window::new(kernel_size, stride, pad)?,
            cache: None,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn pool_kind(&self) -> PoolKind {
        self.kind
    }

    pub fn window(&self) -> Window {
        self.window
    }

    fn pool_sample(&self, sample: &[T], input: Dims, output: Dims) -> (Vec<T>, Vec<usize>) {
        let cols = im2col(sample, input, &self.window, output);
        let area = self.window.area();
        let n_cols = output.height * output.width;
        let mut out = Vec::with_capacity(input.channels * n_cols);
        let mut switches = Vec::with_capacity(input.channels * n_cols);

        for c in 0..input.channels {
            let block = &cols[c * area * n_cols..(c + 1) * area * n_cols];
            for col in 0..n_cols {
                let mut best = 0;
                let mut best_val = block[col];
                for r in 1..area {
                    let v = block[r * n_cols + col];
                    if v > best_val {
                        best = r;
                        best_val = v;
                    }
                }
                out.push(best_val);
                switches.push(best);
            }
        }
        (out, switches)
    }
}

impl<T: Float> Layer<T> for PoolLayer<T> {
    fn kind(&self) -> &'static str {
        "pool"
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }

    fn output_dims(&self, input: Dims) -> NetResult<Dims> {
        self.window.output_dims(input, input.channels)
    }

    fn init(&mut self, input: Dims, _rng: &mut StdRng) -> NetResult<()> {
        self.output_dims(input)?.ensure_positive("pool layer")?;
        self.cache = None;
        Ok(())
    }

    fn forward(&mut self, input: &TensorRecord<T>) -> NetResult<TensorRecord<T>> {
        let in_dims = input.dims();
        let out_dims = self.output_dims(in_dims)?;
        let batch = input.batch_size();

        let pooled: Vec<(Vec<T>, Vec<usize>)> = input
            .data()
            .data()
            .par_chunks(in_dims.numel())
            .map(|sample| self.pool_sample(sample, in_dims, out_dims))
            .collect();

        let mut data = Vec::with_capacity(batch * out_dims.numel());
        let mut switches = Vec::with_capacity(batch);
        for (out, sw) in pooled {
            data.extend(out);
            switches.push(sw);
        }

        self.cache = Some(PoolCache {
            input: in_dims,
            output: out_dims,
            switches,
        });
        TensorRecord::new(out_dims, Tensor::new(data, vec![batch, out_dims.numel()])?)
    }

    fn backward(&mut self, output_grad: &GradRecord<T>) -> NetResult<GradRecord<T>> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            NetError::Sequencing("pool backward called without a preceding forward".to_string())
        })?;
        let batch = cache.switches.len();
        output_grad.expect_shape("pool upstream gradient", &[batch, cache.output.numel()])?;

        let window = self.window;
        let area = window.area();
        let n_cols = cache.output.height * cache.output.width;
        let n_rows = cache.input.channels * area;

        let grads: Vec<Vec<T>> = output_grad
            .grad
            .data()
            .par_chunks(cache.output.numel())
            .zip(cache.switches.par_iter())
            .map(|(g, sw)| {
                let mut dcols = vec![T::ZERO; n_rows * n_cols];
                for (i, (&gv, &r)) in g.iter().zip(sw).enumerate() {
                    let (c, col) = (i / n_cols, i % n_cols);
                    dcols[(c * area + r) * n_cols + col] = gv;
                }
                col2im(&dcols, cache.input, &window, cache.output)
            })
            .collect();

        let grad = Tensor::new(grads.concat(), vec![batch, cache.input.numel()])?;
        self.cache = None;
        Ok(GradRecord::new(grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck;
    use rand::SeedableRng;

    fn record(dims: Dims, data: Vec<f64>) -> TensorRecord<f64> {
        let batch = data.len() / dims.numel();
        TensorRecord::new(dims, Tensor::new(data, vec![batch, dims.numel()]).unwrap()).unwrap()
    }

    #[test]
    fn test_max_and_routing() {
        let mut layer = PoolLayer::<f64>::new("max", 2, 2, 0).unwrap();
        let out = layer.forward(&record(Dims::new(2, 2, 1), vec![1.0, 3.0, 4.0, 2.0])).unwrap();
        assert_eq!(out.dims(), Dims::new(1, 1, 1));
        assert_eq!(out.data().data(), &[4.0]);

        let g = GradRecord::new(Tensor::new(vec![1.0], vec![1, 1]).unwrap());
        let gi = layer.backward(&g).unwrap();
        assert_eq!(gi.grad.data(), &[0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_tie_routes_to_first_max() {
        let mut layer = PoolLayer::<f64>::new("max", 2, 2, 0).unwrap();
        layer.forward(&record(Dims::new(2, 2, 1), vec![0.5, 7.0, 7.0, 7.0])).unwrap();
        let g = GradRecord::new(Tensor::new(vec![2.0], vec![1, 1]).unwrap());
        let gi = layer.backward(&g).unwrap();
        assert_eq!(gi.grad.data(), &[0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_channels_and_batch() {
        // 2 samples of 4x4x2, 2x2 stride 2 -> 2x2x2.
        let dims = Dims::new(4, 4, 2);
        let data: Vec<f64> = (0..2 * dims.numel()).map(|i| i as f64).collect();
        let mut layer = PoolLayer::<f64>::new("max", 2, 2, 0).unwrap();
        let out = layer.forward(&record(dims, data)).unwrap();
        assert_eq!(out.dims(), Dims::new(2, 2, 2));
        assert_eq!(
            out.data().data(),
            &[
                5.0, 7.0, 13.0, 15.0, 21.0, 23.0, 29.0, 31.0, // sample 0
                37.0, 39.0, 45.0, 47.0, 53.0, 55.0, 61.0, 63.0, // sample 1
            ]
        );
    }

    #[test]
    fn test_padding_joins_the_max() {
        let mut layer = PoolLayer::<f64>::new("max", 2, 2, 1).unwrap();
        let input = record(Dims::new(2, 2, 1), vec![-1.0, -2.0, -3.0, -4.0]);
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.dims(), Dims::new(2, 2, 1));
        // Every window covers padding, whose zero beats the negative inputs.
        assert_eq!(out.data().data(), &[0.0, 0.0, 0.0, 0.0]);
        let g = GradRecord::new(Tensor::new(vec![1.0; 4], vec![1, 4]).unwrap());
        let gi = layer.backward(&g).unwrap();
        assert_eq!(gi.grad.data(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_lenet_shapes() {
        let layer = PoolLayer::<f32>::new("max", 2, 2, 0).unwrap();
        assert_eq!(layer.output_dims(Dims::new(24, 24, 20)).unwrap(), Dims::new(12, 12, 20));
        assert_eq!(layer.output_dims(Dims::new(8, 8, 50)).unwrap(), Dims::new(4, 4, 50));
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            PoolLayer::<f64>::new("avg", 2, 2, 0),
            Err(NetError::Configuration(_))
        ));
        assert!(matches!(
            PoolLayer::<f64>::new("max", 2, 0, 0),
            Err(NetError::Configuration(_))
        ));
        let mut layer = PoolLayer::<f64>::new("max", 5, 1, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            layer.init(Dims::new(3, 3, 1), &mut rng),
            Err(NetError::Configuration(_))
        ));
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut layer = PoolLayer::<f64>::new("max", 2, 2, 0).unwrap();
        let g = GradRecord::new(Tensor::zeros(vec![1, 1]));
        assert!(matches!(layer.backward(&g), Err(NetError::Sequencing(_))));
    }

    #[test]
    fn test_gradient_check() {
        let mut layer = PoolLayer::<f64>::new("max", 2, 2, 0).unwrap();
        let input = gradcheck::random_record(Dims::new(4, 6, 2), 2, 8);
        gradcheck::check_layer(&mut layer, &input);

        let mut overlapping = PoolLayer::<f64>::new("max", 3, 2, 1).unwrap();
        let input = gradcheck::random_record(Dims::new(5, 5, 2), 2, 13);
        gradcheck::check_layer(&mut overlapping, &input);
    }
}
