use super::Layer;
use crate::error::{NetError, NetResult};
use crate::param::{ParamRefs, ParamRefsMut, Parameter};
use crate::record::{Dims, GradRecord, TensorRecord};
use lenet_core::{Float, Tensor};
use rand::rngs::StdRng;
use std::str::FromStr;

/// Weight initialization scheme, scaled by `sqrt(1 / fan_in)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitKind {
    /// Zero-mean normal times the scale.
    Gaussian,
    /// Uniform on `[-scale, scale]`.
    Uniform,
}

impl FromStr for InitKind {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian" => Ok(InitKind::Gaussian),
            "uniform" => Ok(InitKind::Uniform),
            other => Err(NetError::Configuration(format!(
                "init type '{}' not found (expected 'gaussian' or 'uniform')",
                other
            ))),
        }
    }
}

impl InitKind {
    /// Draw a weight tensor for a unit with `fan_in` inputs.
    pub fn sample<T: Float>(&self, shape: Vec<usize>, fan_in: usize, rng: &mut StdRng) -> Tensor<T> {
        let scale = T::from_f64((1.0 / fan_in as f64).sqrt());
        match self {
            InitKind::Gaussian => Tensor::randn(shape, scale, rng),
            InitKind::Uniform => Tensor::rand_uniform(shape, -scale, scale, rng),
        }
    }
}

/// Fully connected layer: `y = x·W + b` with `W: [n_in, n_out]`, `b: [n_out]`.
///
/// Parameter gradients are averaged over the batch.
#[derive(Debug, Clone)]
pub struct DenseLayer<T: Float> {
    n_out: usize,
    init_kind: InitKind,
    weight: Parameter<T>,
    bias: Parameter<T>,
    cache: Option<Tensor<T>>,
}

impl<T: Float> DenseLayer<T> {
    /// `init_type` is `"gaussian"` or `"uniform"`.
    pub fn new(n_out: usize, init_type: &str) -> NetResult<Self> {
        Self::with_init(n_out, init_type.parse()?)
    }

    pub fn with_init(n_out: usize, init_kind: InitKind) -> NetResult<Self> {
        if n_out == 0 {
            return Err(NetError::Configuration(
                "dense layer needs n_out > 0".to_string(),
            ));
        }
        Ok(DenseLayer {
            n_out,
            init_kind,
            weight: Parameter::uninit(),
            bias: Parameter::uninit(),
            cache: None,
        })
    }

    pub fn n_out(&self) -> usize {
        self.n_out
    }

    pub fn weight(&self) -> &Parameter<T> {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter<T> {
        &self.bias
    }

    /// Allocate `W` for `n_in` input features; `b` starts at zero.
    pub fn init_features(&mut self, n_in: usize, rng: &mut StdRng) {
        self.weight = Parameter::new(self.init_kind.sample(vec![n_in, self.n_out], n_in, rng));
        self.bias = Parameter::new(Tensor::zeros(vec![self.n_out]));
        self.cache = None;
    }

    fn n_in(&self) -> NetResult<usize> {
        match self.weight.value.shape().dims() {
            [n_in, _] => Ok(*n_in),
            _ => Err(NetError::Sequencing(
                "dense layer used before init".to_string(),
            )),
        }
    }
}

impl<T: Float> Layer<T> for DenseLayer<T> {
    fn kind(&self) -> &'static str {
        "dense"
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }

    fn output_dims(&self, _input: Dims) -> NetResult<Dims> {
        Ok(Dims::flat(self.n_out))
    }

    fn init(&mut self, input: Dims, rng: &mut StdRng) -> NetResult<()> {
        self.init_features(input.numel(), rng);
        Ok(())
    }

    fn forward(&mut self, input: &TensorRecord<T>) -> NetResult<TensorRecord<T>> {
        let n_in = self.n_in()?;
        let x = input.data();
        let (_, cols) = x.dims2()?;
        if cols != n_in {
            return Err(NetError::shape("dense input", vec![n_in], vec![cols]));
        }
        let out = x.matmul(&self.weight.value)?.add_row_vector(&self.bias.value)?;
        self.cache = Some(x.clone());
        TensorRecord::new(Dims::flat(self.n_out), out)
    }

    fn backward(&mut self, output_grad: &GradRecord<T>) -> NetResult<GradRecord<T>> {
        let x = self.cache.as_ref().ok_or_else(|| {
            NetError::Sequencing("dense backward called without a preceding forward".to_string())
        })?;
        let batch = x.shape().dims()[0];
        output_grad.expect_shape("dense upstream gradient", &[batch, self.n_out])?;
        let g = &output_grad.grad;
        let scale = T::from_usize(batch);

        let grad_input = g.matmul(&self.weight.value.t()?)?;
        let grad_w = x.t()?.matmul(g)?.div_scalar(scale);
        let grad_b = g.sum_axis(0)?.div_scalar(scale);

        self.weight.set_grad(grad_w)?;
        self.bias.set_grad(grad_b)?;
        self.cache = None;
        Ok(GradRecord::new(grad_input))
    }

    fn params(&self) -> ParamRefs<'_, T> {
        vec![("w", &self.weight), ("b", &self.bias)]
    }

    fn params_mut(&mut self) -> ParamRefsMut<'_, T> {
        vec![("w", &mut self.weight), ("b", &mut self.bias)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn fixed_layer() -> DenseLayer<f64> {
        let mut layer = DenseLayer::new(2, "uniform").unwrap();
        layer.init_features(3, &mut StdRng::seed_from_u64(0));
        layer.weight.value =
            Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, -1.0], vec![3, 2]).unwrap();
        layer.bias.value = Tensor::from_slice(&[0.5, -0.5]);
        layer
    }

    fn record(rows: &[Vec<f64>]) -> TensorRecord<f64> {
        let data = Tensor::from_vec2d(rows).unwrap();
        let n = data.dims2().unwrap().1;
        TensorRecord::new(Dims::flat(n), data).unwrap()
    }

    #[test]
    fn test_forward_affine() {
        let mut layer = fixed_layer();
        let out = layer.forward(&record(&[vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 0.0]])).unwrap();
        assert_eq!(out.dims(), Dims::flat(2));
        assert_eq!(out.data().data(), &[4.5, -1.5, 0.5, -0.5]);
    }

    #[test]
    fn test_backward_averages_over_batch() {
        let mut layer = fixed_layer();
        layer.forward(&record(&[vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]])).unwrap();
        let g = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]).unwrap();
        let gi = layer.backward(&GradRecord::new(g)).unwrap();

        // g · Wᵗ
        assert_eq!(gi.grad.data(), &[1.0, 0.0, 1.0, 0.0, 1.0, -1.0]);
        // xᵗ · g / 2
        let gw = layer.weight.grad.as_ref().unwrap();
        assert_eq!(gw.data(), &[0.5, 1.5, 1.0, 1.0, 1.5, 0.5]);
        let gb = layer.bias.grad.as_ref().unwrap();
        assert_abs_diff_eq!(gb.data()[0], 0.5);
        assert_abs_diff_eq!(gb.data()[1], 0.5);
    }

    #[test]
    fn test_init_shapes_and_scale() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = DenseLayer::<f32>::new(10, "uniform").unwrap();
        layer.init(Dims::new(4, 4, 50), &mut rng).unwrap();
        assert_eq!(layer.weight.shape(), vec![800, 10]);
        assert_eq!(layer.bias.shape(), vec![10]);
        let scale = (1.0f32 / 800.0).sqrt();
        assert!(layer.weight.value.data().iter().all(|v| v.abs() <= scale));
        assert!(layer.bias.value.data().iter().all(|&v| v == 0.0));

        let mut g = DenseLayer::<f64>::new(5, "gaussian").unwrap();
        g.init_features(20, &mut rng);
        assert_eq!(g.weight.shape(), vec![20, 5]);
    }

    #[test]
    fn test_unknown_init_kind() {
        assert!(matches!(
            DenseLayer::<f64>::new(10, "xavier"),
            Err(NetError::Configuration(_))
        ));
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut layer = fixed_layer();
        let g = GradRecord::new(Tensor::zeros(vec![1, 2]));
        assert!(matches!(layer.backward(&g), Err(NetError::Sequencing(_))));

        layer.forward(&record(&[vec![1.0, 2.0, 3.0]])).unwrap();
        layer.backward(&g).unwrap();
        // The cache covers exactly one forward/backward cycle.
        assert!(matches!(layer.backward(&g), Err(NetError::Sequencing(_))));
    }

    #[test]
    fn test_forward_rejects_wrong_width() {
        let mut layer = fixed_layer();
        assert!(matches!(
            layer.forward(&record(&[vec![1.0, 2.0]])),
            Err(NetError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_gradient_check() {
        let mut layer = DenseLayer::<f64>::new(4, "gaussian").unwrap();
        layer.init_features(6, &mut StdRng::seed_from_u64(11));
        layer.bias.value = Tensor::from_slice(&[0.1, -0.2, 0.3, 0.0]);
        let input = gradcheck::random_record(Dims::flat(6), 3, 5);
        gradcheck::check_layer(&mut layer, &input);
    }
}
