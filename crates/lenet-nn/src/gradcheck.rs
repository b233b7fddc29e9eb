//! Finite-difference gradient checks shared by the layer tests.
//!
//! The scalar objective is `L = Σ out ⊙ w` for a fixed random weighting `w`, so
//! the upstream gradient handed to `backward` is `w` itself. Input
//! gradients are compared against `dL/dx` directly; parameter gradients are
//! batch-averaged by the layers, so they are compared against `dL/dθ / B`.

use crate::layers::Layer;
use crate::record::{Dims, GradRecord, TensorRecord};
use lenet_core::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

const EPS: f64 = 1e-6;
const REL_TOL: f64 = 1e-4;
const ABS_TOL: f64 = 1e-6;

pub fn random_record(dims: Dims, batch: usize, seed: u64) -> TensorRecord<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Tensor::rand_uniform(vec![batch, dims.numel()], -1.0, 1.0, &mut rng);
    TensorRecord::new(dims, data).unwrap()
}

fn objective<L: Layer<f64>>(layer: &mut L, input: &TensorRecord<f64>, weights: &Tensor<f64>) -> f64 {
    let out = layer.forward(input).unwrap();
    out.data().data().iter().zip(weights.data()).map(|(a, b)| a * b).sum()
}

fn assert_close(what: &str, analytic: f64, numeric: f64) {
    let diff = (analytic - numeric).abs();
    let denom = analytic.abs() + numeric.abs();
    assert!(
        diff < ABS_TOL || diff / denom < REL_TOL,
        "{}: analytic {} vs numeric {}",
        what,
        analytic,
        numeric
    );
}

/// Check every input and parameter gradient of `layer` at `input`.
pub fn check_layer<L: Layer<f64>>(layer: &mut L, input: &TensorRecord<f64>) {
    let batch = input.batch_size() as f64;
    let out = layer.forward(input).unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let weights = Tensor::rand_uniform(out.data().shape_vec(), -1.0, 1.0, &mut rng);

    let grad_input = layer.backward(&GradRecord::new(weights.clone())).unwrap().grad;
    assert_eq!(grad_input.shape(), input.data().shape());

    let analytic: Vec<Tensor<f64>> = layer
        .params()
        .iter()
        .map(|(name, p)| {
            p.grad
                .clone()
                .unwrap_or_else(|| panic!("parameter {} has no gradient", name))
        })
        .collect();

    for (i, grad) in analytic.iter().enumerate() {
        for j in 0..grad.numel() {
            layer.params_mut()[i].1.value.data_mut()[j] += EPS;
            let plus = objective(layer, input, &weights);
            layer.params_mut()[i].1.value.data_mut()[j] -= 2.0 * EPS;
            let minus = objective(layer, input, &weights);
            layer.params_mut()[i].1.value.data_mut()[j] += EPS;

            let numeric = (plus - minus) / (2.0 * EPS) / batch;
            let name = layer.params()[i].0;
            assert_close(&format!("param {}[{}]", name, j), grad.data()[j], numeric);
        }
    }

    for j in 0..input.data().numel() {
        let mut shifted = input.data().clone();
        shifted.data_mut()[j] += EPS;
        let plus = objective(layer, &input.with_data(shifted.clone()).unwrap(), &weights);
        shifted.data_mut()[j] -= 2.0 * EPS;
        let minus = objective(layer, &input.with_data(shifted).unwrap(), &weights);

        let numeric = (plus - minus) / (2.0 * EPS);
        assert_close(&format!("input[{}]", j), grad_input.data()[j], numeric);
    }
}
