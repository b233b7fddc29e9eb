use crate::scheduler::LrSchedule;
use lenet_core::{Float, Tensor};
use lenet_nn::{NetError, NetResult, Network, Parameter};
use tracing::{info, warn};

/// Gradient-descent update over a network's parameters.
///
/// An optimizer records the network's parameter layout (count and shapes,
/// in `Network::parameter_shapes` order) when it is built, and refuses to
/// step a network whose layout differs.
pub trait Optimizer<T: Float> {
    /// Apply one update from the current gradients.
    ///
    /// Every parameter must hold a gradient; nothing is modified unless all
    /// of them do.
    fn step(&mut self, net: &mut Network<T>) -> NetResult<()>;

    /// Clear every parameter's gradient.
    fn zero_grad(&mut self, net: &mut Network<T>) {
        for group in net.parameters_mut().values_mut() {
            for (_, param) in group.iter_mut() {
                param.clear_grad();
            }
        }
    }

    /// Recompute the learning rate for `iteration` and return it.
    fn update_lr(&mut self, iteration: usize) -> T;

    fn learning_rate(&self) -> T;
}

fn check_lr(lr: f64) -> NetResult<()> {
    if !(lr > 0.0 && lr.is_finite()) {
        return Err(NetError::Configuration(format!(
            "learning rate must be positive and finite, got {}",
            lr
        )));
    }
    Ok(())
}

/// Confirm `net` still has `layout` and that every gradient is present.
fn check_ready<T: Float>(net: &Network<T>, layout: &[Vec<usize>]) -> NetResult<()> {
    let shapes = net.parameter_shapes();
    if shapes.len() != layout.len() {
        return Err(NetError::ShapeMismatch {
            context: "optimizer parameter count".to_string(),
            expected: vec![layout.len()],
            got: vec![shapes.len()],
        });
    }
    for (i, (have, want)) in shapes.iter().zip(layout).enumerate() {
        if have != want {
            return Err(NetError::ShapeMismatch {
                context: format!("optimizer parameter {}", i),
                expected: want.clone(),
                got: have.clone(),
            });
        }
    }
    for (index, group) in net.parameters() {
        if let Some((name, _)) = group.iter().find(|(_, p)| p.grad.is_none()) {
            return Err(NetError::Sequencing(format!(
                "parameter '{}' of layer {} has no gradient; run backward before step",
                name, index
            )));
        }
    }
    Ok(())
}

/// Visit every parameter in layout order.
fn for_each_param<T: Float>(
    net: &mut Network<T>,
    mut f: impl FnMut(usize, &mut Parameter<T>) -> NetResult<()>,
) -> NetResult<()> {
    let mut slot = 0;
    for group in net.parameters_mut().values_mut() {
        for (_, param) in group.iter_mut() {
            f(slot, param)?;
            slot += 1;
        }
    }
    Ok(())
}

/// Plain stochastic gradient descent: `θ ← θ − lr·g`.
#[derive(Debug, Clone)]
pub struct Sgd<T: Float> {
    lr: T,
    layout: Vec<Vec<usize>>,
}

impl<T: Float> Sgd<T> {
    pub fn new(net: &Network<T>, lr: f64) -> NetResult<Self> {
        check_lr(lr)?;
        let layout = net.parameter_shapes();
        info!(lr, parameters = layout.len(), "sgd optimizer");
        Ok(Sgd {
            lr: T::from_f64(lr),
            layout,
        })
    }
}

impl<T: Float> Optimizer<T> for Sgd<T> {
    fn step(&mut self, net: &mut Network<T>) -> NetResult<()> {
        check_ready(net, &self.layout)?;
        let lr = self.lr;
        for_each_param(net, |_, param| {
            if let Some(grad) = &param.grad {
                param.value.scaled_add_assign(-lr, grad)?;
            }
            Ok(())
        })
    }

    /// The rate is fixed.
    fn update_lr(&mut self, _iteration: usize) -> T {
        self.lr
    }

    fn learning_rate(&self) -> T {
        self.lr
    }
}

/// SGD with classical momentum, L2 weight decay and a decaying rate.
///
/// ```text
/// lr_t = schedule(lr, t)
/// v    ← μ·v − lr_t·(g + λ·θ)
/// θ    ← θ + v
/// ```
///
/// Velocity slots start empty (zero) and are filled on first use.
#[derive(Debug, Clone)]
pub struct SgdMomentum<T: Float> {
    base_lr: f64,
    lr: T,
    momentum: T,
    weight_decay: T,
    schedule: LrSchedule,
    layout: Vec<Vec<usize>>,
    velocity: Vec<Option<Tensor<T>>>,
}

impl<T: Float> SgdMomentum<T> {
    pub fn new(
        net: &Network<T>,
        lr: f64,
        momentum: f64,
        weight_decay: f64,
        schedule: LrSchedule,
    ) -> NetResult<Self> {
        check_lr(lr)?;
        if !(0.0..1.0).contains(&momentum) {
            return Err(NetError::Configuration(format!(
                "momentum must be in [0, 1), got {}",
                momentum
            )));
        }
        if !(weight_decay >= 0.0 && weight_decay.is_finite()) {
            return Err(NetError::Configuration(format!(
                "weight_decay must be non-negative, got {}",
                weight_decay
            )));
        }
        schedule.validate().map_err(NetError::Configuration)?;

        let layout = net.parameter_shapes();
        info!(
            lr,
            momentum,
            weight_decay,
            schedule = ?schedule,
            parameters = layout.len(),
            "momentum optimizer"
        );
        Ok(SgdMomentum {
            base_lr: lr,
            lr: T::from_f64(lr),
            momentum: T::from_f64(momentum),
            weight_decay: T::from_f64(weight_decay),
            schedule,
            velocity: vec![None; layout.len()],
            layout,
        })
    }

    pub fn momentum(&self) -> T {
        self.momentum
    }

    pub fn weight_decay(&self) -> T {
        self.weight_decay
    }

    pub fn schedule(&self) -> LrSchedule {
        self.schedule
    }

    /// Velocity of parameter `slot`, once it has been stepped.
    pub fn velocity(&self, slot: usize) -> Option<&Tensor<T>> {
        self.velocity.get(slot).and_then(Option::as_ref)
    }
}

impl<T: Float> Optimizer<T> for SgdMomentum<T> {
    fn step(&mut self, net: &mut Network<T>) -> NetResult<()> {
        check_ready(net, &self.layout)?;
        let (lr, mu, decay) = (self.lr, self.momentum, self.weight_decay);
        let velocity = &mut self.velocity;
        for_each_param(net, |slot, param| {
            let Some(grad) = &param.grad else {
                return Ok(());
            };
            let mut direction = grad.clone();
            if decay != T::ZERO {
                direction.scaled_add_assign(decay, &param.value)?;
            }
            let v = match velocity[slot].take() {
                Some(prev) => {
                    let mut v = prev.mul_scalar(mu);
                    v.scaled_add_assign(-lr, &direction)?;
                    v
                }
                None => direction.mul_scalar(-lr),
            };
            param.value.scaled_add_assign(T::ONE, &v)?;
            velocity[slot] = Some(v);
            Ok(())
        })
    }

    fn update_lr(&mut self, iteration: usize) -> T {
        let rate = self.schedule.rate(self.base_lr, iteration);
        if rate.is_finite() {
            self.lr = T::from_f64(rate);
        } else {
            warn!(
                iteration,
                rate,
                "schedule produced a non-finite learning rate, keeping {}",
                self.lr
            );
        }
        self.lr
    }

    fn learning_rate(&self) -> T {
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use lenet_nn::{LayerConfig, NetworkConfig};

    /// data 1x1x1 -> dense(1) -> loss(1): one scalar weight and one bias.
    fn scalar_net() -> Network<f64> {
        let config = NetworkConfig::new(vec![
            LayerConfig::Data {
                height: 1,
                width: 1,
                channel: 1,
            },
            LayerConfig::Dense {
                n_out: 1,
                init_type: "uniform".to_string(),
            },
            LayerConfig::Loss { n_classes: 1 },
        ])
        .with_seed(0);
        Network::new(&config).unwrap()
    }

    fn set(net: &mut Network<f64>, w: f64, gw: f64, gb: f64) {
        let mut params = net.parameters_mut();
        let group = params.get_mut(&1).unwrap();
        group[0].1.value = Tensor::new(vec![w], vec![1, 1]).unwrap();
        group[0].1.set_grad(Tensor::new(vec![gw], vec![1, 1]).unwrap()).unwrap();
        group[1].1.value = Tensor::from_slice(&[0.0]);
        group[1].1.set_grad(Tensor::from_slice(&[gb])).unwrap();
    }

    fn weight(net: &Network<f64>) -> f64 {
        net.parameters()[&1][0].1.value.data()[0]
    }

    #[test]
    fn test_sgd_step() {
        let mut net = scalar_net();
        let mut opt = Sgd::new(&net, 0.1).unwrap();
        set(&mut net, 1.0, 2.0, -1.0);
        opt.step(&mut net).unwrap();
        assert_abs_diff_eq!(weight(&net), 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(net.parameters()[&1][1].1.value.data()[0], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(opt.update_lr(1000), 0.1);
    }

    #[test]
    fn test_zero_grad_clears_everything() {
        let mut net = scalar_net();
        let mut opt = Sgd::new(&net, 0.1).unwrap();
        set(&mut net, 1.0, 2.0, 1.0);
        opt.zero_grad(&mut net);
        for group in net.parameters().values() {
            assert!(group.iter().all(|(_, p)| p.grad.is_none()));
        }
    }

    #[test]
    fn test_step_without_gradient_is_atomic() {
        let mut net = scalar_net();
        let mut opt = Sgd::new(&net, 0.1).unwrap();
        set(&mut net, 1.0, 2.0, 1.0);
        net.parameters_mut().get_mut(&1).unwrap()[1].1.clear_grad();
        assert!(matches!(opt.step(&mut net), Err(NetError::Sequencing(_))));
        assert_abs_diff_eq!(weight(&net), 1.0);
    }

    #[test]
    fn test_step_rejects_other_layout() {
        let net = scalar_net();
        let mut opt = Sgd::new(&net, 0.1).unwrap();
        let mut other = Network::<f64>::new(&NetworkConfig::lenet().with_seed(0)).unwrap();
        assert!(matches!(opt.step(&mut other), Err(NetError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        let net = scalar_net();
        assert!(matches!(Sgd::new(&net, 0.0), Err(NetError::Configuration(_))));
        assert!(matches!(Sgd::new(&net, f64::NAN), Err(NetError::Configuration(_))));
        assert!(matches!(
            SgdMomentum::new(&net, 0.1, 1.0, 0.0, LrSchedule::Constant),
            Err(NetError::Configuration(_))
        ));
        assert!(matches!(
            SgdMomentum::new(&net, 0.1, 0.9, -0.1, LrSchedule::Constant),
            Err(NetError::Configuration(_))
        ));
        assert!(matches!(
            SgdMomentum::new(
                &net,
                0.1,
                0.9,
                0.0,
                LrSchedule::Step {
                    step_size: 0,
                    gamma: 0.1
                }
            ),
            Err(NetError::Configuration(_))
        ));
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let mut net = scalar_net();
        let mut opt = SgdMomentum::new(&net, 0.1, 0.9, 0.0, LrSchedule::Constant).unwrap();
        assert!(opt.velocity(0).is_none());

        set(&mut net, 1.0, 2.0, 0.0);
        opt.step(&mut net).unwrap();
        assert_abs_diff_eq!(weight(&net), 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(opt.velocity(0).unwrap().data()[0], -0.2, epsilon = 1e-12);

        // v = 0.9·(−0.2) − 0.1·2 = −0.38
        set(&mut net, 0.8, 2.0, 0.0);
        opt.step(&mut net).unwrap();
        assert_abs_diff_eq!(weight(&net), 0.42, epsilon = 1e-12);
    }

    #[test]
    fn test_weight_decay() {
        let mut net = scalar_net();
        let mut opt = SgdMomentum::new(&net, 0.1, 0.0, 0.5, LrSchedule::Constant).unwrap();
        set(&mut net, 1.0, 2.0, 0.0);
        opt.step(&mut net).unwrap();
        // g + λθ = 2.5
        assert_abs_diff_eq!(weight(&net), 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_update_lr_follows_schedule() {
        let net = scalar_net();
        let schedule = LrSchedule::Inverse {
            gamma: 1e-4,
            power: 0.75,
        };
        let mut opt = SgdMomentum::new(&net, 0.01, 0.9, 5e-4, schedule).unwrap();
        assert_abs_diff_eq!(opt.update_lr(0), 0.01);
        let lr = opt.update_lr(10_000);
        assert_abs_diff_eq!(lr, 0.01 * 2.0f64.powf(-0.75), epsilon = 1e-12);
        assert_abs_diff_eq!(opt.learning_rate(), lr);
    }

    #[test]
    fn test_non_finite_rate_is_ignored() {
        let net = scalar_net();
        let schedule = LrSchedule::Exponential { gamma: 1e300 };
        let mut opt = SgdMomentum::new(&net, 0.1, 0.0, 0.0, schedule).unwrap();
        assert_abs_diff_eq!(opt.update_lr(0), 0.1);
        assert_abs_diff_eq!(opt.update_lr(3), 0.1);
    }
}
