use crate::optimizer::{Optimizer, Sgd, SgdMomentum};
use crate::scheduler::LrSchedule;
use lenet_core::Float;
use lenet_nn::{NetResult, Network};
use serde::{Deserialize, Serialize};

/// Optimizer choice and hyperparameters, discriminated by `kind`.
///
/// ```json
/// { "kind": "momentum", "lr": 0.01, "momentum": 0.9, "weight_decay": 0.0005,
///   "schedule": { "kind": "inverse", "gamma": 0.0001, "power": 0.75 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OptimizerConfig {
    Sgd {
        lr: f64,
    },
    Momentum {
        lr: f64,
        momentum: f64,
        #[serde(default)]
        weight_decay: f64,
        #[serde(default)]
        schedule: LrSchedule,
    },
}

impl OptimizerConfig {
    /// Build an optimizer bound to `net`'s current parameter layout.
    pub fn build<T: Float>(&self, net: &Network<T>) -> NetResult<Box<dyn Optimizer<T>>> {
        let opt: Box<dyn Optimizer<T>> = match *self {
            OptimizerConfig::Sgd { lr } => Box::new(Sgd::new(net, lr)?),
            OptimizerConfig::Momentum {
                lr,
                momentum,
                weight_decay,
                schedule,
            } => Box::new(SgdMomentum::new(net, lr, momentum, weight_decay, schedule)?),
        };
        Ok(opt)
    }
}
