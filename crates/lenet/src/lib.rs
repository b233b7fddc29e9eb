//! # lenet
//!
//! A layer-based convolutional network engine with hand-written forward and
//! backward passes.
//!
//! ## Modules
//!
//! - **core**: `Float` precision trait, `Shape`, dense row-major `Tensor`
//! - **io**: model archives, the flat, ordered list of parameter tensors
//! - **nn**: Data/Conv/Pool/Dense/ReLU/Loss layers, im2col, `Network`
//! - **optim**: SGD, SGD with momentum, learning-rate schedules
//! - **train**: One-call training step and epoch driver
//!
//! ```no_run
//! use lenet::prelude::*;
//!
//! let mut net = Network::<f32>::new(&NetworkConfig::lenet()).unwrap();
//! let mut opt = Sgd::new(&net, 0.1).unwrap();
//! let x = Tensor::<f32>::zeros(vec![4, 784]);
//! let report = train_step(&mut net, &mut opt, &x, &[0, 1, 2, 3]).unwrap();
//! println!("loss {} accuracy {}", report.loss, report.accuracy);
//! ```

/// Core tensor engine.
pub use lenet_core as core;

/// Model persistence.
pub use lenet_io as io;

/// Layers and the network container.
pub use lenet_nn as nn;

/// Optimizers.
pub use lenet_optim as optim;

pub mod train;

pub use train::{run_epoch, train_step, EpochReport, StepReport};

/// The types most programs need.
pub mod prelude {
    pub use crate::train::{run_epoch, train_step, EpochReport, StepReport};
    pub use lenet_core::{Float, Tensor};
    pub use lenet_nn::{LayerConfig, NetError, NetResult, Network, NetworkConfig};
    pub use lenet_optim::{LrSchedule, Optimizer, OptimizerConfig, Sgd, SgdMomentum};
}
