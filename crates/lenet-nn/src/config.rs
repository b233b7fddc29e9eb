//! Declarative network description, parsed from JSON.
//!
//! ```json
//! { "seed": 7,
//!   "layers": [
//!     { "type": "data", "height": 28, "width": 28, "channel": 1 },
//!     { "type": "conv", "n_out_channels": 20, "kernel_size": 5, "stride": 1, "pad": 0 },
//!     { "type": "relu" },
//!     { "type": "pool", "act_type": "max", "kernel_size": 2, "stride": 2, "pad": 0 },
//!     { "type": "dense", "n_out": 10, "init_type": "uniform" },
//!     { "type": "loss", "n_classes": 10 } ] }
//! ```

use crate::error::{NetError, NetResult};
use crate::layers::{ConvLayer, DataLayer, DenseLayer, Layer, LossLayer, PoolLayer, ReluLayer};
use lenet_core::Float;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_init_type() -> String {
    "uniform".to_string()
}

/// One entry of a network description, discriminated by `type`.
///
/// Keys a variant does not use are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerConfig {
    Data {
        height: usize,
        width: usize,
        channel: usize,
    },
    Conv {
        n_out_channels: usize,
        kernel_size: usize,
        stride: usize,
        pad: usize,
        #[serde(default = "default_init_type")]
        init_type: String,
    },
    Pool {
        act_type: String,
        kernel_size: usize,
        stride: usize,
        pad: usize,
    },
    Dense {
        n_out: usize,
        init_type: String,
    },
    Relu,
    Loss {
        n_classes: usize,
    },
}

impl LayerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerConfig::Data { .. } => "data",
            LayerConfig::Conv { .. } => "conv",
            LayerConfig::Pool { .. } => "pool",
            LayerConfig::Dense { .. } => "dense",
            LayerConfig::Relu => "relu",
            LayerConfig::Loss { .. } => "loss",
        }
    }

    pub(crate) fn build_data(&self) -> NetResult<DataLayer> {
        match self {
            LayerConfig::Data {
                height,
                width,
                channel,
            } => DataLayer::new(*height, *width, *channel),
            other => Err(NetError::Configuration(format!(
                "first layer must be 'data', found '{}'",
                other.kind()
            ))),
        }
    }

    pub(crate) fn build_loss(&self) -> NetResult<LossLayer> {
        match self {
            LayerConfig::Loss { n_classes } => LossLayer::new(*n_classes),
            other => Err(NetError::Configuration(format!(
                "last layer must be 'loss', found '{}'",
                other.kind()
            ))),
        }
    }

    pub(crate) fn build_hidden<T: Float>(&self, index: usize) -> NetResult<Box<dyn Layer<T>>> {
        let layer: Box<dyn Layer<T>> = match self {
            LayerConfig::Conv {
                n_out_channels,
                kernel_size,
                stride,
                pad,
                init_type,
            } => Box::new(ConvLayer::<T>::new(
                *n_out_channels,
                *kernel_size,
                *stride,
                *pad,
                init_type,
            )?),
            LayerConfig::Pool {
                act_type,
                kernel_size,
                stride,
                pad,
            } => Box::new(PoolLayer::<T>::new(act_type, *kernel_size, *stride, *pad)?),
            LayerConfig::Dense { n_out, init_type } => {
                Box::new(DenseLayer::<T>::new(*n_out, init_type)?)
            }
            LayerConfig::Relu => Box::new(ReluLayer::<T>::new()),
            LayerConfig::Data { .. } | LayerConfig::Loss { .. } => {
                return Err(NetError::Configuration(format!(
                    "'{}' layer is only allowed at the {} of the network, found at index {}",
                    self.kind(),
                    if self.kind() == "data" { "start" } else { "end" },
                    index
                )))
            }
        };
        Ok(layer)
    }
}

/// Ordered layer list plus an optional initialization seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub layers: Vec<LayerConfig>,
    /// Fixed seed for parameter initialization; entropy-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl NetworkConfig {
    pub fn new(layers: Vec<LayerConfig>) -> Self {
        NetworkConfig { layers, seed: None }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Unknown layer types and malformed fields are configuration errors.
    pub fn from_json_str(s: &str) -> NetResult<Self> {
        serde_json::from_str(s)
            .map_err(|e| NetError::Configuration(format!("invalid network config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            NetError::Configuration(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> NetResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| NetError::Configuration(format!("cannot encode network config: {}", e)))
    }

    /// LeNet for 28×28 grayscale digits with 10 classes.
    pub fn lenet() -> Self {
        let conv = |n_out_channels| LayerConfig::Conv {
            n_out_channels,
            kernel_size: 5,
            stride: 1,
            pad: 0,
            init_type: default_init_type(),
        };
        let pool = || LayerConfig::Pool {
            act_type: "max".to_string(),
            kernel_size: 2,
            stride: 2,
            pad: 0,
        };
        let dense = |n_out| LayerConfig::Dense {
            n_out,
            init_type: "uniform".to_string(),
        };
        NetworkConfig::new(vec![
            LayerConfig::Data {
                height: 28,
                width: 28,
                channel: 1,
            },
            conv(20),
            LayerConfig::Relu,
            pool(),
            conv(50),
            LayerConfig::Relu,
            pool(),
            dense(500),
            LayerConfig::Relu,
            dense(10),
            LayerConfig::Loss { n_classes: 10 },
        ])
    }
}
