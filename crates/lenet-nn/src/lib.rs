pub mod error;
pub mod param;
pub mod record;
pub mod im2col;
pub mod layers;
pub mod config;
pub mod network;

#[cfg(test)]
pub(crate) mod gradcheck;

pub use error::{NetError, NetResult};
pub use param::{ParamRefs, ParamRefsMut, Parameter};
pub use record::{Dims, GradRecord, LossRecord, TensorRecord};
pub use im2col::Window;
pub use layers::*;
pub use config::{LayerConfig, NetworkConfig};
pub use network::Network;
