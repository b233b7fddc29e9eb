pub mod optimizer;
pub mod scheduler;
pub mod config;

pub use optimizer::{Optimizer, Sgd, SgdMomentum};
pub use scheduler::LrSchedule;
pub use config::OptimizerConfig;
