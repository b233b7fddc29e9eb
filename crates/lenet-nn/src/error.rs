use lenet_core::TensorError;
use lenet_io::ArchiveError;
use thiserror::Error;

/// Errors raised while building, running or persisting a network.
///
/// None of these are recoverable at the point of detection; a pass that
/// fails leaves no partial result behind.
#[derive(Debug, Error)]
pub enum NetError {
    /// Unknown layer type, unknown init kind, or an impossible layer stack.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// An operation was called out of order, e.g. backward before forward.
    #[error("sequencing error: {0}")]
    Sequencing(String),

    #[error("label {label} is out of range for {n_classes} classes")]
    InvalidLabel { label: usize, n_classes: usize },

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

pub type NetResult<T> = Result<T, NetError>;

impl NetError {
    pub(crate) fn shape(context: impl Into<String>, expected: Vec<usize>, got: Vec<usize>) -> Self {
        NetError::ShapeMismatch {
            context: context.into(),
            expected,
            got,
        }
    }
}
