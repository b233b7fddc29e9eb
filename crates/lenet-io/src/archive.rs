use lenet_core::{Float, Tensor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("model file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("model file is not a valid archive: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Persisted model weights: a flat, ordered list of parameter tensors.
///
/// The archive carries no names; the position of a tensor is its identity,
/// so the network that reads it must visit its parameters in the same order
/// the writer did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct ModelArchive<T: Float> {
    tensors: Vec<Tensor<T>>,
}

impl<T: Float> ModelArchive<T> {
    pub fn new(tensors: Vec<Tensor<T>>) -> Self {
        ModelArchive { tensors }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn tensors(&self) -> &[Tensor<T>] {
        &self.tensors
    }

    pub fn into_tensors(self) -> Vec<Tensor<T>> {
        self.tensors
    }

    pub fn to_json(&self) -> ArchiveResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> ArchiveResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the archive to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ArchiveResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), tensors = self.len(), "saved model archive");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> ArchiveResult<Self> {
        let path = path.as_ref();
        let archive = Self::from_json(&fs::read_to_string(path)?)?;
        info!(path = %path.display(), tensors = archive.len(), "loaded model archive");
        Ok(archive)
    }
}
