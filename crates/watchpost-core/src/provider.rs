//! Seam to the external face detector / embedding model.

use crate::frame::Frame;
use crate::types::{BoundingBox, Embedding};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// One detected face and its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEncoding {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Detects faces in a frame and encodes each into an embedding.
///
/// All embeddings must share the registry's dimension; the matcher rejects
/// anything else.
pub trait EmbeddingProvider: Send {
    fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<FaceEncoding>, ProviderError>;
}
