//! Interfaces to the inference collaborators.
//!
//! Detection and embedding extraction are CPU/accelerator-bound external
//! engines. The core only dictates their contracts: "nothing found" is an
//! empty result, never an error; an `Err` always means the engine itself
//! failed.

use image::RgbImage;
use thiserror::Error;

use crate::types::{BoundingBox, Embedding};

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Face detection engine: full image in, candidate boxes out.
///
/// Implementations return an empty vec, not an error, when no face is
/// found, and must be callable from multiple threads (serialize around
/// the underlying engine internally if it is not thread-safe).
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, InferenceError>;
}

/// Embedding extraction engine: cropped face in, fixed-length embedding out.
///
/// `Ok(None)` means "no usable face in this crop", an expected outcome.
/// `Err` is reserved for genuine infrastructure failure.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, face: &RgbImage) -> Result<Option<Embedding>, InferenceError>;
}
