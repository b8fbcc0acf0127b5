//! ArcFace embedding extractor via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from face crops,
//! resized to the model's 112×112 input.

use facedex_core::inference::{EmbeddingExtractor, InferenceError};
use facedex_core::types::{Embedding, MIN_FACE_PIXELS};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
// NOT 128.0: ArcFace normalization is symmetric.
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// ArcFace-based implementation of the core extractor trait.
pub struct OnnxEmbeddingExtractor {
    session: Mutex<Session>,
}

impl OnnxEmbeddingExtractor {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
        if !model_path.exists() {
            return Err(InferenceError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(2)?))
            .and_then(|mut b| b.commit_from_file(model_path))
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;
        tracing::info!(path = %model_path.display(), "ArcFace extractor loaded");

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Normalize a 112×112 crop into an NCHW float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl EmbeddingExtractor for OnnxEmbeddingExtractor {
    fn extract(&self, face: &RgbImage) -> Result<Option<Embedding>, InferenceError> {
        let (width, height) = face.dimensions();
        if width < MIN_FACE_PIXELS || height < MIN_FACE_PIXELS {
            // too little signal to embed; an expected miss, not a failure
            return Ok(None);
        }

        let resized = imageops::resize(
            face,
            ARCFACE_INPUT_SIZE,
            ARCFACE_INPUT_SIZE,
            FilterType::Triangle,
        );
        let input = Self::preprocess(&resized);

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?])
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::InferenceFailed(format!("embedding extraction: {e}")))?;
        let raw: Vec<f32> = raw.to_vec();

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(InferenceError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|v| v / norm).collect()
        } else {
            raw
        };

        Ok(Some(Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        }))
    }
}
