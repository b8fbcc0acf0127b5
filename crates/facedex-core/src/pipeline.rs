//! Recognition pipeline: one cropped face in, one identity decision out.

use std::sync::Arc;

use image::RgbImage;

use crate::index::FaceIndex;
use crate::inference::{EmbeddingExtractor, InferenceError};
use crate::types::RecognitionMatch;

/// Identity decision for a single face crop.
#[derive(Debug, Clone)]
pub enum RecognitionOutcome {
    /// The extractor found no usable face in the crop. Expected, not an
    /// error.
    NoFace,
    /// An embedding was extracted but the best gallery similarity did not
    /// clear the threshold. `similarity` is `None` iff the gallery is
    /// empty.
    NoMatch { similarity: Option<f32> },
    /// Best gallery entry strictly above the threshold.
    Match(RecognitionMatch),
}

/// Turns a face crop into a [`RecognitionOutcome`] against the shared
/// index, at a fixed similarity threshold.
pub struct RecognitionPipeline {
    extractor: Arc<dyn EmbeddingExtractor>,
    index: Arc<FaceIndex>,
    threshold: f32,
}

impl RecognitionPipeline {
    pub fn new(extractor: Arc<dyn EmbeddingExtractor>, index: Arc<FaceIndex>, threshold: f32) -> Self {
        Self {
            extractor,
            index,
            threshold,
        }
    }

    /// Extract an embedding and rank it against the gallery.
    ///
    /// Extraction misses and sub-threshold similarities are values, not
    /// errors; `Err` means the extraction engine itself failed and is the
    /// caller's to log and degrade.
    pub fn recognize(&self, face: &RgbImage) -> Result<RecognitionOutcome, InferenceError> {
        let Some(embedding) = self.extractor.extract(face)? else {
            return Ok(RecognitionOutcome::NoFace);
        };

        Ok(match self.index.nearest(&embedding) {
            Some(m) if m.similarity > self.threshold => {
                tracing::debug!(face_id = %m.face_id, similarity = m.similarity, "face recognized");
                RecognitionOutcome::Match(m)
            }
            Some(m) => RecognitionOutcome::NoMatch {
                similarity: Some(m.similarity),
            },
            None => RecognitionOutcome::NoMatch { similarity: None },
        })
    }
}
