//! Enrollment and removal orchestration for the face gallery.
//!
//! Enrollment is one logical unit tolerant of partial external failure:
//! extract → persist the canonical photo → index → re-derive from the
//! stored photo under the same identifier. Removal drops the index entry
//! first; photo cleanup is best-effort.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

use crate::index::{FaceIndex, IndexError};
use crate::inference::{EmbeddingExtractor, FaceDetector, InferenceError};
use crate::store::{ImageStore, StoreError};
use crate::types::{crop_face, usable_faces, Embedding, MIN_FACE_PIXELS};

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("no usable face in the image")]
    NoFaceFound,
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("image store: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrolled {
    pub face_id: String,
    pub photo_path: PathBuf,
}

/// Adds faces to and removes faces from the gallery, keeping the index
/// and the durable image store in step.
pub struct EnrollmentService {
    detector: Arc<dyn FaceDetector>,
    extractor: Arc<dyn EmbeddingExtractor>,
    index: Arc<FaceIndex>,
    images: Arc<dyn ImageStore>,
    detection_threshold: f32,
}

impl EnrollmentService {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        extractor: Arc<dyn EmbeddingExtractor>,
        index: Arc<FaceIndex>,
        images: Arc<dyn ImageStore>,
        detection_threshold: f32,
    ) -> Self {
        Self {
            detector,
            extractor,
            index,
            images,
            detection_threshold,
        }
    }

    /// Enroll the largest face in `image` and persist the image as the
    /// entry's canonical photo.
    ///
    /// The index entry is first derived from the detection crop, then
    /// re-derived from the stored photo so the gallery tracks what is
    /// actually on disk. A failed re-derivation keeps the crop-derived
    /// embedding; a failed photo save rolls the index entry back.
    pub fn enroll(&self, image: &RgbImage) -> Result<Enrolled, EnrollError> {
        let (width, height) = image.dimensions();
        if width < MIN_FACE_PIXELS || height < MIN_FACE_PIXELS {
            return Err(EnrollError::InvalidImage(format!(
                "{width}x{height} is below the {MIN_FACE_PIXELS}x{MIN_FACE_PIXELS} minimum"
            )));
        }

        let embedding = self
            .largest_face_embedding(image)?
            .ok_or(EnrollError::NoFaceFound)?;
        let face_id = self.index.enroll(embedding)?;

        let photo_path = match self.images.save(&face_id, image) {
            Ok(path) => path,
            Err(err) => {
                // keep the gallery consistent with durable storage
                self.index.remove(&face_id);
                return Err(err.into());
            }
        };

        if let Err(err) = self.reload_from(&face_id, &photo_path) {
            tracing::warn!(
                face_id = %face_id,
                error = %err,
                "re-derivation from stored photo failed; keeping crop-derived embedding"
            );
        }

        tracing::info!(face_id = %face_id, path = %photo_path.display(), "face enrolled");
        Ok(Enrolled {
            face_id,
            photo_path,
        })
    }

    /// Remove `face_id` from the gallery. The identifier is gone from the
    /// index regardless of whether the stored photo could be deleted.
    pub fn remove(&self, face_id: &str) -> bool {
        let removed = self.index.remove(face_id);
        match self.images.remove(face_id) {
            Ok(deleted) => {
                if removed && !deleted {
                    tracing::warn!(face_id, "no stored photo found for removed face");
                }
            }
            Err(err) => {
                tracing::warn!(face_id, error = %err, "stored photo cleanup failed");
            }
        }
        if removed {
            tracing::info!(face_id, "face removed");
        }
        removed
    }

    /// Rebuild the gallery from the image store, one entry per stored
    /// photo. Photos without an extractable face are skipped. Returns the
    /// number of entries loaded.
    pub fn rebuild(&self) -> Result<usize, EnrollError> {
        let mut loaded = 0usize;
        for (face_id, path) in self.images.entries()? {
            match self.reload_from(&face_id, &path) {
                Ok(()) => loaded += 1,
                Err(err) => {
                    tracing::debug!(face_id = %face_id, error = %err, "skipping stored photo")
                }
            }
        }
        if loaded == 0 {
            tracing::warn!("face gallery is empty");
        } else {
            tracing::info!(count = loaded, "face gallery rebuilt");
        }
        Ok(loaded)
    }

    /// Replace the index entry for `face_id` with an embedding derived
    /// from the stored photo at `path`.
    fn reload_from(&self, face_id: &str, path: &Path) -> Result<(), EnrollError> {
        let image = self.images.load(path)?;
        let embedding = self
            .largest_face_embedding(&image)?
            .ok_or(EnrollError::NoFaceFound)?;
        self.index
            .reload(face_id, embedding, Some(path.to_path_buf()))?;
        Ok(())
    }

    /// Detect, crop, and extract for the largest viable face in `image`.
    fn largest_face_embedding(&self, image: &RgbImage) -> Result<Option<Embedding>, EnrollError> {
        let (width, height) = image.dimensions();
        let detections = self.detector.detect(image)?;
        let boxes = usable_faces(&detections, width, height, self.detection_threshold);

        let Some(largest) = boxes.into_iter().max_by_key(|b| b.area()) else {
            return Ok(None);
        };
        let crop = crop_face(image, &largest);
        Ok(self.extractor.extract(&crop)?)
    }
}
