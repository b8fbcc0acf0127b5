//! Detection-recognition orchestrator: one uploaded image end-to-end.
//!
//! Inference and storage calls are blocking and CPU-bound, so every one
//! of them is dispatched to a bounded worker pool (a semaphore over
//! `spawn_blocking`) shared across all in-flight requests. Per-face
//! recognition fans out concurrently; results are reassembled in the
//! confidence order fixed before fan-out, not in completion order.

use std::cmp::Ordering;
use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::inference::FaceDetector;
use crate::pipeline::{RecognitionOutcome, RecognitionPipeline};
use crate::store::PersonnelLookup;
use crate::types::{
    crop_face, usable_faces, FaceBox, FaceResult, IdentifyReport, MIN_FACE_PIXELS,
};

#[derive(Error, Debug)]
pub enum IdentifyError {
    /// Undecodable bytes or an image below the minimum size, rejected
    /// before any inference runs.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// The worker pool is gone; only possible during shutdown.
    #[error("worker pool unavailable")]
    WorkerPool,
}

/// Upper bound on the inference worker pool.
const MAX_WORKERS: usize = 8;

/// Default pool size: one worker per available core, capped at
/// [`MAX_WORKERS`].
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_WORKERS)
}

/// Orchestrates detect → per-face recognize → personnel join for one
/// image.
pub struct IdentifyService {
    detector: Arc<dyn FaceDetector>,
    pipeline: Arc<RecognitionPipeline>,
    personnel: Arc<dyn PersonnelLookup>,
    workers: Arc<Semaphore>,
    detection_threshold: f32,
}

impl IdentifyService {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        pipeline: Arc<RecognitionPipeline>,
        personnel: Arc<dyn PersonnelLookup>,
        detection_threshold: f32,
        pool_size: usize,
    ) -> Self {
        Self {
            detector,
            pipeline,
            personnel,
            workers: Arc::new(Semaphore::new(pool_size.max(1))),
            detection_threshold,
        }
    }

    /// Decode raw upload bytes and identify every face in them.
    pub async fn identify_bytes(&self, bytes: Vec<u8>) -> Result<IdentifyReport, IdentifyError> {
        let decoded = self
            .run_blocking(move || image::load_from_memory(&bytes))
            .await?
            .map_err(|e| IdentifyError::InvalidImage(format!("decode failed: {e}")))?;
        self.identify(decoded.to_rgb8()).await
    }

    /// Identify every face in an already decoded image.
    ///
    /// Zero detected faces is success (`detected: false`). Per-face
    /// recognition or personnel failures degrade that face to
    /// "detected but unidentified"; they never fail the request.
    pub async fn identify(&self, image: RgbImage) -> Result<IdentifyReport, IdentifyError> {
        let (width, height) = image.dimensions();
        if width < MIN_FACE_PIXELS || height < MIN_FACE_PIXELS {
            return Err(IdentifyError::InvalidImage(format!(
                "{width}x{height} is below the {MIN_FACE_PIXELS}x{MIN_FACE_PIXELS} minimum"
            )));
        }

        let image = Arc::new(image);
        let detections = {
            let detector = self.detector.clone();
            let image = image.clone();
            match self.run_blocking(move || detector.detect(&image)).await? {
                Ok(d) => d,
                Err(err) => {
                    tracing::error!(error = %err, "face detection failed");
                    return Ok(IdentifyReport::empty());
                }
            }
        };

        let mut boxes = usable_faces(&detections, width, height, self.detection_threshold);
        if boxes.is_empty() {
            return Ok(IdentifyReport::empty());
        }

        // Output order is fixed here, before fan-out.
        boxes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        tracing::debug!(count = boxes.len(), "faces retained for recognition");

        let mut tasks = Vec::with_capacity(boxes.len());
        for face_box in &boxes {
            let crop = crop_face(&image, face_box);
            let face_box = face_box.clone();
            let pipeline = self.pipeline.clone();
            let personnel = self.personnel.clone();
            let workers = self.workers.clone();
            tasks.push(tokio::spawn(resolve_face(
                face_box, crop, pipeline, personnel, workers,
            )));
        }

        let mut faces = Vec::with_capacity(tasks.len());
        for (task, face_box) in tasks.into_iter().zip(boxes) {
            match task.await {
                Ok(result) => faces.push(result),
                Err(err) => {
                    tracing::error!(error = %err, "per-face task failed");
                    faces.push(unidentified(face_box));
                }
            }
        }

        Ok(IdentifyReport {
            detected: true,
            faces,
        })
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, IdentifyError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IdentifyError::WorkerPool)?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|_| IdentifyError::WorkerPool)
    }
}

fn unidentified(face_box: FaceBox) -> FaceResult {
    FaceResult {
        face_box,
        person: None,
        similarity: None,
    }
}

/// Recognize one face and, on a match, join its personnel record. Every
/// failure path degrades to an unidentified row; the face is never
/// dropped.
async fn resolve_face(
    face_box: FaceBox,
    crop: RgbImage,
    pipeline: Arc<RecognitionPipeline>,
    personnel: Arc<dyn PersonnelLookup>,
    workers: Arc<Semaphore>,
) -> FaceResult {
    let recognized = {
        let Ok(permit) = workers.clone().acquire_owned().await else {
            return unidentified(face_box);
        };
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            pipeline.recognize(&crop)
        })
        .await
    };

    let outcome = match recognized {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "recognition failed for one face");
            return unidentified(face_box);
        }
        Err(err) => {
            tracing::error!(error = %err, "recognition task failed");
            return unidentified(face_box);
        }
    };

    match outcome {
        RecognitionOutcome::NoFace => unidentified(face_box),
        RecognitionOutcome::NoMatch { similarity } => FaceResult {
            face_box,
            person: None,
            similarity,
        },
        RecognitionOutcome::Match(m) => {
            let looked_up = {
                let Ok(permit) = workers.acquire_owned().await else {
                    return FaceResult {
                        face_box,
                        person: None,
                        similarity: Some(m.similarity),
                    };
                };
                let personnel = personnel.clone();
                let face_id = m.face_id.clone();
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    personnel.lookup(&face_id)
                })
                .await
            };

            let person = match looked_up {
                Ok(Ok(Some(person))) => Some(person),
                Ok(Ok(None)) => {
                    tracing::warn!(face_id = %m.face_id, "matched face has no personnel record");
                    None
                }
                Ok(Err(err)) => {
                    tracing::error!(face_id = %m.face_id, error = %err, "personnel lookup failed");
                    None
                }
                Err(err) => {
                    tracing::error!(face_id = %m.face_id, error = %err, "personnel lookup task failed");
                    None
                }
            };

            FaceResult {
                face_box,
                person,
                similarity: Some(m.similarity),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FaceIndex;
    use crate::inference::{EmbeddingExtractor, InferenceError};
    use crate::store::StoreError;
    use crate::types::{BoundingBox, Embedding, PersonInfo};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    /// Detector that replays a fixed set of boxes and counts calls.
    struct ScriptedDetector {
        boxes: Vec<BoundingBox>,
        calls: AtomicUsize,
    }

    impl ScriptedDetector {
        fn new(boxes: Vec<BoundingBox>) -> Self {
            Self {
                boxes,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>, InferenceError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.boxes.clone())
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>, InferenceError> {
            Err(InferenceError::InferenceFailed("engine down".into()))
        }
    }

    /// Extractor keyed on the crop's top-left pixel: red channel 10 maps
    /// to the enrolled identity, 200 to an unknown face. The enrolled
    /// crop sleeps so its inference finishes last.
    struct PixelKeyedExtractor {
        slow_value: u8,
    }

    impl EmbeddingExtractor for PixelKeyedExtractor {
        fn extract(&self, face: &RgbImage) -> Result<Option<Embedding>, InferenceError> {
            let key = face.get_pixel(0, 0)[0];
            if key == self.slow_value {
                std::thread::sleep(Duration::from_millis(50));
            }
            match key {
                10 => Ok(Some(Embedding::new(vec![1.0, 0.0]))),
                200 => Ok(Some(Embedding::new(vec![0.0, 1.0]))),
                _ => Ok(None),
            }
        }
    }

    struct StaticPersonnel {
        known: Option<String>,
    }

    impl PersonnelLookup for StaticPersonnel {
        fn lookup(&self, face_id: &str) -> Result<Option<PersonInfo>, StoreError> {
            Ok(self.known.as_deref().filter(|id| *id == face_id).map(|_| PersonInfo {
                name: "Ada".into(),
                id_number: None,
                phone: None,
                address: None,
                gender: None,
                category: None,
                status: Some("active".into()),
                photo_path: None,
                created_at: None,
                updated_at: None,
            }))
        }
    }

    fn box_at(x: f32, y: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: 30.0,
            height: 30.0,
            confidence: conf,
        }
    }

    /// 100x100 image with one flat-colored square per face region.
    fn two_face_image() -> RgbImage {
        let mut image = RgbImage::new(100, 100);
        for y in 0..30 {
            for x in 0..30 {
                image.put_pixel(x, y, image::Rgb([10, 10, 10]));
                image.put_pixel(x + 60, y + 60, image::Rgb([200, 200, 200]));
            }
        }
        image
    }

    fn service(
        detector: Arc<dyn FaceDetector>,
        personnel: Arc<dyn PersonnelLookup>,
        index: Arc<FaceIndex>,
        slow_value: u8,
    ) -> IdentifyService {
        let pipeline = Arc::new(RecognitionPipeline::new(
            Arc::new(PixelKeyedExtractor { slow_value }),
            index,
            0.5,
        ));
        IdentifyService::new(detector, pipeline, personnel, 0.5, 4)
    }

    #[tokio::test]
    async fn test_output_order_is_confidence_not_completion() {
        let index = Arc::new(FaceIndex::new());
        let known = index.enroll(Embedding::new(vec![1.0, 0.0])).unwrap();

        // the 0.95-confidence face (pixel 10) is the slow one
        let detector = Arc::new(ScriptedDetector::new(vec![
            box_at(60.0, 60.0, 0.80),
            box_at(0.0, 0.0, 0.95),
        ]));
        let personnel = Arc::new(StaticPersonnel {
            known: Some(known.clone()),
        });
        let svc = service(detector, personnel, index, 10);

        let report = svc.identify(two_face_image()).await.unwrap();
        assert!(report.detected);
        assert_eq!(report.faces.len(), 2);
        // first row is the 0.95 detection even though its inference
        // finished last
        assert!((report.faces[0].face_box.confidence - 0.95).abs() < 1e-6);
        assert_eq!(report.faces[0].face_box.x, 0);
        assert_eq!(report.faces[0].person.as_ref().unwrap().name, "Ada");
        // second face extracted fine but matched nothing enrolled
        assert!(report.faces[1].person.is_none());
        assert!(report.faces[1].similarity.is_some());
    }

    #[tokio::test]
    async fn test_no_match_keeps_box_and_similarity_only() {
        let index = Arc::new(FaceIndex::new());
        index.enroll(Embedding::new(vec![1.0, 0.0])).unwrap();

        // only the unknown face (pixel 200, orthogonal embedding) is present
        let detector = Arc::new(ScriptedDetector::new(vec![box_at(60.0, 60.0, 0.9)]));
        let personnel = Arc::new(StaticPersonnel { known: None });
        let svc = service(detector, personnel, index, 0);

        let report = svc.identify(two_face_image()).await.unwrap();
        assert!(report.detected);
        assert_eq!(report.faces.len(), 1);
        let face = &report.faces[0];
        assert!(face.person.is_none());
        assert!(face.similarity.unwrap().abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_undecodable_bytes_rejected_before_detection() {
        let detector = Arc::new(ScriptedDetector::new(vec![]));
        let personnel = Arc::new(StaticPersonnel { known: None });
        let svc = service(detector.clone(), personnel, Arc::new(FaceIndex::new()), 0);

        let err = svc.identify_bytes(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, IdentifyError::InvalidImage(_)));
        assert_eq!(detector.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tiny_image_rejected_before_detection() {
        let detector = Arc::new(ScriptedDetector::new(vec![]));
        let personnel = Arc::new(StaticPersonnel { known: None });
        let svc = service(detector.clone(), personnel, Arc::new(FaceIndex::new()), 0);

        let err = svc.identify(RgbImage::new(19, 40)).await.unwrap_err();
        assert!(matches!(err, IdentifyError::InvalidImage(_)));
        assert_eq!(detector.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sub_floor_box_excluded_entirely() {
        let index = Arc::new(FaceIndex::new());
        // second box clamps to 30x15 at the bottom edge, below the floor
        let detector = Arc::new(ScriptedDetector::new(vec![
            box_at(0.0, 0.0, 0.9),
            BoundingBox {
                x: 60.0,
                y: 85.0,
                width: 30.0,
                height: 40.0,
                confidence: 0.99,
            },
        ]));
        let personnel = Arc::new(StaticPersonnel { known: None });
        let svc = service(detector, personnel, index, 0);

        let report = svc.identify(two_face_image()).await.unwrap();
        assert_eq!(report.faces.len(), 1);
        assert_eq!(report.faces[0].face_box.x, 0);
    }

    #[tokio::test]
    async fn test_zero_faces_is_success_not_error() {
        let detector = Arc::new(ScriptedDetector::new(vec![]));
        let personnel = Arc::new(StaticPersonnel { known: None });
        let svc = service(detector, personnel, Arc::new(FaceIndex::new()), 0);

        let report = svc.identify(two_face_image()).await.unwrap();
        assert!(!report.detected);
        assert!(report.faces.is_empty());
    }

    #[tokio::test]
    async fn test_detector_failure_degrades_to_not_detected() {
        let personnel = Arc::new(StaticPersonnel { known: None });
        let svc = service(
            Arc::new(FailingDetector),
            personnel,
            Arc::new(FaceIndex::new()),
            0,
        );

        let report = svc.identify(two_face_image()).await.unwrap();
        assert!(!report.detected);
    }

    #[tokio::test]
    async fn test_match_without_personnel_record_keeps_similarity() {
        let index = Arc::new(FaceIndex::new());
        index.enroll(Embedding::new(vec![1.0, 0.0])).unwrap();

        let detector = Arc::new(ScriptedDetector::new(vec![box_at(0.0, 0.0, 0.9)]));
        // lookup knows nobody, so the match stays anonymous
        let personnel = Arc::new(StaticPersonnel { known: None });
        let svc = service(detector, personnel, index, 0);

        let report = svc.identify(two_face_image()).await.unwrap();
        let face = &report.faces[0];
        assert!(face.person.is_none());
        assert!((face.similarity.unwrap() - 1.0).abs() < 1e-6);
    }
}
