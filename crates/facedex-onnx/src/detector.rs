//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS
//! post-processing, operating on RGB images. The session is serialized
//! behind a mutex; the detector itself is shared freely across threads.

use facedex_core::inference::{FaceDetector, InferenceError};
use facedex_core::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
/// Model-level score floor; the orchestrator applies the configured
/// cutoff on top of this.
const SCRFD_SCORE_FLOOR: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// 3 strides × (score, bbox). Landmark outputs, when the model exports
/// them, are ignored.
const SCRFD_MIN_OUTPUTS: usize = 6;

/// Mapping from the letterboxed input square back to source pixels.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// SCRFD-based implementation of the core detector trait.
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
}

impl OnnxFaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
        if !model_path.exists() {
            return Err(InferenceError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(2)?))
            .and_then(|mut b| b.commit_from_file(model_path))
            .map_err(infra)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < SCRFD_MIN_OUTPUTS {
            return Err(InferenceError::InferenceFailed(format!(
                "SCRFD model exports {} outputs, need at least {SCRFD_MIN_OUTPUTS} (3 strides × score/bbox)",
                output_names.len()
            )));
        }
        tracing::info!(path = %model_path.display(), outputs = ?output_names, "SCRFD detector loaded");

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Letterbox into the model's square input and build a normalized
    /// NCHW tensor. Padding stays at the tensor's zero fill, which is
    /// exactly the normalized mean.
    fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let (width, height) = image.dimensions();
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32)
            .min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).max(1);
        let new_h = ((height as f32 * scale).round() as u32).max(1);
        let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
        let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;

        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let x_off = pad_x.floor() as usize;
        let y_off = pad_y.floor() as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x as usize + x_off, y as usize + y_off);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (
            tensor,
            Letterbox {
                scale,
                pad_x,
                pad_y,
            },
        )
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, InferenceError> {
        let (input, letterbox) = Self::preprocess(image);

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![TensorRef::from_array_view(input.view()).map_err(infra)?])
            .map_err(infra)?;

        // Positional layout: [0..3) = scores per stride, [3..6) = bboxes.
        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| infra(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[pos + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| infra(format!("bboxes stride {stride}: {e}")))?;
            candidates.extend(decode_stride(scores, deltas, stride, &letterbox));
        }
        drop(outputs);
        drop(session);

        let mut faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(faces)
    }
}

fn infra(err: impl std::fmt::Display) -> InferenceError {
    InferenceError::InferenceFailed(err.to_string())
}

/// Decode one stride level: each grid cell carries
/// [`SCRFD_ANCHORS_PER_CELL`] anchors whose bbox tensor holds
/// [l, t, r, b] distances from the anchor center, in stride units.
fn decode_stride(scores: &[f32], deltas: &[f32], stride: u32, letterbox: &Letterbox) -> Vec<BoundingBox> {
    let grid_w = (SCRFD_INPUT_SIZE / stride) as usize;
    let grid_h = (SCRFD_INPUT_SIZE / stride) as usize;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;

    let mut out = Vec::new();
    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCRFD_SCORE_FLOOR {
            continue;
        }
        let Some(delta) = deltas.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * stride as f32;
        let anchor_y = (cell / grid_w) as f32 * stride as f32;

        let x1 = anchor_x - delta[0] * stride as f32;
        let y1 = anchor_y - delta[1] * stride as f32;
        let x2 = anchor_x + delta[2] * stride as f32;
        let y2 = anchor_y + delta[3] * stride as f32;

        out.push(BoundingBox {
            x: (x1 - letterbox.pad_x) / letterbox.scale,
            y: (y1 - letterbox.pad_y) / letterbox.scale,
            width: (x2 - x1) / letterbox.scale,
            height: (y2 - y1) / letterbox.scale,
            confidence: score,
        });
    }
    out
}

/// Non-maximum suppression: greedily keep the highest-scoring box and
/// drop everything overlapping it beyond `iou_threshold`.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(5.0, 0.0, 10.0, 10.0, 1.0);
        // intersection 50, union 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let result = nms(
            vec![
                make_box(0.0, 0.0, 100.0, 100.0, 0.9),
                make_box(5.0, 5.0, 100.0, 100.0, 0.8),
                make_box(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let result = nms(
            vec![
                make_box(0.0, 0.0, 10.0, 10.0, 0.9),
                make_box(50.0, 50.0, 10.0, 10.0, 0.8),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_maps_back_through_letterbox() {
        // one hot anchor at cell (2, 1) of an 80x80 grid (stride 8),
        // predicting a 2-stride-unit box around its center
        let grid = (SCRFD_INPUT_SIZE / 8) as usize;
        let mut scores = vec![0.0f32; grid * grid * SCRFD_ANCHORS_PER_CELL];
        let mut deltas = vec![0.0f32; scores.len() * 4];
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL; // row 1, col 2, anchor 0
        scores[idx] = 0.9;
        deltas[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let letterbox = Letterbox {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let boxes = decode_stride(&scores, &deltas, 8, &letterbox);
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        // anchor center (16, 8) in input space, box [8..24]x[0..16],
        // halved by the 2.0 scale
        assert!((b.x - 4.0).abs() < 1e-4);
        assert!((b.y - 0.0).abs() < 1e-4);
        assert!((b.width - 8.0).abs() < 1e-4);
        assert!((b.height - 8.0).abs() < 1e-4);
        assert!((b.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_ignores_scores_at_floor() {
        let grid = (SCRFD_INPUT_SIZE / 32) as usize;
        let scores = vec![SCRFD_SCORE_FLOOR; grid * grid * SCRFD_ANCHORS_PER_CELL];
        let deltas = vec![1.0f32; scores.len() * 4];
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        assert!(decode_stride(&scores, &deltas, 32, &letterbox).is_empty());
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        // 320x240 source: scaled by 2.0 to 640x480, padded to 640x640
        let image = RgbImage::from_pixel(320, 240, image::Rgb([255, 255, 255]));
        let (tensor, letterbox) = OnnxFaceDetector::preprocess(&image);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert!((letterbox.pad_x - 0.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);

        // padding rows keep the zero fill, image rows are normalized white
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 320, 320]] - white).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_roundtrip_coordinates() {
        let image = RgbImage::new(320, 240);
        let (_, letterbox) = OnnxFaceDetector::preprocess(&image);

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let boxed_x = orig_x * letterbox.scale + letterbox.pad_x;
        let boxed_y = orig_y * letterbox.scale + letterbox.pad_y;
        assert!(((boxed_x - letterbox.pad_x) / letterbox.scale - orig_x).abs() < 0.1);
        assert!(((boxed_y - letterbox.pad_y) / letterbox.scale - orig_y).abs() < 0.1);
    }
}
