use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Minimum usable dimension, in pixels, for both whole images and face
/// crops. Anything smaller carries too little signal for the extractor.
pub const MIN_FACE_PIXELS: u32 = 20;

/// Face embedding vector (typically 512-dimensional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero vector
    /// on either side yields 0.0 rather than NaN.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Detector-space bounding box for a face candidate. Coordinates may fall
/// partly outside the image; [`BoundingBox::clamp_to`] clips them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Clip to image bounds and snap to whole pixels.
    ///
    /// Returns `None` when nothing of the box remains inside the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<FaceBox> {
        let x0 = self.x.clamp(0.0, image_width as f32) as u32;
        let y0 = self.y.clamp(0.0, image_height as f32) as u32;
        let x1 = (self.x + self.width).clamp(0.0, image_width as f32) as u32;
        let y1 = (self.y + self.height).clamp(0.0, image_height as f32) as u32;

        let width = x1.saturating_sub(x0);
        let height = y1.saturating_sub(y0);
        if width == 0 || height == 0 {
            return None;
        }

        Some(FaceBox {
            x: x0,
            y: y0,
            width,
            height,
            confidence: self.confidence,
        })
    }
}

/// Pixel-space face rectangle after clamping, with detection confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionMatch {
    pub face_id: String,
    /// Cosine similarity of the matched entry [-1, 1].
    pub similarity: f32,
}

/// Personnel record associated with an enrolled face. The pipeline treats
/// this as an opaque lookup result; it has no structure of its own here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonInfo {
    pub name: String,
    pub id_number: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-face row of an identification report.
///
/// `similarity` is present whenever embedding extraction succeeded, even
/// for faces that did not clear the match threshold; `person` is present
/// only for a matched face whose personnel record was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceResult {
    pub face_box: FaceBox,
    pub person: Option<PersonInfo>,
    pub similarity: Option<f32>,
}

/// Full identification report for one uploaded image. `faces` is ordered
/// by detection confidence, descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyReport {
    pub detected: bool,
    pub faces: Vec<FaceResult>,
}

impl IdentifyReport {
    pub fn empty() -> Self {
        Self {
            detected: false,
            faces: Vec::new(),
        }
    }
}

/// Keep detections above the confidence cutoff, clip them to the image,
/// and drop boxes whose clipped size falls below [`MIN_FACE_PIXELS`].
pub fn usable_faces(
    detections: &[BoundingBox],
    image_width: u32,
    image_height: u32,
    confidence_cutoff: f32,
) -> Vec<FaceBox> {
    detections
        .iter()
        .filter(|d| d.confidence > confidence_cutoff)
        .filter_map(|d| d.clamp_to(image_width, image_height))
        .filter(|b| b.width >= MIN_FACE_PIXELS && b.height >= MIN_FACE_PIXELS)
        .collect()
}

/// Copy the face region out of the source image.
pub fn crop_face(image: &RgbImage, face_box: &FaceBox) -> RgbImage {
    image::imageops::crop_imm(image, face_box.x, face_box.y, face_box.width, face_box.height)
        .to_image()
}
