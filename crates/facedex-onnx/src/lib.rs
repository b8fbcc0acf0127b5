//! facedex-onnx — ONNX Runtime implementations of the facedex inference
//! traits: SCRFD for face detection, ArcFace for embedding extraction.

use std::path::PathBuf;

pub mod detector;
pub mod extractor;

pub use detector::OnnxFaceDetector;
pub use extractor::OnnxEmbeddingExtractor;

/// SCRFD detection model filename.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model filename.
pub const EXTRACTOR_MODEL: &str = "w600k_r50.onnx";

/// Default directory for ONNX model files:
/// `$XDG_DATA_HOME/facedex/models` (or `~/.local/share/facedex/models`).
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facedex/models")
}
