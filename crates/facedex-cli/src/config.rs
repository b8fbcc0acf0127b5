use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding one photo per enrolled face.
    pub faces_dir: PathBuf,
    /// Path to the personnel SQLite database.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detection confidence cutoff; detections at or below it are dropped.
    pub detection_threshold: f32,
    /// Cosine similarity a gallery entry must exceed to count as a match.
    pub similarity_threshold: f32,
    /// Inference worker pool size.
    pub workers: usize,
}

impl Config {
    /// Load configuration from `FACEDEX_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facedex");

        let faces_dir = std::env::var("FACEDEX_FACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces"));

        let db_path = std::env::var("FACEDEX_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("personnel.db"));

        let model_dir = std::env::var("FACEDEX_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facedex_onnx::default_model_dir());

        Self {
            faces_dir,
            db_path,
            model_dir,
            detection_threshold: env_f32("FACEDEX_DETECTION_THRESHOLD", 0.70),
            similarity_threshold: env_f32("FACEDEX_SIMILARITY_THRESHOLD", 0.40),
            workers: env_usize("FACEDEX_WORKERS", facedex_core::default_pool_size()),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(facedex_onnx::DETECTOR_MODEL)
    }

    /// Path to the ArcFace recognition model.
    pub fn extractor_model_path(&self) -> PathBuf {
        self.model_dir.join(facedex_onnx::EXTRACTOR_MODEL)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
