use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facedex_core::{
    EnrollmentService, FaceIndex, IdentifyService, ImageStore, RecognitionPipeline,
};
use facedex_onnx::{OnnxEmbeddingExtractor, OnnxFaceDetector};
use facedex_store::{FsImageStore, SqlitePersonnel};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facedex", about = "Facedex face identification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify every face in an image against the gallery
    Identify {
        /// Image file to process
        image: PathBuf,
    },
    /// Enroll the largest face in an image into the gallery
    Enroll {
        /// Image file holding the face to enroll
        image: PathBuf,
    },
    /// Remove an enrolled face by identifier
    Remove {
        /// Face identifier to remove
        id: String,
    },
    /// List enrolled faces
    List,
    /// Show configuration and gallery diagnostics
    Status,
}

/// Loaded engines plus the shared gallery, wired once at startup.
struct Runtime {
    config: Config,
    detector: Arc<OnnxFaceDetector>,
    extractor: Arc<OnnxEmbeddingExtractor>,
    index: Arc<FaceIndex>,
    images: Arc<FsImageStore>,
}

impl Runtime {
    /// Load both models, open the photo store, and rebuild the gallery
    /// from it. Fails fast when a model file is missing.
    fn bring_up(config: Config) -> Result<Self> {
        let detector = Arc::new(
            OnnxFaceDetector::load(&config.detector_model_path())
                .context("loading detection model")?,
        );
        let extractor = Arc::new(
            OnnxEmbeddingExtractor::load(&config.extractor_model_path())
                .context("loading recognition model")?,
        );
        let images =
            Arc::new(FsImageStore::open(&config.faces_dir).context("opening photo store")?);
        let index = Arc::new(FaceIndex::new());

        let runtime = Self {
            config,
            detector,
            extractor,
            index,
            images,
        };
        runtime.enrollment().rebuild()?;
        Ok(runtime)
    }

    fn enrollment(&self) -> EnrollmentService {
        EnrollmentService::new(
            self.detector.clone(),
            self.extractor.clone(),
            self.index.clone(),
            self.images.clone(),
            self.config.detection_threshold,
        )
    }

    fn identify_service(&self) -> Result<IdentifyService> {
        let personnel = Arc::new(
            SqlitePersonnel::open(&self.config.db_path).context("opening personnel database")?,
        );
        let pipeline = Arc::new(RecognitionPipeline::new(
            self.extractor.clone(),
            self.index.clone(),
            self.config.similarity_threshold,
        ));
        Ok(IdentifyService::new(
            self.detector.clone(),
            pipeline,
            personnel,
            self.config.detection_threshold,
            self.config.workers,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Identify { image } => {
            let runtime = Runtime::bring_up(config)?;
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;
            let report = runtime.identify_service()?.identify_bytes(bytes).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Enroll { image } => {
            let runtime = Runtime::bring_up(config)?;
            let photo = image::open(&image)
                .with_context(|| format!("reading {}", image.display()))?
                .to_rgb8();
            let enrolled = runtime.enrollment().enroll(&photo)?;
            println!(
                "{}",
                serde_json::json!({
                    "face_id": enrolled.face_id,
                    "photo_path": enrolled.photo_path,
                })
            );
        }
        Commands::Remove { id } => {
            let runtime = Runtime::bring_up(config)?;
            if runtime.enrollment().remove(&id) {
                println!("removed {id}");
            } else {
                println!("{id} was not enrolled");
            }
        }
        Commands::List => {
            let runtime = Runtime::bring_up(config)?;
            let entries = runtime.index.snapshot();
            if entries.is_empty() {
                println!("gallery is empty");
            }
            for (face_id, source) in entries {
                match source {
                    Some(path) => println!("{face_id}  {}", path.display()),
                    None => println!("{face_id}"),
                }
            }
        }
        Commands::Status => {
            // diagnostics must work even when models are not installed
            let images = FsImageStore::open(&config.faces_dir)?;
            let stored = images.entries()?.len();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "faces_dir": config.faces_dir,
                    "db_path": config.db_path,
                    "stored_photos": stored,
                    "detector_model": {
                        "path": config.detector_model_path(),
                        "present": config.detector_model_path().exists(),
                    },
                    "extractor_model": {
                        "path": config.extractor_model_path(),
                        "present": config.extractor_model_path().exists(),
                    },
                    "detection_threshold": config.detection_threshold,
                    "similarity_threshold": config.similarity_threshold,
                    "workers": config.workers,
                }))?
            );
        }
    }

    Ok(())
}
