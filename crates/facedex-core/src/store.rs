//! Interfaces to the storage collaborators: the personnel record store
//! and the durable image store backing the gallery.

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

use crate::types::PersonInfo;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),
    #[error("database: {0}")]
    Database(String),
}

/// Lookup of the personnel record associated with an enrolled face.
pub trait PersonnelLookup: Send + Sync {
    fn lookup(&self, face_id: &str) -> Result<Option<PersonInfo>, StoreError>;
}

/// Durable store for enrollment source images, one image per identifier.
/// The gallery is rebuilt from these at startup.
pub trait ImageStore: Send + Sync {
    /// Persist the canonical photo for `face_id`, returning its path.
    fn save(&self, face_id: &str, image: &RgbImage) -> Result<PathBuf, StoreError>;

    /// Load a previously stored photo.
    fn load(&self, path: &Path) -> Result<RgbImage, StoreError>;

    /// Best-effort deletion of the stored photo for `face_id`. Returns
    /// `true` when something was deleted.
    fn remove(&self, face_id: &str) -> Result<bool, StoreError>;

    /// All stored photos as (identifier, path) pairs.
    fn entries(&self) -> Result<Vec<(String, PathBuf)>, StoreError>;
}
