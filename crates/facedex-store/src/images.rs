//! Filesystem photo store: one image per enrolled face, identifier =
//! file stem. The gallery is rebuilt from this directory at startup.

use std::fs;
use std::path::{Path, PathBuf};

use facedex_core::store::{ImageStore, StoreError};
use image::RgbImage;

/// Extensions a stored photo may carry. New photos are always written as
/// JPEG; the other extensions cover hand-placed files.
const STORED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Flat-directory photo store.
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    /// Open (and create if needed) the photo directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageStore for FsImageStore {
    fn save(&self, face_id: &str, image: &RgbImage) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(format!("{face_id}.jpg"));
        image.save(&path)?;
        tracing::debug!(face_id, path = %path.display(), "photo saved");
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<RgbImage, StoreError> {
        Ok(image::open(path)?.to_rgb8())
    }

    fn remove(&self, face_id: &str) -> Result<bool, StoreError> {
        let mut deleted = false;
        for ext in STORED_EXTENSIONS {
            let path = self.dir.join(format!("{face_id}.{ext}"));
            if path.exists() {
                fs::remove_file(&path)?;
                tracing::debug!(face_id, path = %path.display(), "photo deleted");
                deleted = true;
            }
        }
        Ok(deleted)
    }

    fn entries(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if !path.is_file() {
                continue;
            }
            let matches_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| STORED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !matches_ext {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                entries.push((stem.to_string(), path.clone()));
            }
        }
        entries.sort();
        Ok(entries)
    }
}
