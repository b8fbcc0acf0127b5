//! In-memory gallery of enrolled face embeddings.
//!
//! The index is the only mutable shared state of the recognition
//! subsystem. Lookups run concurrently under a read lock; every mutation
//! takes the write lock, so a query observes either the pre- or the
//! post-mutation gallery, never an intermediate one.

use std::path::PathBuf;

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Embedding, RecognitionMatch};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("embedding dimensionality mismatch: index holds {expected}-dim entries, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("embedding must not be empty")]
    EmptyEmbedding,
}

/// One enrolled face.
struct GalleryEntry {
    id: String,
    embedding: Embedding,
    /// L2 norm, precomputed at insertion so queries only pay for the dot
    /// product.
    norm: f32,
    /// Image on disk the embedding was derived from, when known.
    source: Option<PathBuf>,
}

#[derive(Default)]
struct Gallery {
    /// Fixed embedding dimensionality, adopted from the first entry.
    dim: Option<usize>,
    /// Iteration order is insertion order minus removals; [`FaceIndex::reload`]
    /// re-appends at the end.
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    fn check_dim(&self, embedding: &Embedding) -> Result<(), IndexError> {
        if embedding.dim() == 0 {
            return Err(IndexError::EmptyEmbedding);
        }
        match self.dim {
            Some(expected) if expected != embedding.dim() => Err(IndexError::DimensionMismatch {
                expected,
                got: embedding.dim(),
            }),
            _ => Ok(()),
        }
    }

    fn push(&mut self, id: String, embedding: Embedding, source: Option<PathBuf>) {
        self.dim = Some(embedding.dim());
        let norm = embedding.norm();
        self.entries.push(GalleryEntry {
            id,
            embedding,
            norm,
            source,
        });
    }

    fn remove(&mut self, face_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != face_id);
        let removed = self.entries.len() != before;
        if self.entries.is_empty() {
            // An emptied gallery adopts the dimensionality of whatever is
            // enrolled next.
            self.dim = None;
        }
        removed
    }
}

/// Thread-safe face identity index.
///
/// Owned by exactly one place in the process and handed to the pipeline
/// and orchestrators at construction; there is no global instance.
pub struct FaceIndex {
    inner: RwLock<Gallery>,
}

impl Default for FaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Gallery::default()),
        }
    }

    /// Add a new face under a freshly generated identifier.
    pub fn enroll(&self, embedding: Embedding) -> Result<String, IndexError> {
        let mut gallery = self.inner.write();
        gallery.check_dim(&embedding)?;

        let face_id = Uuid::new_v4().to_string();
        gallery.push(face_id.clone(), embedding, None);
        tracing::debug!(face_id = %face_id, size = gallery.entries.len(), "face enrolled in index");
        Ok(face_id)
    }

    /// Atomically replace the entry for `face_id`, equivalent to
    /// remove-then-enroll under the same identifier. Acts as a plain
    /// insert when the identifier is absent.
    ///
    /// Returns `true` when an existing entry was replaced.
    pub fn reload(
        &self,
        face_id: &str,
        embedding: Embedding,
        source: Option<PathBuf>,
    ) -> Result<bool, IndexError> {
        let mut gallery = self.inner.write();
        let replaced = gallery.remove(face_id);
        gallery.check_dim(&embedding)?;
        gallery.push(face_id.to_string(), embedding, source);
        tracing::debug!(face_id, replaced, "face reloaded in index");
        Ok(replaced)
    }

    /// Remove the entry for `face_id`. Returns `false`, not an error,
    /// when the identifier is absent.
    pub fn remove(&self, face_id: &str) -> bool {
        let removed = self.inner.write().remove(face_id);
        if removed {
            tracing::debug!(face_id, "face removed from index");
        }
        removed
    }

    /// Nearest enrolled entry by cosine similarity, regardless of any
    /// threshold. `None` on an empty index or when the probe's
    /// dimensionality does not match the gallery's.
    ///
    /// Ties in maximum similarity resolve to the first entry in iteration
    /// order (deterministic, but not similarity-weighted).
    pub fn nearest(&self, probe: &Embedding) -> Option<RecognitionMatch> {
        let gallery = self.inner.read();
        if gallery.dim != Some(probe.dim()) {
            return None;
        }

        let probe_norm = probe.norm();
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.entries.iter().enumerate() {
            let dot: f32 = probe
                .values
                .iter()
                .zip(entry.embedding.values.iter())
                .map(|(a, b)| a * b)
                .sum();
            let denom = probe_norm * entry.norm;
            let sim = if denom > 0.0 { dot / denom } else { 0.0 };
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        best_idx.map(|idx| RecognitionMatch {
            face_id: gallery.entries[idx].id.clone(),
            similarity: best_sim,
        })
    }

    /// Best match strictly above `threshold`, or `None`. A similarity
    /// exactly equal to the threshold is a no-match.
    pub fn query(&self, probe: &Embedding, threshold: f32) -> Option<RecognitionMatch> {
        self.nearest(probe).filter(|m| m.similarity > threshold)
    }

    /// Current entry count.
    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Identifiers and provenance in iteration order, for diagnostics.
    pub fn snapshot(&self) -> Vec<(String, Option<PathBuf>)> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|e| (e.id.clone(), e.source.clone()))
            .collect()
    }
}
