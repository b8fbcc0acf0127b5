//! facedex-core — Face identity index and concurrent
//! detect-then-recognize pipeline.
//!
//! The index owns the enrolled gallery of embeddings; detection,
//! embedding extraction, personnel records, and durable photo storage
//! are collaborators reached through the traits in [`inference`] and
//! [`store`]. Components are constructed explicitly at startup and
//! injected; there is no global state.

pub mod enrollment;
pub mod identify;
pub mod index;
pub mod inference;
pub mod pipeline;
pub mod store;
pub mod types;

pub use enrollment::{EnrollError, Enrolled, EnrollmentService};
pub use identify::{default_pool_size, IdentifyError, IdentifyService};
pub use index::{FaceIndex, IndexError};
pub use inference::{EmbeddingExtractor, FaceDetector, InferenceError};
pub use pipeline::{RecognitionOutcome, RecognitionPipeline};
pub use store::{ImageStore, PersonnelLookup, StoreError};
pub use types::{
    BoundingBox, Embedding, FaceBox, FaceResult, IdentifyReport, PersonInfo, RecognitionMatch,
};
