//! Domain model: source models, reach submodels, and derived documents.
//!
//! The on-disk layout is the contract between pipeline stages. Everything a
//! stage needs is discovered by walking these paths; nothing is cached in
//! external state.

mod conflation;
pub mod layers;
mod rating;
mod reach;
mod source;

pub use conflation::{
    ConflationDocument, ConflationMetadata, CoverageMetrics, LengthMetrics, OffsetMetrics,
    OverlappedReach, ReachConflation, ReachMetrics, SourceNetworkInfo, SourceRasModelInfo, XsRef,
};
pub use rating::RatingCurve;
pub use reach::{ReachModel, ReachParameters};
pub use source::SourceModel;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("not a source model: {0}")]
    NotASourceModel(String),

    #[error("no valid plan: {0}")]
    NoValidPlan(String),

    #[error("model file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    RasFile(#[from] crate::ras::RasFileError),

    #[error("malformed document {path}: {message}")]
    Document { path: String, message: String },
}
