//! Adapters over external data sources.
//!
//! Three seams: the reference hydrologic network (a parquet file of reaches
//! with WKB geometry), digital elevation models (grid containers, local or
//! remote), and optional object storage for catalog export. Each seam is a
//! trait with a production implementation plus an in-memory or analytic
//! implementation for tests.

mod dem;
mod network;
mod object;

pub use dem::{
    DemSource, GridDemSource, HttpFetch, PlaneDemSource, RemoteGridDemSource, ReqwestFetch,
    ResolutionUnits, METERS_PER_FOOT,
};
pub use network::{MemoryReachSource, NetworkGraph, NetworkReach, ParquetReachSource, ReachSource};
pub use object::{DirObjectStore, ObjectStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("requested extent not covered by the elevation source: {0}")]
    OutOfBounds(String),

    #[error("network file error: {0}")]
    Network(String),

    #[error("http fetch failed: {0}")]
    Http(String),

    #[error("network has a divergence at reach {0}")]
    Divergence(String),

    #[error("malformed source data: {0}")]
    Format(String),
}
