//! fimflow - flood inundation map library engine
//!
//! Repurposes steady-state hydraulic river models onto a national reach
//! network: a long-running service accepts OGC Processes-shaped execution
//! requests, runs each job in an isolated child process against a durable
//! job store, and drives the multi-stage hydraulic pipeline that turns a
//! source model into reach-scoped depth grids and synthetic rating curves.
//!
//! # High-Level API
//!
//! ```ignore
//! use fimflow::config::Settings;
//! use fimflow::service::Service;
//!
//! let service = Service::new(Settings::load())?;
//! service.run().await?;
//! ```
//!
//! Stages are also directly invocable:
//!
//! ```ignore
//! use fimflow::pipeline::{run_process, StageContext};
//!
//! let ctx = StageContext::from_settings(Settings::load());
//! let result = run_process("conflate_model", &input, &ctx)?;
//! ```

pub mod config;
pub mod geometry;
pub mod gpkg;
pub mod http;
pub mod job;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod ras;
pub mod raster;
pub mod registry;
pub mod service;
pub mod solver;
pub mod sources;
pub mod store;
pub mod supervisor;
pub mod testutil;
pub mod worker;

/// Version of the fimflow library and CLI.
///
/// Synchronized across the workspace; injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
