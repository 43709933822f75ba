//! Solver adapter: the only seam through which the external hydraulic
//! solver is invoked.
//!
//! `Solver::run` takes a plan file and produces a results bundle next to it
//! (`<reach>.rNN` for plan `<reach>.pNN`). Results are read back through
//! [`SolverResults`], which exposes per-profile records. Production deploys
//! configure [`CommandSolver`]; tests and unconfigured installs use the
//! deterministic [`SyntheticSolver`].

mod results;
mod synthetic;

pub use results::{ProfileRecord, SolverResults};
pub use synthetic::SyntheticSolver;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed results bundle {path}: {message}")]
    MalformedResults { path: String, message: String },

    #[error("solver model error: {0}")]
    Model(String),
}

impl From<crate::raster::RasterError> for SolverError {
    fn from(e: crate::raster::RasterError) -> Self {
        Self::Model(e.to_string())
    }
}

/// Outcome of one solver invocation.
#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub exit_code: i32,
    pub results_path: PathBuf,
}

/// Runs a plan file through the hydraulic solver.
pub trait Solver: Send + Sync {
    fn run(&self, plan_path: &Path) -> Result<SolverOutcome, SolverError>;
}

/// Results path convention: plan `<name>.pNN` → results `<name>.rNN`.
pub fn results_path_for_plan(plan_path: &Path) -> Option<PathBuf> {
    let extension = plan_path.extension()?.to_str()?;
    let number = extension.strip_prefix('p')?;
    Some(plan_path.with_extension(format!("r{number}")))
}

/// Invokes a configured external solver binary: `<command> <plan_path>`.
pub struct CommandSolver {
    command: String,
}

impl CommandSolver {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl Solver for CommandSolver {
    fn run(&self, plan_path: &Path) -> Result<SolverOutcome, SolverError> {
        let results_path = results_path_for_plan(plan_path).ok_or_else(|| {
            SolverError::Model(format!("not a plan path: {}", plan_path.display()))
        })?;
        let status = std::process::Command::new(&self.command)
            .arg(plan_path)
            .status()?;
        Ok(SolverOutcome {
            exit_code: status.code().unwrap_or(-1),
            results_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_path_convention() {
        let path = results_path_for_plan(Path::new("/data/2823932/2823932.p03")).unwrap();
        assert!(path.ends_with("2823932.r03"));
        assert!(results_path_for_plan(Path::new("/data/2823932/2823932.gpkg")).is_none());
    }
}
