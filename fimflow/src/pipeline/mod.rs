//! The hydraulic workflow stages.
//!
//! Each stage is a synchronous function over (typed input, ambient
//! adapters) with documented side effects on the reach data layout. Stages
//! re-derive their inputs from the files they read, never from caches, so
//! every stage is retriable on its own inputs.
//!
//! Dispatch lives here: process-name lookup, input validation, the
//! per-submodel advisory lock, and the eclipsed-reach short circuit.

mod conflate;
mod conflation_metrics;
mod fim_lib;
mod gpkg_extract;
mod kwse;
mod normal_depth;
mod submodel;
mod terrain;
mod terrain_agreement;

pub use conflate::conflate_model;
pub use conflation_metrics::compute_conflation_metrics;
pub use fim_lib::{create_fim_lib, create_rating_curves_db, rating_rows};
pub use gpkg_extract::ras_to_gpkg;
pub use kwse::run_known_wse;
pub use normal_depth::{create_model_run_normal_depth, run_incremental_normal_depth};
pub use submodel::extract_submodel;
pub use terrain::create_ras_terrain;

use crate::config::Settings;
use crate::model::ReachModel;
use crate::registry::{EclipsedBehaviour, ProcessRegistry, RegistryError};
use crate::solver::{CommandSolver, Solver, SyntheticSolver};
use crate::sources::{
    DemSource, GridDemSource, ParquetReachSource, ReachSource, RemoteGridDemSource, ReqwestFetch,
};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Minimum discharge ever written to a flow file.
pub const MIN_FLOW: f64 = 1.0;

/// Stage failure, classified by the error taxonomy served to callers.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("reach submodel is busy: {0}")]
    ReachBusy(String),

    #[error("solver crashed: {0}")]
    SolverCrash(String),

    #[error("terrain out of bounds: {0}")]
    TerrainOutOfBounds(String),

    #[error("diverging network: {0}")]
    DivergingNetwork(String),

    #[error("unsteady flow unsupported: {0}")]
    UnsteadyFlowUnsupported(String),

    #[error("no valid plan: {0}")]
    NoValidPlan(String),

    #[error("not a source model: {0}")]
    NotASourceModel(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::Precondition(_) => "Precondition",
            Self::ReachBusy(_) => "ReachBusy",
            Self::SolverCrash(_) => "SolverCrash",
            Self::TerrainOutOfBounds(_) => "TerrainOutOfBounds",
            Self::DivergingNetwork(_) => "DivergingNetwork",
            Self::UnsteadyFlowUnsupported(_) => "UnsteadyFlowUnsupported",
            Self::NoValidPlan(_) => "NoValidPlan",
            Self::NotASourceModel(_) => "NotASourceModel",
            Self::Internal(_) => "Internal",
        }
    }

    /// The error document written to the child's final stderr line.
    pub fn to_document(&self) -> Value {
        json!({
            "type": self.kind(),
            "detail": self.to_string(),
            "traceback": format!("{self:?}"),
        })
    }

    pub(crate) fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<crate::model::ModelError> for StageError {
    fn from(e: crate::model::ModelError) -> Self {
        use crate::model::ModelError;
        match e {
            ModelError::NotASourceModel(m) => Self::NotASourceModel(m),
            ModelError::NoValidPlan(m) => Self::NoValidPlan(m),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<crate::sources::SourceError> for StageError {
    fn from(e: crate::sources::SourceError) -> Self {
        use crate::sources::SourceError;
        match e {
            SourceError::OutOfBounds(m) => Self::TerrainOutOfBounds(m),
            SourceError::Divergence(m) => Self::DivergingNetwork(m),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<crate::gpkg::GpkgError> for StageError {
    fn from(e: crate::gpkg::GpkgError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<crate::ras::RasFileError> for StageError {
    fn from(e: crate::ras::RasFileError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<crate::raster::RasterError> for StageError {
    fn from(e: crate::raster::RasterError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<crate::solver::SolverError> for StageError {
    fn from(e: crate::solver::SolverError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Ambient adapters threaded through every stage.
pub struct StageContext {
    pub settings: Settings,
    solver: Arc<dyn Solver>,
    reach_source: Option<Arc<dyn ReachSource>>,
    dem_source: Option<Arc<dyn DemSource>>,
}

impl StageContext {
    /// Builds the production context from settings.
    pub fn from_settings(settings: Settings) -> Self {
        let solver: Arc<dyn Solver> = match &settings.solver_command {
            Some(command) => Arc::new(CommandSolver::new(command)),
            None => Arc::new(SyntheticSolver),
        };
        Self {
            settings,
            solver,
            reach_source: None,
            dem_source: None,
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_reach_source(mut self, source: Arc<dyn ReachSource>) -> Self {
        self.reach_source = Some(source);
        self
    }

    pub fn with_dem_source(mut self, source: Arc<dyn DemSource>) -> Self {
        self.dem_source = Some(source);
        self
    }

    pub fn solver(&self) -> &dyn Solver {
        self.solver.as_ref()
    }

    /// Reach source for a named network file, preferring an injected
    /// source.
    pub fn reach_source_for(&self, file_name: &str) -> Result<Arc<dyn ReachSource>, StageError> {
        if let Some(source) = &self.reach_source {
            return Ok(Arc::clone(source));
        }
        let path = Path::new(file_name);
        if !path.exists() {
            return Err(StageError::Precondition(format!(
                "network file not found: {file_name}"
            )));
        }
        Ok(Arc::new(ParquetReachSource::new(path)))
    }

    /// Elevation source, preferring an injected source, then the configured
    /// URL or local path.
    pub fn dem_source(&self) -> Result<Arc<dyn DemSource>, StageError> {
        if let Some(source) = &self.dem_source {
            return Ok(Arc::clone(source));
        }
        let Some(configured) = &self.settings.dem_source else {
            return Err(StageError::Precondition(
                "no elevation source configured".to_string(),
            ));
        };
        if configured.starts_with("http://") || configured.starts_with("https://") {
            let cache = self.settings.data_dir.join("dem_cache.grid");
            Ok(Arc::new(RemoteGridDemSource::new(
                configured,
                &cache,
                Box::new(ReqwestFetch),
            )))
        } else {
            Ok(Arc::new(GridDemSource::open(Path::new(configured))?))
        }
    }
}

/// Advisory lock on a reach submodel directory.
///
/// At most one job may work a submodel at a time; the loser fails
/// `ReachBusy` and retry is the caller's responsibility.
pub struct ReachLock {
    path: PathBuf,
}

impl ReachLock {
    const FILE_NAME: &'static str = ".reach.lock";

    pub fn acquire(directory: &Path) -> Result<Self, StageError> {
        std::fs::create_dir_all(directory).map_err(StageError::internal)?;
        let path = directory.join(Self::FILE_NAME);
        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // A killed job child leaves its lock file behind; a lock
                // whose owning pid is gone is stale and reclaimable.
                if Self::holder_is_dead(&path) {
                    warn!(path = %path.display(), "reclaiming stale reach lock");
                    let _ = std::fs::remove_file(&path);
                    if let Ok(lock) = Self::try_create(&path) {
                        return Ok(lock);
                    }
                }
                Err(StageError::ReachBusy(format!(
                    "another job holds {}",
                    path.display()
                )))
            }
            Err(e) => Err(StageError::internal(e)),
        }
    }

    fn try_create(path: &Path) -> Result<Self, std::io::Error> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn holder_is_dead(path: &Path) -> bool {
        let Some(pid) = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse::<i32>().ok())
        else {
            return false;
        };
        if pid == std::process::id() as i32 {
            return false;
        }
        #[cfg(unix)]
        {
            // Signal 0 probes for existence without signalling.
            unsafe { libc::kill(pid, 0) != 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl Drop for ReachLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Runs one registered process against an input document.
///
/// This is the entrypoint the stage child process calls after parsing its
/// stdin. Validation, preconditions, the reach lock, and the eclipsed
/// short-circuit all happen here before the stage function runs.
pub fn run_process(name: &str, input: &Value, ctx: &StageContext) -> Result<Value, StageError> {
    let registry = ProcessRegistry::standard();
    let descriptor = match registry.validate_submission(name, input) {
        Ok(()) => registry.get(name).expect("validated process exists"),
        Err(RegistryError::UnknownProcess(m)) => {
            return Err(StageError::InvalidInput(format!("unknown process: {m}")))
        }
        Err(RegistryError::InvalidInput(m)) => return Err(StageError::InvalidInput(m)),
    };
    descriptor
        .check_preconditions(input)
        .map_err(StageError::Precondition)?;

    // Reach-scoped stages serialize on the submodel directory.
    let submodel_dir = input
        .get("submodel_directory")
        .and_then(Value::as_str)
        .map(PathBuf::from);
    let _lock = match &submodel_dir {
        Some(dir) => Some(ReachLock::acquire(dir)?),
        None => None,
    };

    // Eclipsed handling for stages that run after extraction.
    if let Some(dir) = &submodel_dir {
        let reach_model = ReachModel::new(dir);
        if reach_model.parameters_path().exists() {
            let parameters = reach_model.read_parameters().map_err(StageError::from)?;
            if parameters.eclipsed {
                match descriptor.eclipsed {
                    EclipsedBehaviour::ShortCircuit => {
                        info!(reach = %reach_model.reach_id(), "eclipsed reach, skipping");
                        return Ok(json!({
                            "eclipsed": true,
                            "detail": format!(
                                "skipping {}; no cross sections conflated",
                                reach_model.reach_id()
                            ),
                        }));
                    }
                    EclipsedBehaviour::Reject => {
                        return Err(StageError::Precondition(format!(
                            "reach {} is eclipsed",
                            reach_model.reach_id()
                        )));
                    }
                    EclipsedBehaviour::NotApplicable => {}
                }
            }
        }
    }

    dispatch(name, input, ctx)
}

fn parse<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, StageError> {
    serde_json::from_value(value.clone()).map_err(|e| StageError::InvalidInput(e.to_string()))
}

fn dispatch(name: &str, input: &Value, ctx: &StageContext) -> Result<Value, StageError> {
    match name {
        "test" => {
            // Health-check probe. The optional sleep lets operators and
            // tests observe a running job long enough to dismiss it.
            if let Some(seconds) = input.get("sleep_seconds").and_then(Value::as_f64) {
                std::thread::sleep(std::time::Duration::from_secs_f64(seconds.clamp(0.0, 3600.0)));
            }
            info!("noop health-check process");
            Ok(json!({}))
        }
        "ras_to_gpkg" => ras_to_gpkg(parse(input)?, ctx),
        "conflate_model" => conflate_model(parse(input)?, ctx),
        "compute_conflation_metrics" => compute_conflation_metrics(parse(input)?, ctx),
        "extract_submodel" => extract_submodel(parse(input)?, ctx),
        "create_ras_terrain" => create_ras_terrain(parse(input)?, ctx),
        "create_model_run_normal_depth" => create_model_run_normal_depth(parse(input)?, ctx),
        "run_incremental_normal_depth" => run_incremental_normal_depth(parse(input)?, ctx),
        "run_known_wse" => run_known_wse(parse(input)?, ctx),
        "create_fim_lib" => create_fim_lib(parse(input)?, ctx),
        "create_rating_curves_db" => create_rating_curves_db(parse(input)?, ctx),
        other => {
            warn!("process {other} validated but has no handler");
            Err(StageError::Internal(format!("no handler for {other}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reach_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let first = ReachLock::acquire(dir.path()).unwrap();
        let second = ReachLock::acquire(dir.path());
        assert!(matches!(second, Err(StageError::ReachBusy(_))));
        drop(first);
        // Released on drop.
        assert!(ReachLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_unknown_process_is_invalid_input() {
        let ctx = StageContext::from_settings(Settings::default());
        let err = run_process("warp_spacetime", &json!({}), &ctx).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn test_test_process_returns_empty_document() {
        let ctx = StageContext::from_settings(Settings::default());
        let result = run_process("test", &json!({}), &ctx).unwrap();
        assert_eq!(result, json!({}));
    }

    #[test]
    fn test_error_document_shape() {
        let error = StageError::SolverCrash("exit 2".to_string());
        let document = error.to_document();
        assert_eq!(document["type"], "SolverCrash");
        assert!(document["detail"].as_str().unwrap().contains("exit 2"));
        assert!(document["traceback"].is_string());
    }
}
