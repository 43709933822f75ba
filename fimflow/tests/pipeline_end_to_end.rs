//! End-to-end pipeline scenarios driven through the process dispatcher,
//! exactly as a job child process would run them.

use fimflow::config::Settings;
use fimflow::gpkg::GeoPackage;
use fimflow::model::layers::read_cross_sections;
use fimflow::model::ReachModel;
use fimflow::pipeline::{run_process, ReachLock, StageContext};
use fimflow::ras::FlowFile;
use fimflow::solver::{Solver, SolverError, SolverOutcome, SyntheticSolver};
use fimflow::testutil;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts solver invocations while delegating to the synthetic solver.
struct CountingSolver {
    inner: SyntheticSolver,
    calls: AtomicUsize,
}

impl CountingSolver {
    fn new() -> Self {
        Self {
            inner: SyntheticSolver,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Solver for CountingSolver {
    fn run(&self, plan_path: &Path) -> Result<SolverOutcome, SolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(plan_path)
    }
}

fn context(solver: Arc<CountingSolver>) -> StageContext {
    StageContext::from_settings(Settings::default())
        .with_solver(solver)
        .with_reach_source(Arc::new(testutil::network_source()))
        .with_dem_source(Arc::new(testutil::plane_dem()))
}

#[test]
fn test_full_pipeline_through_dispatcher() {
    let dir = tempfile::tempdir().unwrap();
    let source_dir = dir.path().join("source");
    let submodel_dir = dir.path().join("submodels").join("2823932");
    testutil::write_source_model(&source_dir, "muddy");
    let solver = Arc::new(CountingSolver::new());
    let ctx = context(Arc::clone(&solver));

    // Stage 1: geopackage extraction.
    run_process(
        "ras_to_gpkg",
        &json!({"source_model_directory": source_dir.display().to_string()}),
        &ctx,
    )
    .unwrap();

    // Stage 2: conflation over the fixture network; one reach conflates
    // with in-range coverage.
    run_process(
        "conflate_model",
        &json!({
            "source_model_directory": source_dir.display().to_string(),
            "source_network": {
                "file_name": "reference.parquet",
                "type": "nwm_hydrofabric",
            },
        }),
        &ctx,
    )
    .unwrap();
    let document =
        fimflow::model::ConflationDocument::read(&source_dir.join("muddy.conflation.json"))
            .unwrap();
    let entry = document.reach("2823932").expect("reach conflated");
    assert!(!entry.eclipsed);
    let coverage = &entry.metrics.as_ref().unwrap().coverage;
    assert!(coverage.start >= 0.0 && coverage.start <= 1.0);

    // Stage 3: metrics recompute is independently invocable.
    run_process(
        "compute_conflation_metrics",
        &json!({
            "source_model_directory": source_dir.display().to_string(),
            "source_network": {
                "file_name": "reference.parquet",
                "type": "nwm_hydrofabric",
            },
        }),
        &ctx,
    )
    .unwrap();

    // Stage 4: submodel extraction creates the reach geopackage with at
    // least two cross sections.
    run_process(
        "extract_submodel",
        &json!({
            "source_model_directory": source_dir.display().to_string(),
            "submodel_directory": submodel_dir.display().to_string(),
            "nwm_id": "2823932",
        }),
        &ctx,
    )
    .unwrap();
    let reach_model = ReachModel::new(&submodel_dir);
    let gpkg = GeoPackage::open(&reach_model.gpkg_path()).unwrap();
    assert!(read_cross_sections(&gpkg).unwrap().len() >= 2);

    // Stage 5: terrain.
    run_process(
        "create_ras_terrain",
        &json!({
            "submodel_directory": submodel_dir.display().to_string(),
            "resolution": 5.0,
            "resolution_units": "Meters",
        }),
        &ctx,
    )
    .unwrap();
    assert!(reach_model.terrain_path().exists());

    // Stage 6: initial normal depth writes exactly the requested profile
    // count and invokes the solver exactly once.
    let calls_before = solver.calls();
    run_process(
        "create_model_run_normal_depth",
        &json!({
            "submodel_directory": submodel_dir.display().to_string(),
            "num_of_discharges_for_initial_normal_depth_runs": 50,
        }),
        &ctx,
    )
    .unwrap();
    assert_eq!(solver.calls(), calls_before + 1);
    let (number, _) = reach_model.find_plan("ind").unwrap();
    let flow = FlowFile::read(&reach_model.flow_path(number)).unwrap();
    assert_eq!(flow.profiles.len(), 50);

    // Stage 7: incremental normal depth with depth grids.
    run_process(
        "run_incremental_normal_depth",
        &json!({
            "submodel_directory": submodel_dir.display().to_string(),
            "depth_increment": 0.5,
            "write_depth_grids": true,
        }),
        &ctx,
    )
    .unwrap();
    assert!(reach_model.grids_directory("nd").exists());

    // Stage 8, filtered case: boundaries entirely below every
    // normal-depth surface survive nowhere and the job still succeeds.
    let result = run_process(
        "run_known_wse",
        &json!({
            "submodel_directory": submodel_dir.display().to_string(),
            "min_elevation": 100.0,
            "max_elevation": 102.0,
            "depth_increment": 1.0,
            "write_depth_grids": false,
        }),
        &ctx,
    )
    .unwrap();
    assert_eq!(result["filtered_out"], result["total"]);

    // Stage 8, controlling case.
    run_process(
        "run_known_wse",
        &json!({
            "submodel_directory": submodel_dir.display().to_string(),
            "min_elevation": 156.0,
            "max_elevation": 162.0,
            "depth_increment": 2.0,
            "write_depth_grids": true,
        }),
        &ctx,
    )
    .unwrap();

    // Stage 9: library and rating curves, idempotent on re-invocation.
    run_process(
        "create_fim_lib",
        &json!({
            "submodel_directory": submodel_dir.display().to_string(),
            "plans": ["nd", "kwse"],
            "cleanup": false,
        }),
        &ctx,
    )
    .unwrap();
    let rating_input = json!({
        "submodel_directory": submodel_dir.display().to_string(),
        "plans": ["nd", "kwse"],
    });
    run_process("create_rating_curves_db", &rating_input, &ctx).unwrap();
    let first =
        fimflow::pipeline::rating_rows(&reach_model.rating_db_path(), "rating_curves").unwrap();
    run_process("create_rating_curves_db", &rating_input, &ctx).unwrap();
    let second =
        fimflow::pipeline::rating_rows(&reach_model.rating_db_path(), "rating_curves").unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);

    // Depth-grid bookkeeping: the library holds normal-depth and
    // known-boundary grids.
    let names: Vec<String> = std::fs::read_dir(reach_model.fim_directory())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert!(names.iter().any(|n| n.ends_with("-nd.tif")));
    assert!(names.iter().any(|n| !n.ends_with("-nd.tif")));
}

#[test]
fn test_reach_lock_surfaces_as_reach_busy() {
    let dir = tempfile::tempdir().unwrap();
    let submodel_dir = dir.path().join("2823932");
    std::fs::create_dir_all(&submodel_dir).unwrap();
    let _held = ReachLock::acquire(&submodel_dir).unwrap();

    let ctx = context(Arc::new(CountingSolver::new()));
    let err = run_process(
        "create_ras_terrain",
        &json!({"submodel_directory": submodel_dir.display().to_string()}),
        &ctx,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "ReachBusy");
}

#[test]
fn test_eclipsed_reach_short_circuits_runs() {
    let dir = tempfile::tempdir().unwrap();
    let submodel_dir = dir.path().join("777");
    let reach_model = ReachModel::new(&submodel_dir);
    reach_model
        .write_parameters(&fimflow::model::ReachParameters {
            reach_id: "777".to_string(),
            eclipsed: true,
            low_flow: 10.0,
            high_flow: 100.0,
            network_to_id: None,
            crs: 5070,
            source_model: String::new(),
            notes: vec![],
            version: fimflow::VERSION.to_string(),
        })
        .unwrap();
    // The geopackage precondition needs a file on disk even for the
    // short-circuit path.
    GeoPackage::create(&reach_model.gpkg_path(), 5070).unwrap();

    let ctx = context(Arc::new(CountingSolver::new()));
    let result = run_process(
        "create_model_run_normal_depth",
        &json!({"submodel_directory": submodel_dir.display().to_string()}),
        &ctx,
    )
    .unwrap();
    assert_eq!(result["eclipsed"], true);

    // Stages that cannot run on eclipsed reaches fail their precondition.
    let err = run_process(
        "create_ras_terrain",
        &json!({"submodel_directory": submodel_dir.display().to_string()}),
        &ctx,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "Precondition");
}

#[test]
fn test_stage_reruns_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let source_dir = dir.path().join("source");
    testutil::write_source_model(&source_dir, "muddy");
    let ctx = context(Arc::new(CountingSolver::new()));

    let input = json!({"source_model_directory": source_dir.display().to_string()});
    let first = run_process("ras_to_gpkg", &input, &ctx).unwrap();
    let second = run_process("ras_to_gpkg", &input, &ctx).unwrap();
    assert_eq!(first, second);
}
