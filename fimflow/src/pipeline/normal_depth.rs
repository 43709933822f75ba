//! Normal-depth runs: the initial rating-curve run
//! (`create_model_run_normal_depth`) and the stage-regularized re-run
//! (`run_incremental_normal_depth`).

use super::{StageContext, StageError, MIN_FLOW};
use crate::gpkg::GeoPackage;
use crate::model::layers::read_cross_sections;
use crate::model::{RatingCurve, ReachModel};
use crate::ras::{BoundaryCondition, FlowFile, FlowProfile, PlanFile, ProjectFile};
use crate::solver::SolverResults;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_INITIAL_SUFFIX: &str = "ind";
pub const DEFAULT_INCREMENTAL_SUFFIX: &str = "nd";
pub const DEFAULT_INITIAL_DISCHARGES: usize = 50;
pub const DEFAULT_DEPTH_INCREMENT: f64 = 0.5;

#[derive(Debug, Deserialize)]
pub struct InitialNormalDepthInput {
    pub submodel_directory: String,
    #[serde(default)]
    pub plan_suffix: Option<String>,
    #[serde(default)]
    pub num_of_discharges_for_initial_normal_depth_runs: Option<usize>,
}

/// Writes and computes the initial normal-depth run: `count` discharges
/// evenly spaced between the reach's flow bounds, solved with the
/// configured downstream slope boundary.
pub fn create_model_run_normal_depth(
    input: InitialNormalDepthInput,
    ctx: &StageContext,
) -> Result<Value, StageError> {
    let suffix = input
        .plan_suffix
        .unwrap_or_else(|| DEFAULT_INITIAL_SUFFIX.to_string());
    let count = input
        .num_of_discharges_for_initial_normal_depth_runs
        .unwrap_or(DEFAULT_INITIAL_DISCHARGES);

    let reach_model = ReachModel::new(Path::new(&input.submodel_directory));
    require_english_units(&reach_model)?;
    let parameters = reach_model.read_parameters()?;

    let low = parameters.low_flow.max(MIN_FLOW);
    let high = parameters.high_flow.max(low);
    let flows: Vec<f64> = (0..count)
        .map(|i| {
            let t = if count > 1 {
                i as f64 / (count - 1) as f64
            } else {
                0.0
            };
            (low + t * (high - low)).round()
        })
        .collect();

    let slope = ctx.settings.normal_depth_slope;
    let profiles: Vec<FlowProfile> = flows
        .iter()
        .enumerate()
        .map(|(i, flow)| FlowProfile {
            name: i.to_string(),
            discharge: *flow,
            boundary: BoundaryCondition::NormalDepth { slope },
        })
        .collect();
    let name_map: BTreeMap<String, String> = flows
        .iter()
        .enumerate()
        .map(|(i, flow)| (i.to_string(), format!("{flow}")))
        .collect();

    let (plan_path, results_path) = run_plan(&reach_model, &suffix, profiles, false, &name_map, ctx)?;

    info!(reach = %reach_model.reach_id(), count, "initial normal-depth run complete");
    Ok(json!({
        "plan_name": format!("{}_{}", reach_model.reach_id(), suffix),
        "river": reach_model.reach_id(),
        "reach": reach_model.reach_id(),
        "flows": flows,
        "plan": plan_path.display().to_string(),
        "results": results_path.display().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct IncrementalNormalDepthInput {
    pub submodel_directory: String,
    #[serde(default)]
    pub plan_suffix: Option<String>,
    #[serde(default)]
    pub depth_increment: Option<f64>,
    #[serde(default)]
    pub write_depth_grids: Option<bool>,
}

/// Resamples the initial rating curve to a fixed stage increment at the
/// downstream cross section and re-runs the interpolated discharges.
pub fn run_incremental_normal_depth(
    input: IncrementalNormalDepthInput,
    ctx: &StageContext,
) -> Result<Value, StageError> {
    let suffix = input
        .plan_suffix
        .unwrap_or_else(|| DEFAULT_INCREMENTAL_SUFFIX.to_string());
    let increment = input.depth_increment.unwrap_or(DEFAULT_DEPTH_INCREMENT);
    if increment <= 0.0 {
        return Err(StageError::InvalidInput(
            "depth_increment must be positive".to_string(),
        ));
    }
    let write_depth_grids = input.write_depth_grids.unwrap_or(true);

    let reach_model = ReachModel::new(Path::new(&input.submodel_directory));
    require_english_units(&reach_model)?;
    let (initial_number, _) = reach_model
        .find_plan(DEFAULT_INITIAL_SUFFIX)
        .ok_or_else(|| {
            StageError::Precondition(format!(
                "no '{DEFAULT_INITIAL_SUFFIX}' plan in {}",
                reach_model.directory().display()
            ))
        })?;
    let results = SolverResults::open(&reach_model.result_path(initial_number))
        .map_err(|e| StageError::Precondition(e.to_string()))?;

    let (ds_station, ds_thalweg) = downstream_section(&reach_model)?;
    let depth_curve = RatingCurve::from_points(
        results
            .profile_stages_at(ds_station)
            .into_iter()
            .map(|(_, discharge, wse)| (discharge, wse - ds_thalweg))
            .collect(),
    );
    if depth_curve.is_empty() {
        return Err(StageError::Precondition(
            "initial run produced no usable rating curve".to_string(),
        ));
    }

    let mut flows: Vec<f64> = depth_curve
        .discharges_for_stage_increment(increment)
        .into_iter()
        .map(|q| q.round().max(MIN_FLOW))
        .collect();
    flows.dedup();

    let slope = ctx.settings.normal_depth_slope;
    let profiles: Vec<FlowProfile> = flows
        .iter()
        .enumerate()
        .map(|(i, flow)| FlowProfile {
            name: i.to_string(),
            discharge: *flow,
            boundary: BoundaryCondition::NormalDepth { slope },
        })
        .collect();
    let name_map: BTreeMap<String, String> = flows
        .iter()
        .enumerate()
        .map(|(i, flow)| (i.to_string(), format!("{flow}")))
        .collect();

    let (plan_path, results_path) =
        run_plan(&reach_model, &suffix, profiles, write_depth_grids, &name_map, ctx)?;

    info!(
        reach = %reach_model.reach_id(),
        count = flows.len(),
        increment,
        "incremental normal-depth run complete"
    );
    Ok(json!({
        "plan_name": format!("{}_{}", reach_model.reach_id(), suffix),
        "river": reach_model.reach_id(),
        "reach": reach_model.reach_id(),
        "flows": flows,
        "plan": plan_path.display().to_string(),
        "results": results_path.display().to_string(),
    }))
}

/// Writes the plan/flow pair for a run and drives the solver.
pub(crate) fn run_plan(
    reach_model: &ReachModel,
    suffix: &str,
    profiles: Vec<FlowProfile>,
    write_depth_grids: bool,
    name_map: &BTreeMap<String, String>,
    ctx: &StageContext,
) -> Result<(PathBuf, PathBuf), StageError> {
    let (us_station, _) = upstream_section(reach_model)?;
    let number = reach_model.next_run_number();
    let description = serde_json::to_string(name_map).map_err(StageError::internal)?;

    let flow = FlowFile {
        title: format!("{}_{}", reach_model.reach_id(), suffix),
        description: description.clone(),
        river: reach_model.reach_id().to_string(),
        reach: reach_model.reach_id().to_string(),
        station: us_station,
        profiles,
    };
    flow.write(&reach_model.flow_path(number))?;

    let plan = PlanFile {
        title: format!("{}_{}", reach_model.reach_id(), suffix),
        short_id: suffix.to_string(),
        geom_extension: "gpkg".to_string(),
        flow_extension: crate::ras::numbered_extension('f', number),
        description,
        has_encroachments: false,
        write_depth_grids,
    };
    let plan_path = reach_model.plan_path(number);
    plan.write(&plan_path)?;
    register_plan(reach_model, number)?;

    let outcome = ctx
        .solver()
        .run(&plan_path)
        .map_err(|e| StageError::SolverCrash(e.to_string()))?;
    if outcome.exit_code != 0 {
        return Err(StageError::SolverCrash(format!(
            "solver exited with code {} for {}",
            outcome.exit_code,
            plan_path.display()
        )));
    }
    Ok((plan_path, outcome.results_path))
}

fn register_plan(reach_model: &ReachModel, number: u32) -> Result<(), StageError> {
    let extension = crate::ras::numbered_extension('p', number);
    let mut project = ProjectFile::read(&reach_model.project_path())?;
    if !project.plan_extensions.contains(&extension) {
        project.plan_extensions.push(extension.clone());
    }
    project.current_plan = Some(extension);
    project.write(&reach_model.project_path())?;
    Ok(())
}

fn require_english_units(reach_model: &ReachModel) -> Result<(), StageError> {
    let gpkg = GeoPackage::open(&reach_model.gpkg_path())?;
    let units = gpkg
        .read_metadata()
        .ok()
        .and_then(|m| m.get("units").cloned())
        .unwrap_or_else(|| "English".to_string());
    if units != "English" {
        return Err(StageError::Precondition(format!(
            "only English-unit source models are supported; got '{units}'"
        )));
    }
    Ok(())
}

/// (river station, thalweg) of the upstream terminus.
pub(crate) fn upstream_section(reach_model: &ReachModel) -> Result<(f64, f64), StageError> {
    section_extreme(reach_model, true)
}

/// (river station, thalweg) of the downstream terminus.
pub(crate) fn downstream_section(reach_model: &ReachModel) -> Result<(f64, f64), StageError> {
    section_extreme(reach_model, false)
}

fn section_extreme(reach_model: &ReachModel, upstream: bool) -> Result<(f64, f64), StageError> {
    let gpkg = GeoPackage::open(&reach_model.gpkg_path())?;
    let sections = read_cross_sections(&gpkg)?;
    let section = if upstream {
        sections.first()
    } else {
        sections.last()
    };
    section
        .map(|xs| (xs.river_station, xs.thalweg))
        .ok_or_else(|| StageError::Precondition("submodel has no cross sections".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testutil;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn prepared(dir: &Path) -> (ReachModel, StageContext) {
        let source_dir = dir.join("source");
        let submodel_dir = dir.join("sub").join("2823932");
        testutil::write_source_model(&source_dir, "muddy");
        let ctx = StageContext::from_settings(Settings::default())
            .with_reach_source(Arc::new(testutil::network_source()))
            .with_dem_source(Arc::new(testutil::plane_dem()));
        crate::pipeline::ras_to_gpkg(
            crate::pipeline::gpkg_extract::RasToGpkgInput {
                source_model_directory: source_dir.display().to_string(),
                crs: None,
            },
            &ctx,
        )
        .unwrap();
        crate::pipeline::conflate_model(
            crate::pipeline::conflate::ConflateInput {
                source_model_directory: source_dir.display().to_string(),
                source_network: crate::model::SourceNetworkInfo {
                    file_name: "reference.parquet".to_string(),
                    network_type: "nwm_hydrofabric".to_string(),
                    version: None,
                },
                low_flow_multiplier: None,
                high_flow_multiplier: None,
            },
            &ctx,
        )
        .unwrap();
        crate::pipeline::extract_submodel(
            crate::pipeline::submodel::ExtractSubmodelInput {
                source_model_directory: source_dir.display().to_string(),
                submodel_directory: submodel_dir.display().to_string(),
                nwm_id: "2823932".to_string(),
                ignore_source_flows: false,
                ignore_network_flows: false,
            },
            &ctx,
        )
        .unwrap();
        crate::pipeline::create_ras_terrain(
            crate::pipeline::terrain::CreateTerrainInput {
                submodel_directory: submodel_dir.display().to_string(),
                resolution: Some(5.0),
                resolution_units: Some("Meters".to_string()),
            },
            &ctx,
        )
        .unwrap();
        (ReachModel::new(&submodel_dir), ctx)
    }

    #[test]
    fn test_initial_run_writes_exact_profile_count() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = prepared(dir.path());
        create_model_run_normal_depth(
            InitialNormalDepthInput {
                submodel_directory: reach_model.directory().display().to_string(),
                plan_suffix: None,
                num_of_discharges_for_initial_normal_depth_runs: Some(50),
            },
            &ctx,
        )
        .unwrap();

        let (number, plan) = reach_model.find_plan("ind").expect("ind plan written");
        assert!(!plan.write_depth_grids);
        let flow = FlowFile::read(&reach_model.flow_path(number)).unwrap();
        assert_eq!(flow.profiles.len(), 50);
        // Every boundary is a normal-depth slope.
        assert!(flow.profiles.iter().all(|p| matches!(
            p.boundary,
            BoundaryCondition::NormalDepth { slope } if (slope - 0.001).abs() < 1e-12
        )));
        assert!(reach_model.result_path(number).exists());
    }

    #[test]
    fn test_incremental_run_resamples_curve() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = prepared(dir.path());
        create_model_run_normal_depth(
            InitialNormalDepthInput {
                submodel_directory: reach_model.directory().display().to_string(),
                plan_suffix: None,
                num_of_discharges_for_initial_normal_depth_runs: Some(20),
            },
            &ctx,
        )
        .unwrap();
        let result = run_incremental_normal_depth(
            IncrementalNormalDepthInput {
                submodel_directory: reach_model.directory().display().to_string(),
                plan_suffix: None,
                depth_increment: Some(0.5),
                write_depth_grids: Some(true),
            },
            &ctx,
        )
        .unwrap();

        let (number, plan) = reach_model.find_plan("nd").expect("nd plan written");
        assert!(plan.write_depth_grids);
        let flow = FlowFile::read(&reach_model.flow_path(number)).unwrap();
        assert!(!flow.profiles.is_empty());
        // Depth grids were produced for the nd plan.
        let grids_dir = reach_model.grids_directory("nd");
        assert!(grids_dir.exists());
        assert!(result["plan"].as_str().unwrap().ends_with(".p02"));
    }

    #[test]
    fn test_incremental_requires_initial_plan() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = prepared(dir.path());
        let err = run_incremental_normal_depth(
            IncrementalNormalDepthInput {
                submodel_directory: reach_model.directory().display().to_string(),
                plan_suffix: None,
                depth_increment: None,
                write_depth_grids: Some(false),
            },
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "Precondition");
    }
}
