//! Known water-surface-elevation runs (`run_known_wse`).
//!
//! Forms the Cartesian product of the regularized discharges and a ladder
//! of downstream boundary elevations, filters the pairs where the boundary
//! would not control, and runs the remainder. The filtering is the
//! correctness rule that keeps unconstrained conditions out of the rating
//! curves downstream.

use super::normal_depth::{downstream_section, run_plan, DEFAULT_INCREMENTAL_SUFFIX};
use super::{StageContext, StageError, MIN_FLOW};
use crate::model::ReachModel;
use crate::ras::{BoundaryCondition, FlowProfile};
use crate::solver::SolverResults;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_KWSE_SUFFIX: &str = "kwse";
pub const DEFAULT_KWSE_DEPTH_INCREMENT: f64 = 2.0;

#[derive(Debug, Deserialize)]
pub struct KnownWseInput {
    pub submodel_directory: String,
    pub min_elevation: f64,
    pub max_elevation: f64,
    #[serde(default)]
    pub plan_suffix: Option<String>,
    #[serde(default)]
    pub depth_increment: Option<f64>,
    #[serde(default)]
    pub write_depth_grids: Option<bool>,
}

pub fn run_known_wse(input: KnownWseInput, ctx: &StageContext) -> Result<Value, StageError> {
    if input.max_elevation < input.min_elevation {
        return Err(StageError::InvalidInput(format!(
            "max_elevation {} is below min_elevation {}",
            input.max_elevation, input.min_elevation
        )));
    }
    let increment = input
        .depth_increment
        .unwrap_or(DEFAULT_KWSE_DEPTH_INCREMENT);
    if increment <= 0.0 {
        return Err(StageError::InvalidInput(
            "depth_increment must be positive".to_string(),
        ));
    }
    let suffix = input
        .plan_suffix
        .unwrap_or_else(|| DEFAULT_KWSE_SUFFIX.to_string());
    let write_depth_grids = input.write_depth_grids.unwrap_or(true);

    let reach_model = ReachModel::new(Path::new(&input.submodel_directory));
    let (nd_number, _) = reach_model
        .find_plan(DEFAULT_INCREMENTAL_SUFFIX)
        .ok_or_else(|| {
            StageError::Precondition(format!(
                "no '{DEFAULT_INCREMENTAL_SUFFIX}' plan in {}",
                reach_model.directory().display()
            ))
        })?;
    let results = SolverResults::open(&reach_model.result_path(nd_number))
        .map_err(|e| StageError::Precondition(e.to_string()))?;
    let (ds_station, _) = downstream_section(&reach_model)?;
    let normal_stages = results.profile_stages_at(ds_station);
    if normal_stages.is_empty() {
        return Err(StageError::Precondition(
            "regularized run carries no downstream rating curve".to_string(),
        ));
    }

    // Boundary ladder, floored to the nearest half unit.
    let start = (input.min_elevation * 2.0).floor() / 2.0;
    let mut elevations = Vec::new();
    let mut level = start;
    while level <= input.max_elevation + 1e-9 {
        elevations.push(level);
        level += increment;
    }

    // Keep (Q, E) only where the boundary controls: E at or above the
    // normal-depth surface for Q.
    let total = elevations.len() * normal_stages.len();
    let mut profiles = Vec::new();
    for elevation in &elevations {
        for (_, discharge, normal_wse) in &normal_stages {
            if *elevation >= *normal_wse {
                profiles.push(FlowProfile {
                    name: format!("{discharge}-{elevation}"),
                    discharge: discharge.max(MIN_FLOW),
                    boundary: BoundaryCondition::KnownWse {
                        elevation: *elevation,
                    },
                });
            }
        }
    }
    let filtered_out = total - profiles.len();

    if profiles.is_empty() {
        warn!(
            reach = %reach_model.reach_id(),
            "no controlling known water-surface elevations; normal depth governs everywhere"
        );
        return Ok(json!({
            "total": total,
            "filtered_out": filtered_out,
            "detail": "no controlling known water-surface elevations were identified",
        }));
    }

    let name_map: BTreeMap<String, String> = profiles
        .iter()
        .map(|p| (p.name.clone(), p.name.clone()))
        .collect();
    let profile_count = profiles.len();
    let (plan_path, results_path) =
        run_plan(&reach_model, &suffix, profiles, write_depth_grids, &name_map, ctx)?;

    info!(
        reach = %reach_model.reach_id(),
        profiles = profile_count,
        filtered_out,
        "known water-surface-elevation run complete"
    );
    Ok(json!({
        "plan_name": format!("{}_{}", reach_model.reach_id(), suffix),
        "kwse_elevations": elevations,
        "profiles": profile_count,
        "total": total,
        "filtered_out": filtered_out,
        "plan": plan_path.display().to_string(),
        "results": results_path.display().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::ras::FlowFile;
    use crate::solver::SyntheticSolver;
    use crate::testutil;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn prepared_through_nd(dir: &Path) -> (ReachModel, StageContext) {
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
        crate::pipeline::create_model_run_normal_depth(
            crate::pipeline::normal_depth::InitialNormalDepthInput {
                submodel_directory: submodel_dir.display().to_string(),
                plan_suffix: None,
                num_of_discharges_for_initial_normal_depth_runs: Some(10),
            },
            &ctx,
        )
        .unwrap();
        crate::pipeline::run_incremental_normal_depth(
            crate::pipeline::normal_depth::IncrementalNormalDepthInput {
                submodel_directory: submodel_dir.display().to_string(),
                plan_suffix: None,
                depth_increment: Some(0.5),
                write_depth_grids: Some(false),
            },
            &ctx,
        )
        .unwrap();
        (ReachModel::new(&submodel_dir), ctx)
    }

    #[test]
    fn test_boundaries_below_normal_depth_are_filtered_out() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = prepared_through_nd(dir.path());
        // The fixture channel bottoms around 152; every normal-depth
        // surface is above 152.2, so boundaries far below never control.
        let result = run_known_wse(
            KnownWseInput {
                submodel_directory: reach_model.directory().display().to_string(),
                min_elevation: 100.0,
                max_elevation: 102.0,
                plan_suffix: None,
                depth_increment: Some(1.0),
                write_depth_grids: Some(false),
            },
            &ctx,
        )
        .unwrap();
        assert_eq!(result["filtered_out"], result["total"]);
        assert!(reach_model.find_plan("kwse").is_none());
    }

    #[test]
    fn test_surviving_pairs_respect_invariant() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = prepared_through_nd(dir.path());
        let result = run_known_wse(
            KnownWseInput {
                submodel_directory: reach_model.directory().display().to_string(),
                min_elevation: 155.0,
                max_elevation: 165.0,
                plan_suffix: None,
                depth_increment: Some(2.0),
                write_depth_grids: Some(false),
            },
            &ctx,
        )
        .unwrap();
        let (number, _) = reach_model.find_plan("kwse").expect("kwse plan written");
        let flow = FlowFile::read(&reach_model.flow_path(number)).unwrap();
        assert!(!flow.profiles.is_empty());

        // Every written boundary sits at or above the synthetic normal
        // depth surface for its discharge at the downstream section.
        let (_, ds_thalweg) = downstream_section(&reach_model).unwrap();
        for profile in &flow.profiles {
            let BoundaryCondition::KnownWse { elevation } = profile.boundary else {
                panic!("expected known-wse boundary");
            };
            let normal = ds_thalweg + SyntheticSolver::normal_depth(profile.discharge);
            assert!(
                elevation >= normal - 1e-9,
                "boundary {elevation} below normal surface {normal}"
            );
        }
        // Grid count bookkeeping: survivors + filtered = total.
        let survivors = flow.profiles.len() as u64;
        assert_eq!(
            result["total"].as_u64().unwrap(),
            survivors + result["filtered_out"].as_u64().unwrap()
        );
    }

    #[test]
    fn test_inverted_range_rejected() {
        let ctx = StageContext::from_settings(Settings::default());
        let err = run_known_wse(
            KnownWseInput {
                submodel_directory: "/tmp/none".to_string(),
                min_elevation: 170.0,
                max_elevation: 160.0,
                plan_suffix: None,
                depth_increment: None,
                write_depth_grids: None,
            },
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
