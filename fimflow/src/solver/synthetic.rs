//! Deterministic stand-in solver.
//!
//! Synthesizes physically-plausible steady-state results from the submodel
//! geometry: depth grows as a power law of discharge, known-WSE boundaries
//! pool water to the imposed elevation, and depth grids are derived from
//! the terrain bundle by interpolating the water surface along the
//! centerline. Used by the test suite and by installs with no external
//! solver configured.

use super::{results_path_for_plan, ProfileRecord, Solver, SolverError, SolverOutcome, SolverResults};
use crate::gpkg::GeoPackage;
use crate::model::layers::{read_cross_sections, read_rivers, XsFeature};
use crate::model::ReachModel;
use crate::ras::{BoundaryCondition, FlowFile, PlanFile};
use crate::raster::RasterTile;
use std::path::Path;

/// Depth = COEFFICIENT * Q^EXPONENT, a Manning-shaped stage response.
const DEPTH_COEFFICIENT: f64 = 0.35;
const DEPTH_EXPONENT: f64 = 0.4;

pub struct SyntheticSolver;

impl SyntheticSolver {
    /// Normal depth for a discharge.
    pub fn normal_depth(discharge: f64) -> f64 {
        DEPTH_COEFFICIENT * discharge.max(0.0).powf(DEPTH_EXPONENT)
    }

    fn record(
        xs: &XsFeature,
        profile: &str,
        discharge: f64,
        wse: f64,
    ) -> ProfileRecord {
        let depth = (wse - xs.thalweg).max(0.01);
        let width = xs.geometry.length().max(1.0);
        ProfileRecord {
            profile: profile.to_string(),
            discharge,
            river: xs.river.clone(),
            reach: xs.reach.clone(),
            station: xs.river_station,
            water_surface_elevation: wse,
            velocity: discharge / (depth * width * 0.6),
        }
    }
}

impl Solver for SyntheticSolver {
    fn run(&self, plan_path: &Path) -> Result<SolverOutcome, SolverError> {
        let directory = plan_path
            .parent()
            .ok_or_else(|| SolverError::Model("plan path has no parent".into()))?;
        let reach_model = ReachModel::new(directory);
        let results_path = results_path_for_plan(plan_path).ok_or_else(|| {
            SolverError::Model(format!("not a plan path: {}", plan_path.display()))
        })?;

        let plan = PlanFile::read(plan_path).map_err(|e| SolverError::Model(e.to_string()))?;
        let flow_path = directory.join(format!(
            "{}.{}",
            reach_model.reach_id(),
            plan.flow_extension
        ));
        let flow = FlowFile::read(&flow_path).map_err(|e| SolverError::Model(e.to_string()))?;

        let gpkg = GeoPackage::open(&reach_model.gpkg_path())
            .map_err(|e| SolverError::Model(e.to_string()))?;
        let sections = read_cross_sections(&gpkg).map_err(|e| SolverError::Model(e.to_string()))?;
        if sections.is_empty() {
            return Err(SolverError::Model("submodel has no cross sections".into()));
        }

        let mut results = SolverResults {
            plan_title: plan.title.clone(),
            records: Vec::new(),
        };
        for profile in &flow.profiles {
            for xs in &sections {
                let normal_wse = xs.thalweg + Self::normal_depth(profile.discharge);
                let wse = match profile.boundary {
                    BoundaryCondition::NormalDepth { .. } => normal_wse,
                    // An imposed downstream surface pools upstream until the
                    // normal-depth surface takes over.
                    BoundaryCondition::KnownWse { elevation } => normal_wse.max(elevation),
                };
                results
                    .records
                    .push(Self::record(xs, &profile.name, profile.discharge, wse));
            }
        }
        results.write(&results_path)?;

        if plan.write_depth_grids {
            write_depth_grids(&reach_model, &plan, &results, &sections)?;
        }

        Ok(SolverOutcome {
            exit_code: 0,
            results_path,
        })
    }
}

/// Writes one raw depth grid per profile under `grids/<suffix>/`.
fn write_depth_grids(
    reach_model: &ReachModel,
    plan: &PlanFile,
    results: &SolverResults,
    sections: &[XsFeature],
) -> Result<(), SolverError> {
    let terrain_path = reach_model.terrain_path();
    if !terrain_path.exists() {
        return Err(SolverError::Model(format!(
            "terrain bundle missing: {}",
            terrain_path.display()
        )));
    }
    let terrain =
        RasterTile::read_grid(&terrain_path).map_err(|e| SolverError::Model(e.to_string()))?;

    let gpkg = GeoPackage::open(&reach_model.gpkg_path())
        .map_err(|e| SolverError::Model(e.to_string()))?;
    let rivers = read_rivers(&gpkg).map_err(|e| SolverError::Model(e.to_string()))?;
    let centerline = rivers
        .first()
        .map(|r| r.geometry.clone())
        .ok_or_else(|| SolverError::Model("submodel has no centerline".into()))?;

    // Station of each cross section along the centerline.
    let mut xs_stations: Vec<(f64, f64)> = Vec::new(); // (centerline station, river station)
    for xs in sections {
        let anchor = xs
            .geometry
            .intersection(&centerline)
            .or_else(|| xs.geometry.interpolate(xs.geometry.length() / 2.0));
        if let Some(point) = anchor {
            xs_stations.push((centerline.project(point), xs.river_station));
        }
    }

    let grids_dir = reach_model.grids_directory(&plan.short_id);
    let mut profiles: Vec<&str> = results
        .records
        .iter()
        .map(|r| r.profile.as_str())
        .collect();
    profiles.dedup();

    for profile in profiles {
        // Water surface keyed by centerline station for this profile.
        let mut surface: Vec<(f64, f64)> = Vec::new();
        for (centerline_station, river_station) in &xs_stations {
            if let Some(record) = results
                .records
                .iter()
                .find(|r| r.profile == profile && (r.station - river_station).abs() < 1e-6)
            {
                surface.push((*centerline_station, record.water_surface_elevation));
            }
        }
        surface.sort_by(|a, b| a.0.total_cmp(&b.0));
        if surface.is_empty() {
            continue;
        }

        let mut depth = terrain.clone();
        for row in 0..depth.rows {
            for col in 0..depth.cols {
                let ground = terrain.get(col, row);
                if ground == terrain.nodata {
                    depth.set(col, row, depth.nodata);
                    continue;
                }
                let station = centerline.project(terrain.cell_center(col, row));
                let wse = interpolate_surface(&surface, station);
                let d = wse - ground as f64;
                if d > 0.0 {
                    depth.set(col, row, d as f32);
                } else {
                    depth.set(col, row, depth.nodata);
                }
            }
        }
        depth.write_grid(&grids_dir.join(format!("{profile}.grid")))?;
    }
    Ok(())
}

fn interpolate_surface(surface: &[(f64, f64)], station: f64) -> f64 {
    match surface {
        [] => f64::NEG_INFINITY,
        [only] => only.1,
        _ => {
            let first = surface[0];
            let last = surface[surface.len() - 1];
            if station <= first.0 {
                return first.1;
            }
            if station >= last.0 {
                return last.1;
            }
            for pair in surface.windows(2) {
                if station >= pair[0].0 && station <= pair[1].0 {
                    let span = pair[1].0 - pair[0].0;
                    if span < 1e-12 {
                        return pair[1].1;
                    }
                    let t = (station - pair[0].0) / span;
                    return pair[0].1 + t * (pair[1].1 - pair[0].1);
                }
            }
            last.1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_depth_is_monotone() {
        let d100 = SyntheticSolver::normal_depth(100.0);
        let d1000 = SyntheticSolver::normal_depth(1000.0);
        assert!(d100 > 0.0);
        assert!(d1000 > d100);
    }

    #[test]
    fn test_surface_interpolation() {
        let surface = vec![(0.0, 162.0), (100.0, 160.0)];
        assert_eq!(interpolate_surface(&surface, -10.0), 162.0);
        assert_eq!(interpolate_surface(&surface, 50.0), 161.0);
        assert_eq!(interpolate_surface(&surface, 500.0), 160.0);
    }
}
