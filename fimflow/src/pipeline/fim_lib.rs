//! Map library and rating-curve database (`create_fim_lib`,
//! `create_rating_curves_db`).

use super::{StageContext, StageError};
use crate::geometry::xs_concave_hull;
use crate::gpkg::GeoPackage;
use crate::model::layers::{read_cross_sections, read_hull};
use crate::model::ReachModel;
use crate::ras::{BoundaryCondition, FlowFile};
use crate::raster::RasterTile;
use crate::solver::SolverResults;
use crate::sources::{DirObjectStore, ObjectStore};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_RATING_TABLE: &str = "rating_curves";

/// Boundary label of normal-depth profiles in grid names and database rows.
const NORMAL_DEPTH_BOUNDARY: &str = "nd";

#[derive(Debug, Deserialize)]
pub struct CreateFimLibInput {
    pub submodel_directory: String,
    pub plans: Vec<String>,
    #[serde(default)]
    pub library_directory: Option<String>,
    #[serde(default)]
    pub cleanup: Option<bool>,
}

/// Clips each raw depth grid to the reach hull and writes it into the map
/// library as `<Q>-<E>.tif` (`E` = `nd` for normal-depth profiles).
///
/// With `library_directory` set, every written grid is additionally
/// exported through the object-store seam keyed by
/// `<reach>/<grid name>`.
pub fn create_fim_lib(input: CreateFimLibInput, _ctx: &StageContext) -> Result<Value, StageError> {
    let reach_model = ReachModel::new(Path::new(&input.submodel_directory));
    let cleanup = input.cleanup.unwrap_or(false);
    let destination = reach_model.fim_directory();
    let catalog: Option<DirObjectStore> = input
        .library_directory
        .as_ref()
        .map(|dir| DirObjectStore::new(Path::new(dir)));

    let gpkg = GeoPackage::open(&reach_model.gpkg_path())?;
    let hull = read_hull(&gpkg).or_else(|| {
        let sections = read_cross_sections(&gpkg).ok()?;
        let cut_lines: Vec<_> = sections.iter().map(|xs| xs.geometry.clone()).collect();
        xs_concave_hull(&cut_lines, &[])
    });
    let Some(hull) = hull else {
        return Err(StageError::Precondition(
            "submodel has no cross-section hull to clip against".to_string(),
        ));
    };

    let mut written = 0usize;
    let mut missing: Vec<String> = Vec::new();
    for suffix in &input.plans {
        let Some((_, plan)) = reach_model.find_plan(suffix) else {
            warn!(reach = %reach_model.reach_id(), suffix = %suffix, "plan not found, skipping");
            missing.push(format!("plan {suffix}"));
            continue;
        };
        let flow = FlowFile::read(
            &reach_model
                .directory()
                .join(format!("{}.{}", reach_model.reach_id(), plan.flow_extension)),
        )?;
        let grids_dir = reach_model.grids_directory(suffix);
        for profile in &flow.profiles {
            let raw_path = grids_dir.join(format!("{}.grid", profile.name));
            if !raw_path.exists() {
                warn!(
                    reach = %reach_model.reach_id(),
                    profile = %profile.name,
                    "depth grid missing, skipping"
                );
                missing.push(profile.name.clone());
                continue;
            }
            let raw = RasterTile::read_grid(&raw_path)?;
            let clipped = raw.clip_to_polygon(&hull);
            let destination_path = reach_model
                .fim_grid_path(profile.discharge, &boundary_label(&profile.boundary));
            clipped.write_geotiff(&destination_path)?;
            if let Some(catalog) = &catalog {
                let grid_name = destination_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let bytes = std::fs::read(&destination_path).map_err(StageError::internal)?;
                catalog
                    .put(&format!("{}/{grid_name}", reach_model.reach_id()), &bytes)
                    .map_err(StageError::internal)?;
            }
            written += 1;
        }
        if cleanup {
            let _ = std::fs::remove_dir_all(&grids_dir);
        }
    }

    info!(
        reach = %reach_model.reach_id(),
        written,
        missing = missing.len(),
        "map library updated"
    );
    Ok(json!({
        "fim_results_directory": destination.display().to_string(),
        "grids_written": written,
        "missing_grids": missing,
    }))
}

/// Boundary column value: the imposed elevation, or `nd` for normal-depth
/// profiles. Doubles as the `<E>` part of library grid names.
fn boundary_label(boundary: &BoundaryCondition) -> String {
    match boundary {
        BoundaryCondition::NormalDepth { .. } => NORMAL_DEPTH_BOUNDARY.to_string(),
        BoundaryCondition::KnownWse { elevation } => format!("{elevation}"),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRatingCurvesInput {
    pub submodel_directory: String,
    pub plans: Vec<String>,
    #[serde(default)]
    pub table_name: Option<String>,
}

/// Writes (or refreshes) the per-reach rating-curve database.
///
/// One row per profile: discharge, upstream and downstream stage, the
/// downstream boundary, the plan suffix, and whether the corresponding
/// library grid exists. Re-invocation replaces matching rows.
pub fn create_rating_curves_db(
    input: CreateRatingCurvesInput,
    _ctx: &StageContext,
) -> Result<Value, StageError> {
    let reach_model = ReachModel::new(Path::new(&input.submodel_directory));
    let table = input
        .table_name
        .unwrap_or_else(|| DEFAULT_RATING_TABLE.to_string());
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StageError::InvalidInput(format!(
            "table_name must be alphanumeric: {table}"
        )));
    }

    let db_path = reach_model.rating_db_path();
    let conn = Connection::open(&db_path).map_err(StageError::internal)?;
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                 reach_id TEXT NOT NULL,
                 discharge REAL NOT NULL,
                 us_wse REAL,
                 ds_wse REAL,
                 boundary TEXT NOT NULL,
                 plan_suffix TEXT NOT NULL,
                 map_exists INTEGER NOT NULL,
                 PRIMARY KEY (reach_id, discharge, boundary, plan_suffix)
             )"
        ),
        [],
    )
    .map_err(StageError::internal)?;

    let mut rows_written = 0usize;
    for suffix in &input.plans {
        let Some((number, plan)) = reach_model.find_plan(suffix) else {
            warn!(reach = %reach_model.reach_id(), suffix = %suffix, "plan not found, skipping");
            continue;
        };
        let results = SolverResults::open(&reach_model.result_path(number))
            .map_err(|e| StageError::Precondition(e.to_string()))?;
        let flow = FlowFile::read(
            &reach_model
                .directory()
                .join(format!("{}.{}", reach_model.reach_id(), plan.flow_extension)),
        )?;

        let stations: Vec<f64> = results.records.iter().map(|r| r.station).collect();
        let us_station = stations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let ds_station = stations.iter().copied().fold(f64::INFINITY, f64::min);

        for profile in &flow.profiles {
            let us_wse = results
                .records
                .iter()
                .find(|r| r.profile == profile.name && (r.station - us_station).abs() < 1e-6)
                .map(|r| r.water_surface_elevation);
            let ds_wse = results
                .records
                .iter()
                .find(|r| r.profile == profile.name && (r.station - ds_station).abs() < 1e-6)
                .map(|r| r.water_surface_elevation);
            let boundary = boundary_label(&profile.boundary);
            let map_path = reach_model
                .fim_grid_path(profile.discharge, &boundary_label(&profile.boundary));
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{table}\"
                         (reach_id, discharge, us_wse, ds_wse, boundary, plan_suffix, map_exists)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    reach_model.reach_id(),
                    profile.discharge,
                    us_wse,
                    ds_wse,
                    boundary,
                    suffix,
                    map_path.exists() as i64,
                ],
            )
            .map_err(StageError::internal)?;
            rows_written += 1;
        }
    }

    info!(
        reach = %reach_model.reach_id(),
        rows = rows_written,
        "rating-curve database updated"
    );
    Ok(json!({
        "rating_curve_database": db_path.display().to_string(),
        "rows_written": rows_written,
    }))
}

/// Test-visible row count for idempotence checks.
#[doc(hidden)]
pub fn rating_rows(db_path: &Path, table: &str) -> Result<Vec<(f64, String, String, bool)>, StageError> {
    let conn = Connection::open(db_path).map_err(StageError::internal)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT discharge, boundary, plan_suffix, map_exists FROM \"{table}\"
             ORDER BY plan_suffix, boundary, discharge"
        ))
        .map_err(StageError::internal)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)? != 0,
            ))
        })
        .map_err(StageError::internal)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StageError::internal)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testutil;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn full_pipeline(dir: &Path) -> (ReachModel, StageContext) {
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
                write_depth_grids: Some(true),
            },
            &ctx,
        )
        .unwrap();
        crate::pipeline::run_known_wse(
            crate::pipeline::kwse::KnownWseInput {
                submodel_directory: submodel_dir.display().to_string(),
                min_elevation: 155.0,
                max_elevation: 162.0,
                plan_suffix: None,
                depth_increment: Some(2.0),
                write_depth_grids: Some(true),
            },
            &ctx,
        )
        .unwrap();
        (ReachModel::new(&submodel_dir), ctx)
    }

    #[test]
    fn test_fim_lib_clips_and_names_grids() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = full_pipeline(dir.path());
        let result = create_fim_lib(
            CreateFimLibInput {
                submodel_directory: reach_model.directory().display().to_string(),
                plans: vec!["nd".to_string(), "kwse".to_string()],
                library_directory: None,
                cleanup: Some(false),
            },
            &ctx,
        )
        .unwrap();
        assert!(result["grids_written"].as_u64().unwrap() > 0);
        let fim_dir = reach_model.fim_directory();
        let entries: Vec<String> = std::fs::read_dir(&fim_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|n| n.ends_with("-nd.tif")));
        assert!(entries.iter().all(|n| n.ends_with(".tif")));
    }

    #[test]
    fn test_rating_db_rows_and_idempotence() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = full_pipeline(dir.path());
        create_fim_lib(
            CreateFimLibInput {
                submodel_directory: reach_model.directory().display().to_string(),
                plans: vec!["nd".to_string(), "kwse".to_string()],
                library_directory: None,
                cleanup: Some(false),
            },
            &ctx,
        )
        .unwrap();

        let input = || CreateRatingCurvesInput {
            submodel_directory: reach_model.directory().display().to_string(),
            plans: vec!["nd".to_string(), "kwse".to_string()],
            table_name: None,
        };
        create_rating_curves_db(input(), &ctx).unwrap();
        let first = rating_rows(&reach_model.rating_db_path(), DEFAULT_RATING_TABLE).unwrap();
        assert!(!first.is_empty());
        // Grids were written for every profile, so maps exist.
        assert!(first.iter().all(|(_, _, _, map_exists)| *map_exists));

        // Second invocation replaces rows rather than duplicating them.
        create_rating_curves_db(input(), &ctx).unwrap();
        let second = rating_rows(&reach_model.rating_db_path(), DEFAULT_RATING_TABLE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_library_export_through_object_store() {
        let dir = tempdir().unwrap();
        let (reach_model, ctx) = full_pipeline(dir.path());
        let library_dir = dir.path().join("library");
        create_fim_lib(
            CreateFimLibInput {
                submodel_directory: reach_model.directory().display().to_string(),
                plans: vec!["nd".to_string()],
                library_directory: Some(library_dir.display().to_string()),
                cleanup: Some(false),
            },
            &ctx,
        )
        .unwrap();
        // Each library grid was exported under <reach>/<name>.
        let exported = library_dir.join("2823932");
        assert!(exported.exists());
        assert!(std::fs::read_dir(&exported).unwrap().next().is_some());
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let ctx = StageContext::from_settings(Settings::default());
        let err = create_rating_curves_db(
            CreateRatingCurvesInput {
                submodel_directory: "/tmp/none".to_string(),
                plans: vec![],
                table_name: Some("rating; DROP TABLE jobs".to_string()),
            },
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
