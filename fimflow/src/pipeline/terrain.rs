//! Terrain preparation (`create_ras_terrain`): clip the elevation source
//! to the reach footprint and score its agreement with the surveyed
//! sections.

use super::terrain_agreement::compute_agreement;
use super::{StageContext, StageError};
use crate::geometry::xs_concave_hull;
use crate::gpkg::GeoPackage;
use crate::model::layers::{read_cross_sections, read_hull};
use crate::model::ReachModel;
use crate::sources::{ResolutionUnits, METERS_PER_FOOT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

/// Buffer around the cross-section hull when clipping the DEM, in feet.
const DEM_BUFFER_FT: f64 = 1000.0;

/// Default resample resolution when none is requested.
const DEFAULT_RESOLUTION_M: f64 = 10.0;

#[derive(Debug, Deserialize)]
pub struct CreateTerrainInput {
    pub submodel_directory: String,
    #[serde(default)]
    pub resolution: Option<f64>,
    #[serde(default)]
    pub resolution_units: Option<String>,
}

/// Downloads the clipped elevation raster into the submodel's terrain
/// bundle and writes the terrain-agreement document.
pub fn create_ras_terrain(input: CreateTerrainInput, ctx: &StageContext) -> Result<Value, StageError> {
    if input.resolution.is_some() && input.resolution_units.is_none() {
        return Err(StageError::InvalidInput(
            "'resolution' provided without 'resolution_units'".to_string(),
        ));
    }
    let units = match &input.resolution_units {
        None => ResolutionUnits::Meters,
        Some(value) => ResolutionUnits::parse(value).ok_or_else(|| {
            StageError::InvalidInput(format!(
                "invalid resolution_units: {value}. expected 'Feet' or 'Meters'"
            ))
        })?,
    };
    let resolution = input.resolution.unwrap_or(DEFAULT_RESOLUTION_M);

    let reach_model = ReachModel::new(Path::new(&input.submodel_directory));
    let gpkg = GeoPackage::open(&reach_model.gpkg_path())?;
    let sections = read_cross_sections(&gpkg)?;
    let hull = read_hull(&gpkg).or_else(|| {
        let cut_lines: Vec<_> = sections.iter().map(|xs| xs.geometry.clone()).collect();
        xs_concave_hull(&cut_lines, &[])
    });
    let Some(hull) = hull else {
        return Err(StageError::Precondition(
            "submodel has no cross-section hull".to_string(),
        ));
    };

    let footprint = hull.bbox().buffered(DEM_BUFFER_FT * METERS_PER_FOOT);
    let dem = ctx.dem_source()?;
    let tile = dem.read(&footprint, resolution, units)?;
    if tile.valid_cells() == 0 {
        return Err(StageError::TerrainOutOfBounds(
            "downloaded terrain holds no data over the reach footprint".to_string(),
        ));
    }

    let terrain_path = reach_model.terrain_path();
    tile.write_grid(&terrain_path)?;

    let agreement = compute_agreement(&sections, &tile);
    let agreement_path = reach_model.terrain_agreement_path();
    let text = serde_json::to_string_pretty(&agreement).map_err(StageError::internal)?;
    std::fs::write(&agreement_path, text).map_err(StageError::internal)?;

    info!(
        reach = %reach_model.reach_id(),
        cells = tile.valid_cells(),
        "terrain bundle written"
    );
    Ok(json!({
        "terrain_path": terrain_path.display().to_string(),
        "terrain_agreement": agreement_path.display().to_string(),
        "resolution": resolution,
        "summary": serde_json::to_value(&agreement.summary).map_err(StageError::internal)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::raster::RasterTile;
    use crate::testutil;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn prepared_submodel(dir: &Path) -> ReachModel {
        let source_dir = dir.join("source");
        let submodel_dir = dir.join("sub").join("2823932");
        testutil::write_source_model(&source_dir, "muddy");
        let ctx = StageContext::from_settings(Settings::default())
            .with_reach_source(Arc::new(testutil::network_source()));
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
        ReachModel::new(&submodel_dir)
    }

    #[test]
    fn test_terrain_written_with_agreement() {
        let dir = tempdir().unwrap();
        let reach_model = prepared_submodel(dir.path());
        let ctx = StageContext::from_settings(Settings::default())
            .with_dem_source(Arc::new(testutil::plane_dem()));
        let result = create_ras_terrain(
            CreateTerrainInput {
                submodel_directory: reach_model.directory().display().to_string(),
                resolution: Some(5.0),
                resolution_units: Some("Meters".to_string()),
            },
            &ctx,
        )
        .unwrap();

        assert!(reach_model.terrain_path().exists());
        assert!(reach_model.terrain_agreement_path().exists());
        let tile = RasterTile::read_grid(&reach_model.terrain_path()).unwrap();
        assert!(tile.valid_cells() > 0);
        // The fixture DEM is the exact surveyed surface; correlation is
        // near-perfect.
        let correlation = result["summary"]["correlation"].as_f64().unwrap();
        assert!(correlation > 0.9, "correlation was {correlation}");
    }

    #[test]
    fn test_resolution_without_units_rejected() {
        let ctx = StageContext::from_settings(Settings::default());
        let err = create_ras_terrain(
            CreateTerrainInput {
                submodel_directory: "/tmp/none".to_string(),
                resolution: Some(5.0),
                resolution_units: None,
            },
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
