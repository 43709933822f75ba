//! Geopackage extraction (`ras_to_gpkg`): source text files → geopackage.

use super::{StageContext, StageError};
use crate::geometry::xs_concave_hull;
use crate::gpkg::{Feature, GeoPackage, Geometry};
use crate::model::layers::{
    JunctionFeature, RiverFeature, StructureFeature, XsFeature, LAYER_JUNCTION, LAYER_RIVER,
    LAYER_STRUCTURE, LAYER_XS, LAYER_XS_HULL,
};
use crate::model::SourceModel;
use crate::ras::{FlowFile, GeometryFile, Units};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Default geopackage CRS (the hydrofabric projection).
pub const DEFAULT_CRS: i32 = 5070;

/// Lateral structures are unsupported and dropped during extraction.
const LATERAL_STRUCTURE: u8 = 6;

#[derive(Debug, Deserialize)]
pub struct RasToGpkgInput {
    pub source_model_directory: String,
    #[serde(default)]
    pub crs: Option<i32>,
}

/// Scans a source model, selects its primary plan, and writes the
/// geopackage: cross sections, centerlines, structures, junctions, the
/// cross-section concave hull, and a non-spatial metadata record.
pub fn ras_to_gpkg(input: RasToGpkgInput, _ctx: &StageContext) -> Result<Value, StageError> {
    let model = SourceModel::open(Path::new(&input.source_model_directory))?;
    info!(model = %model.name(), "extracting geopackage");

    let plan = model.primary_plan()?;
    if !plan.is_steady() {
        return Err(StageError::UnsteadyFlowUnsupported(format!(
            "primary plan {} references flow file {}",
            plan.title, plan.flow_extension
        )));
    }
    let geometry = GeometryFile::read(&model.file_with_extension(&plan.geom_extension))?;
    let flow = FlowFile::read(&model.file_with_extension(&plan.flow_extension))?;
    let discharges: Vec<f64> = flow.profiles.iter().map(|p| p.discharge).collect();

    let crs = input.crs.unwrap_or(DEFAULT_CRS);
    let gpkg = GeoPackage::create(&model.gpkg_path(), crs)?;

    let mut xs_features = Vec::new();
    for xs in &geometry.cross_sections {
        xs_features.push(
            XsFeature {
                river: xs.river.clone(),
                reach: xs.reach.clone(),
                river_station: xs.station,
                thalweg: xs.thalweg(),
                max_elevation: xs.max_elevation(),
                geometry: xs.cut_line.clone(),
                station_elevation: xs.station_elevation.clone(),
                flows: discharges.clone(),
            }
            .to_feature(),
        );
    }
    gpkg.write_layer(LAYER_XS, &xs_features)?;

    let river_features: Vec<Feature> = geometry
        .reaches
        .iter()
        .map(|r| {
            RiverFeature {
                river: r.river.clone(),
                reach: r.reach.clone(),
                geometry: r.centerline.clone(),
            }
            .to_feature()
        })
        .collect();
    gpkg.write_layer(LAYER_RIVER, &river_features)?;

    let mut structure_features = Vec::new();
    for s in &geometry.structures {
        if s.kind == LATERAL_STRUCTURE {
            warn!(
                river = %s.river, station = s.station,
                "lateral structures are unsupported and will be dropped"
            );
            continue;
        }
        structure_features.push(
            StructureFeature {
                river: s.river.clone(),
                reach: s.reach.clone(),
                river_station: s.station,
                kind: s.kind as i64,
                geometry: s.cut_line.clone(),
            }
            .to_feature(),
        );
    }
    if !structure_features.is_empty() {
        gpkg.write_layer(LAYER_STRUCTURE, &structure_features)?;
    }

    if !geometry.junctions.is_empty() {
        let junction_features: Vec<Feature> = geometry
            .junctions
            .iter()
            .map(|j| {
                JunctionFeature {
                    name: j.name.clone(),
                    location: j.location,
                    us_rivers: j.us_rivers.join(","),
                    us_reaches: j.us_reaches.join(","),
                    ds_river: j.ds_river.clone(),
                    ds_reach: j.ds_reach.clone(),
                }
                .to_feature()
            })
            .collect();
        gpkg.write_layer(LAYER_JUNCTION, &junction_features)?;
    }

    // One hull per river/reach, sections ordered upstream to downstream.
    let mut hull_features = Vec::new();
    for reach_geom in &geometry.reaches {
        let mut sections: Vec<_> = geometry
            .cross_sections
            .iter()
            .filter(|xs| xs.river == reach_geom.river && xs.reach == reach_geom.reach)
            .collect();
        sections.sort_by(|a, b| b.station.total_cmp(&a.station));
        let cut_lines: Vec<_> = sections.iter().map(|xs| xs.cut_line.clone()).collect();
        if let Some(hull) = xs_concave_hull(&cut_lines, &[]) {
            hull_features.push(
                Feature::new(Geometry::Polygon(hull))
                    .with_attr("river", reach_geom.river.as_str())
                    .with_attr("reach", reach_geom.reach.as_str()),
            );
        }
    }
    gpkg.write_layer(LAYER_XS_HULL, &hull_features)?;

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "units".to_string(),
        match model.project().units {
            Units::English => "English".to_string(),
            Units::Si => "SI".to_string(),
        },
    );
    metadata.insert("title".to_string(), model.project().title.clone());
    metadata.insert("plan_title".to_string(), plan.title.clone());
    metadata.insert("geometry_title".to_string(), geometry.title.clone());
    metadata.insert("flow_title".to_string(), flow.title.clone());
    metadata.insert("version".to_string(), crate::VERSION.to_string());
    gpkg.write_metadata(&metadata)?;

    info!(model = %model.name(), sections = xs_features.len(), "geopackage written");
    Ok(json!({
        "geopackage": model.gpkg_path().display().to_string(),
        "cross_sections": xs_features.len(),
        "rivers": river_features.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::model::layers::read_cross_sections;
    use crate::testutil;
    use tempfile::tempdir;

    #[test]
    fn test_extraction_writes_all_layers() {
        let dir = tempdir().unwrap();
        testutil::write_source_model(dir.path(), "muddy");
        let ctx = StageContext::from_settings(Settings::default());
        let result = ras_to_gpkg(
            RasToGpkgInput {
                source_model_directory: dir.path().display().to_string(),
                crs: None,
            },
            &ctx,
        )
        .unwrap();
        assert!(result["cross_sections"].as_u64().unwrap() >= 2);

        let gpkg = GeoPackage::open(&dir.path().join("muddy.gpkg")).unwrap();
        let sections = read_cross_sections(&gpkg).unwrap();
        assert!(!sections.is_empty());
        assert!(!sections[0].flows.is_empty());
        assert!(gpkg.has_layer(LAYER_XS_HULL).unwrap());
        assert_eq!(gpkg.read_metadata().unwrap()["units"], "English");
    }

    #[test]
    fn test_not_a_source_model() {
        let dir = tempdir().unwrap();
        let ctx = StageContext::from_settings(Settings::default());
        let err = ras_to_gpkg(
            RasToGpkgInput {
                source_model_directory: dir.path().display().to_string(),
                crs: None,
            },
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "NotASourceModel");
    }

    #[test]
    fn test_unsteady_flow_rejected() {
        let dir = tempdir().unwrap();
        testutil::write_source_model(dir.path(), "muddy");
        // Repoint the plan at an unsteady flow file.
        let plan_path = dir.path().join("muddy.p01");
        let text = std::fs::read_to_string(&plan_path)
            .unwrap()
            .replace("Flow File=f01", "Flow File=u01");
        std::fs::write(&plan_path, text).unwrap();

        let ctx = StageContext::from_settings(Settings::default());
        let err = ras_to_gpkg(
            RasToGpkgInput {
                source_model_directory: dir.path().display().to_string(),
                crs: None,
            },
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnsteadyFlowUnsupported");
    }
}
