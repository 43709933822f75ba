//! Submodel extraction (`extract_submodel`): carve a reach-scoped model
//! out of a conflated source model.

use super::{StageContext, StageError};
use crate::geometry::xs_concave_hull;
use crate::gpkg::{Feature, GeoPackage, Geometry};
use crate::model::layers::{
    read_cross_sections, read_rivers, RiverFeature, XsFeature, LAYER_RIVER, LAYER_XS,
    LAYER_XS_HULL,
};
use crate::model::{ConflationDocument, ReachConflation, ReachModel, ReachParameters, SourceModel};
use crate::ras::{ProjectFile, Units};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct ExtractSubmodelInput {
    pub source_model_directory: String,
    pub submodel_directory: String,
    pub nwm_id: String,
    #[serde(default)]
    pub ignore_source_flows: bool,
    #[serde(default)]
    pub ignore_network_flows: bool,
}

/// Creates the reach submodel directory: reach-scoped geopackage, project
/// file, and the reach parameter document with derived discharge bounds.
pub fn extract_submodel(input: ExtractSubmodelInput, _ctx: &StageContext) -> Result<Value, StageError> {
    let model = SourceModel::open(Path::new(&input.source_model_directory))?;
    let document = ConflationDocument::read(&model.conflation_path())?;
    let entry = document.reach(&input.nwm_id).ok_or_else(|| {
        StageError::Precondition(format!(
            "reach {} not present in {}",
            input.nwm_id,
            model.conflation_path().display()
        ))
    })?;

    let reach_model = ReachModel::new(Path::new(&input.submodel_directory));
    if entry.eclipsed {
        let detail = format!("skipping {}; no cross sections conflated", input.nwm_id);
        warn!("{detail}");
        let parameters = ReachParameters {
            reach_id: input.nwm_id.clone(),
            eclipsed: true,
            low_flow: entry.low_flow,
            high_flow: entry.high_flow,
            network_to_id: entry.network_to_id.clone(),
            crs: 0,
            source_model: input.source_model_directory.clone(),
            notes: vec![detail.clone()],
            version: crate::VERSION.to_string(),
        };
        reach_model.write_parameters(&parameters)?;
        let mut result = serde_json::to_value(&parameters).map_err(StageError::internal)?;
        result["detail"] = json!(detail);
        return Ok(result);
    }

    let source_gpkg = GeoPackage::open(&model.gpkg_path())?;
    let sections = read_cross_sections(&source_gpkg)?;
    let rivers = read_rivers(&source_gpkg)?;

    let mut subset = subset_sections(&sections, entry);
    if subset.len() < 2 {
        return Err(StageError::Precondition(format!(
            "only {} cross section(s) conflated to reach {}",
            subset.len(),
            input.nwm_id
        )));
    }
    adjust_river_stations(&mut subset);
    info!(reach = %input.nwm_id, sections = subset.len(), "extracting submodel");

    // Joined centerline across the subset's river/reach groups, clipped to
    // the cross-section extent.
    let mut centerline: Option<crate::geometry::LineString> = None;
    for river in river_groups(&subset, &rivers) {
        centerline = Some(match centerline {
            Some(line) => line.join(&river.geometry),
            None => river.geometry.clone(),
        });
    }
    let centerline = centerline.ok_or_else(|| {
        StageError::Precondition("no centerline for conflated cross sections".to_string())
    })?;
    let stations: Vec<f64> = subset
        .iter()
        .filter_map(|xs| xs.geometry.intersection(&centerline))
        .map(|p| centerline.project(p))
        .collect();
    let clipped = centerline.clipped_to(&stations);

    // Rename everything to the reach id; the submodel is a one-reach model.
    for xs in &mut subset {
        xs.river = input.nwm_id.clone();
        xs.reach = input.nwm_id.clone();
    }

    let gpkg = GeoPackage::create(&reach_model.gpkg_path(), source_gpkg.srs_id())?;
    let xs_features: Vec<Feature> = subset.iter().map(XsFeature::to_feature).collect();
    gpkg.write_layer(LAYER_XS, &xs_features)?;
    gpkg.write_layer(
        LAYER_RIVER,
        &[RiverFeature {
            river: input.nwm_id.clone(),
            reach: input.nwm_id.clone(),
            geometry: clipped,
        }
        .to_feature()],
    )?;
    let cut_lines: Vec<_> = subset.iter().map(|xs| xs.geometry.clone()).collect();
    if let Some(hull) = xs_concave_hull(&cut_lines, &[]) {
        gpkg.write_layer(LAYER_XS_HULL, &[Feature::new(Geometry::Polygon(hull))])?;
    }
    gpkg.write_metadata(&source_gpkg.read_metadata().unwrap_or_default())?;

    ProjectFile {
        title: input.nwm_id.clone(),
        units: Units::English,
        current_plan: None,
        plan_extensions: vec![],
    }
    .write(&reach_model.project_path())?;

    // Discharge bounds: network-derived bounds widened by the source-model
    // flow range, subject to the ignore toggles.
    let source_min = subset
        .iter()
        .flat_map(|xs| xs.flows.iter().copied())
        .fold(f64::INFINITY, f64::min);
    let source_max = subset
        .iter()
        .flat_map(|xs| xs.flows.iter().copied())
        .fold(f64::NEG_INFINITY, f64::max);
    let mut notes = Vec::new();
    let (low_flow, high_flow) = match (
        input.ignore_source_flows,
        input.ignore_network_flows,
        source_min.is_finite(),
    ) {
        (true, true, _) => {
            return Err(StageError::InvalidInput(
                "cannot ignore both source and network flows".to_string(),
            ))
        }
        (true, false, _) | (false, false, false) => (entry.low_flow, entry.high_flow),
        (false, true, true) => (source_min, source_max),
        (false, true, false) => {
            return Err(StageError::Precondition(
                "source model carries no flows and network flows are ignored".to_string(),
            ))
        }
        (false, false, true) => {
            let low = source_min.min(entry.low_flow);
            let high = source_max.max(entry.high_flow);
            if low == source_min {
                notes.push("low_flow computed from source model flows".to_string());
            }
            if high == source_max {
                notes.push("high_flow computed from source model flows".to_string());
            }
            (low, high)
        }
    };

    let parameters = ReachParameters {
        reach_id: input.nwm_id.clone(),
        eclipsed: false,
        low_flow,
        high_flow,
        network_to_id: entry.network_to_id.clone(),
        crs: source_gpkg.srs_id(),
        source_model: input.source_model_directory.clone(),
        notes,
        version: crate::VERSION.to_string(),
    };
    reach_model.write_parameters(&parameters)?;

    info!(reach = %input.nwm_id, "submodel written");
    serde_json::to_value(&parameters).map_err(StageError::internal)
}

/// Cross sections between a conflation entry's upstream and downstream
/// selections, ordered upstream to downstream.
pub(crate) fn subset_sections(sections: &[XsFeature], entry: &ReachConflation) -> Vec<XsFeature> {
    let (Some(us), Some(ds)) = (&entry.us_xs, &entry.ds_xs) else {
        return Vec::new();
    };
    let (Ok(us_station), Ok(ds_station)) = (us.xs_id.parse::<f64>(), ds.xs_id.parse::<f64>())
    else {
        return Vec::new();
    };

    if us.river == ds.river && us.reach == ds.reach {
        let mut subset: Vec<XsFeature> = sections
            .iter()
            .filter(|xs| {
                xs.river == us.river
                    && xs.reach == us.reach
                    && xs.river_station >= ds_station
                    && xs.river_station <= us_station
            })
            .cloned()
            .collect();
        subset.sort_by(|a, b| b.river_station.total_cmp(&a.river_station));
        return subset;
    }

    let mut upstream: Vec<XsFeature> = sections
        .iter()
        .filter(|xs| xs.river == us.river && xs.reach == us.reach && xs.river_station <= us_station)
        .cloned()
        .collect();
    upstream.sort_by(|a, b| b.river_station.total_cmp(&a.river_station));
    let mut downstream: Vec<XsFeature> = sections
        .iter()
        .filter(|xs| xs.river == ds.river && xs.reach == ds.reach && xs.river_station >= ds_station)
        .cloned()
        .collect();
    downstream.sort_by(|a, b| b.river_station.total_cmp(&a.river_station));
    upstream.extend(downstream);
    upstream
}

/// Stations must increase downstream to upstream across the whole
/// submodel; when an upstream group dips below the downstream group, its
/// stations are offset by the downstream maximum.
fn adjust_river_stations(subset: &mut [XsFeature]) {
    let Some(last) = subset.last() else { return };
    let boundary = (last.river.clone(), last.reach.clone());
    let ds_max = subset
        .iter()
        .filter(|xs| (xs.river.clone(), xs.reach.clone()) == boundary)
        .map(|xs| xs.river_station)
        .fold(f64::NEG_INFINITY, f64::max);
    let us_min = subset
        .iter()
        .filter(|xs| (xs.river.clone(), xs.reach.clone()) != boundary)
        .map(|xs| xs.river_station)
        .fold(f64::INFINITY, f64::min);
    if us_min.is_finite() && ds_max.is_finite() && us_min <= ds_max {
        for xs in subset.iter_mut() {
            if (xs.river.clone(), xs.reach.clone()) != boundary {
                xs.river_station += ds_max;
            }
        }
    }
}

fn river_groups<'a>(
    subset: &[XsFeature],
    rivers: &'a [RiverFeature],
) -> Vec<&'a RiverFeature> {
    let mut seen: Vec<(String, String)> = Vec::new();
    let mut groups = Vec::new();
    for xs in subset {
        let key = (xs.river.clone(), xs.reach.clone());
        if !seen.contains(&key) {
            seen.push(key.clone());
            if let Some(river) = rivers
                .iter()
                .find(|r| r.river == key.0 && r.reach == key.1)
            {
                groups.push(river);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::model::XsRef;
    use crate::pipeline::conflate::{conflate_model, ConflateInput};
    use crate::pipeline::gpkg_extract::{ras_to_gpkg, RasToGpkgInput};
    use crate::model::SourceNetworkInfo;
    use crate::testutil;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn xs_ref(station: &str) -> XsRef {
        XsRef {
            river: "muddy".to_string(),
            reach: "upper".to_string(),
            xs_id: station.to_string(),
            min_elevation: 150.0,
            max_elevation: 170.0,
        }
    }

    #[test]
    fn test_subset_single_reach_inclusive() {
        let dir = tempdir().unwrap();
        testutil::write_source_model(dir.path(), "muddy");
        let ctx = StageContext::from_settings(Settings::default());
        ras_to_gpkg(
            RasToGpkgInput {
                source_model_directory: dir.path().display().to_string(),
                crs: None,
            },
            &ctx,
        )
        .unwrap();
        let gpkg = GeoPackage::open(&dir.path().join("muddy.gpkg")).unwrap();
        let sections = read_cross_sections(&gpkg).unwrap();
        let entry = ReachConflation {
            us_xs: Some(xs_ref("200")),
            ds_xs: Some(xs_ref("10")),
            ..Default::default()
        };
        let subset = subset_sections(&sections, &entry);
        let stations: Vec<f64> = subset.iter().map(|xs| xs.river_station).collect();
        assert_eq!(stations, vec![200.0, 100.0, 10.0]);
    }

    #[test]
    fn test_extract_submodel_end_to_end() {
        let dir = tempdir().unwrap();
        let source_dir = dir.path().join("source");
        let submodel_dir = dir.path().join("submodels").join("2823932");
        testutil::write_source_model(&source_dir, "muddy");
        let ctx = StageContext::from_settings(Settings::default())
            .with_reach_source(Arc::new(testutil::network_source()));
        ras_to_gpkg(
            RasToGpkgInput {
                source_model_directory: source_dir.display().to_string(),
                crs: None,
            },
            &ctx,
        )
        .unwrap();
        conflate_model(
            ConflateInput {
                source_model_directory: source_dir.display().to_string(),
                source_network: SourceNetworkInfo {
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

        let result = extract_submodel(
            ExtractSubmodelInput {
                source_model_directory: source_dir.display().to_string(),
                submodel_directory: submodel_dir.display().to_string(),
                nwm_id: "2823932".to_string(),
                ignore_source_flows: false,
                ignore_network_flows: false,
            },
            &ctx,
        )
        .unwrap();

        // The submodel geopackage exists with at least two sections,
        // renamed after the reach.
        let reach_model = ReachModel::new(&submodel_dir);
        let gpkg = GeoPackage::open(&reach_model.gpkg_path()).unwrap();
        let sections = read_cross_sections(&gpkg).unwrap();
        assert!(sections.len() >= 2);
        assert!(sections.iter().all(|xs| xs.river == "2823932"));

        // Bounds widen to the source flows (fixture source min is 120,
        // network low bound is 90; source max 480 < network high 4800).
        let parameters = reach_model.read_parameters().unwrap();
        assert!((parameters.low_flow - 90.0).abs() < 1e-9);
        assert!((parameters.high_flow - 4800.0).abs() < 1e-9);
        assert_eq!(result["reach_id"], "2823932");
    }

    #[test]
    fn test_extract_unknown_reach_fails_precondition() {
        let dir = tempdir().unwrap();
        let source_dir = dir.path().join("source");
        testutil::write_source_model(&source_dir, "muddy");
        let ctx = StageContext::from_settings(Settings::default())
            .with_reach_source(Arc::new(testutil::network_source()));
        ras_to_gpkg(
            RasToGpkgInput {
                source_model_directory: source_dir.display().to_string(),
                crs: None,
            },
            &ctx,
        )
        .unwrap();
        conflate_model(
            ConflateInput {
                source_model_directory: source_dir.display().to_string(),
                source_network: SourceNetworkInfo {
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
        let err = extract_submodel(
            ExtractSubmodelInput {
                source_model_directory: source_dir.display().to_string(),
                submodel_directory: dir.path().join("sub").display().to_string(),
                nwm_id: "999".to_string(),
                ignore_source_flows: false,
                ignore_network_flows: false,
            },
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "Precondition");
    }
}
