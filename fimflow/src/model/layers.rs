//! Typed views over geopackage feature layers.
//!
//! Layer names and attribute keys are part of the on-disk contract:
//! `XS`, `River`, `Structure`, `Junction`, `XS_concave_hull`, and the
//! non-spatial `metadata` table.

use super::ModelError;
use crate::geometry::{LineString, Point, Polygon};
use crate::gpkg::{Feature, GeoPackage, Geometry};
use serde_json::json;

pub const LAYER_XS: &str = "XS";
pub const LAYER_RIVER: &str = "River";
pub const LAYER_STRUCTURE: &str = "Structure";
pub const LAYER_JUNCTION: &str = "Junction";
pub const LAYER_XS_HULL: &str = "XS_concave_hull";

/// A cross-section feature.
#[derive(Debug, Clone)]
pub struct XsFeature {
    pub river: String,
    pub reach: String,
    pub river_station: f64,
    pub thalweg: f64,
    pub max_elevation: f64,
    pub geometry: LineString,
    /// (station, elevation) samples across the section.
    pub station_elevation: Vec<(f64, f64)>,
    /// Source-model discharges carried for flow-bound derivation.
    pub flows: Vec<f64>,
}

impl XsFeature {
    pub fn to_feature(&self) -> Feature {
        Feature::new(Geometry::LineString(self.geometry.clone()))
            .with_attr("river", self.river.as_str())
            .with_attr("reach", self.reach.as_str())
            .with_attr("river_station", self.river_station)
            .with_attr("thalweg", self.thalweg)
            .with_attr("max_elevation", self.max_elevation)
            .with_attr(
                "station_elevation",
                serde_json::to_string(&self.station_elevation).unwrap_or_default(),
            )
            .with_attr("flows", json!(self.flows).to_string())
    }

    fn from_feature(feature: &Feature) -> Option<Self> {
        let Geometry::LineString(line) = &feature.geometry else {
            return None;
        };
        let station_elevation: Vec<(f64, f64)> = feature
            .str_attr("station_elevation")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let flows: Vec<f64> = feature
            .str_attr("flows")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        Some(Self {
            river: feature.str_attr("river")?.to_string(),
            reach: feature.str_attr("reach")?.to_string(),
            river_station: feature.f64_attr("river_station")?,
            thalweg: feature.f64_attr("thalweg")?,
            max_elevation: feature.f64_attr("max_elevation")?,
            geometry: line.clone(),
            station_elevation,
            flows,
        })
    }
}

/// A river centerline feature.
#[derive(Debug, Clone)]
pub struct RiverFeature {
    pub river: String,
    pub reach: String,
    pub geometry: LineString,
}

impl RiverFeature {
    pub fn to_feature(&self) -> Feature {
        Feature::new(Geometry::LineString(self.geometry.clone()))
            .with_attr("river", self.river.as_str())
            .with_attr("reach", self.reach.as_str())
    }
}

/// A structure feature; `kind` 6 is a lateral structure.
#[derive(Debug, Clone)]
pub struct StructureFeature {
    pub river: String,
    pub reach: String,
    pub river_station: f64,
    pub kind: i64,
    pub geometry: LineString,
}

impl StructureFeature {
    pub fn to_feature(&self) -> Feature {
        Feature::new(Geometry::LineString(self.geometry.clone()))
            .with_attr("river", self.river.as_str())
            .with_attr("reach", self.reach.as_str())
            .with_attr("river_station", self.river_station)
            .with_attr("type", self.kind)
    }
}

/// A junction feature.
#[derive(Debug, Clone)]
pub struct JunctionFeature {
    pub name: String,
    pub location: Point,
    pub us_rivers: String,
    pub us_reaches: String,
    pub ds_river: String,
    pub ds_reach: String,
}

impl JunctionFeature {
    pub fn to_feature(&self) -> Feature {
        Feature::new(Geometry::Point(self.location))
            .with_attr("name", self.name.as_str())
            .with_attr("us_rivers", self.us_rivers.as_str())
            .with_attr("us_reaches", self.us_reaches.as_str())
            .with_attr("ds_rivers", self.ds_river.as_str())
            .with_attr("ds_reaches", self.ds_reach.as_str())
    }
}

/// Reads the `XS` layer sorted by descending river station (upstream
/// first).
pub fn read_cross_sections(gpkg: &GeoPackage) -> Result<Vec<XsFeature>, ModelError> {
    let features = gpkg
        .read_layer(LAYER_XS)
        .map_err(|e| ModelError::Document {
            path: LAYER_XS.to_string(),
            message: e.to_string(),
        })?;
    let mut sections: Vec<XsFeature> = features
        .iter()
        .filter_map(XsFeature::from_feature)
        .collect();
    sections.sort_by(|a, b| b.river_station.total_cmp(&a.river_station));
    Ok(sections)
}

/// Reads the `River` layer.
pub fn read_rivers(gpkg: &GeoPackage) -> Result<Vec<RiverFeature>, ModelError> {
    let features = gpkg
        .read_layer(LAYER_RIVER)
        .map_err(|e| ModelError::Document {
            path: LAYER_RIVER.to_string(),
            message: e.to_string(),
        })?;
    Ok(features
        .iter()
        .filter_map(|f| {
            let Geometry::LineString(line) = &f.geometry else {
                return None;
            };
            Some(RiverFeature {
                river: f.str_attr("river")?.to_string(),
                reach: f.str_attr("reach")?.to_string(),
                geometry: line.clone(),
            })
        })
        .collect())
}

/// Reads the junction layer; absent layer is an empty list.
pub fn read_junctions(gpkg: &GeoPackage) -> Vec<JunctionFeature> {
    let Ok(features) = gpkg.read_layer(LAYER_JUNCTION) else {
        return Vec::new();
    };
    features
        .iter()
        .filter_map(|f| {
            let Geometry::Point(location) = f.geometry else {
                return None;
            };
            Some(JunctionFeature {
                name: f.str_attr("name")?.to_string(),
                location,
                us_rivers: f.str_attr("us_rivers")?.to_string(),
                us_reaches: f.str_attr("us_reaches")?.to_string(),
                ds_river: f.str_attr("ds_rivers")?.to_string(),
                ds_reach: f.str_attr("ds_reaches")?.to_string(),
            })
        })
        .collect()
}

/// Reads the concave hull layer.
pub fn read_hull(gpkg: &GeoPackage) -> Option<Polygon> {
    let features = gpkg.read_layer(LAYER_XS_HULL).ok()?;
    features.into_iter().find_map(|f| match f.geometry {
        Geometry::Polygon(p) => Some(p),
        _ => None,
    })
}
