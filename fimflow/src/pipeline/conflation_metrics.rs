//! Conflation metrics (`compute_conflation_metrics`): per-reach quality
//! statistics, recomputable without re-running conflation.

use super::submodel::subset_sections;
use super::{StageContext, StageError};
use crate::geometry::{xs_concave_hull, BBox, LineString, Point};
use crate::gpkg::GeoPackage;
use crate::model::layers::{read_cross_sections, read_rivers, XsFeature};
use crate::model::{
    ConflationDocument, CoverageMetrics, LengthMetrics, OffsetMetrics, OverlappedReach,
    ReachMetrics, SourceModel, SourceNetworkInfo,
};
use crate::sources::{ReachSource, METERS_PER_FOOT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct ConflationMetricsInput {
    pub source_model_directory: String,
    pub source_network: SourceNetworkInfo,
}

/// Recomputes per-reach metrics for an existing conflation document.
/// Idempotent: running it twice yields the same document.
pub fn compute_conflation_metrics(
    input: ConflationMetricsInput,
    ctx: &StageContext,
) -> Result<Value, StageError> {
    let model = SourceModel::open(Path::new(&input.source_model_directory))?;
    let mut document = ConflationDocument::read(&model.conflation_path())?;
    let source = ctx.reach_source_for(&input.source_network.file_name)?;
    compute_for_document(&model, &source, &mut document)?;
    document.write(&model.conflation_path())?;
    info!(model = %model.name(), "conflation metrics updated");
    Ok(json!({
        "conflation_file": model.conflation_path().display().to_string(),
    }))
}

/// Computes metrics for every non-eclipsed reach of `document` in place.
pub(crate) fn compute_for_document(
    model: &SourceModel,
    source: &Arc<dyn ReachSource>,
    document: &mut ConflationDocument,
) -> Result<(), StageError> {
    let gpkg = GeoPackage::open(&model.gpkg_path())?;
    let sections = read_cross_sections(&gpkg)?;
    let rivers = read_rivers(&gpkg)?;

    let reach_ids: Vec<String> = document.reaches.keys().cloned().collect();
    for reach_id in reach_ids {
        let entry = document.reaches.get(&reach_id).cloned();
        let Some(entry) = entry else { continue };
        if entry.eclipsed {
            continue;
        }
        let subset = subset_sections(&sections, &entry);
        if subset.len() < 2 {
            warn!(reach = %reach_id, "fewer than two sections conflated; skipping metrics");
            continue;
        }

        let mut bbox = BBox::empty();
        for xs in &subset {
            bbox.expand(xs.geometry.bbox());
        }
        let network = source.query(&bbox.buffered(1000.0))?;
        let Ok(numeric_id) = reach_id.parse::<i64>() else {
            continue;
        };
        let Some(reach) = network.iter().find(|r| r.id == numeric_id) else {
            warn!(reach = %reach_id, "reach absent from network query; skipping metrics");
            continue;
        };
        let reach_plus = match reach.to_id.and_then(|t| network.iter().find(|r| r.id == t)) {
            Some(to_reach) => reach.geometry.join(&to_reach.geometry),
            None => reach.geometry.clone(),
        };

        let centerline = rivers
            .iter()
            .find(|r| {
                subset
                    .first()
                    .map(|xs| xs.river == r.river && xs.reach == r.reach)
                    .unwrap_or(false)
            })
            .map(|r| r.geometry.clone())
            .unwrap_or_else(|| reach.geometry.clone());

        let metrics = ReachMetrics {
            xs: offset_metrics(&subset, &centerline, &reach_plus),
            lengths: length_metrics(&subset, &centerline, &reach_plus),
            coverage: coverage_metrics(&subset, &reach.geometry, &reach_plus),
        };

        let cut_lines: Vec<LineString> = subset.iter().map(|xs| xs.geometry.clone()).collect();
        let hull = xs_concave_hull(&cut_lines, &[]);
        let overlapped = hull
            .as_ref()
            .and_then(|hull| {
                reach.to_id.and_then(|t| network.iter().find(|r| r.id == t)).map(|to_reach| {
                    let overlap = hull.line_overlap_length(&to_reach.geometry);
                    if overlap > 0.0 {
                        vec![OverlappedReach {
                            id: to_reach.id.to_string(),
                            overlap: (overlap / METERS_PER_FOOT).round(),
                        }]
                    } else {
                        Vec::new()
                    }
                })
            })
            .unwrap_or_default();
        let eclipsed_neighbours = hull
            .as_ref()
            .map(|hull| {
                network
                    .iter()
                    .filter(|r| r.id != numeric_id && hull.covers_line(&r.geometry))
                    .map(|r| r.id.to_string())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(entry) = document.reaches.get_mut(&reach_id) {
            entry.metrics = Some(metrics);
            entry.overlapped_reaches = overlapped;
            entry.eclipsed_reaches = eclipsed_neighbours;
        }
    }

    document.metadata.length_units = Some("feet".to_string());
    document.metadata.flow_units = Some("cfs".to_string());
    Ok(())
}

/// Thalweg location on a cut line: the station of the lowest sample.
fn thalweg_point(xs: &XsFeature) -> Option<Point> {
    let (station, _) = xs
        .station_elevation
        .iter()
        .copied()
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    xs.geometry.interpolate(station)
}

fn offset_metrics(
    subset: &[XsFeature],
    centerline: &LineString,
    reach_plus: &LineString,
) -> OffsetMetrics {
    let mut centerline_offsets = Vec::new();
    let mut thalweg_offsets = Vec::new();
    for xs in subset {
        let Some(network_point) = xs.geometry.intersection(reach_plus) else {
            continue;
        };
        if let Some(ras_point) = xs.geometry.intersection(centerline) {
            centerline_offsets.push(ras_point.distance(network_point));
        }
        if let Some(thalweg) = thalweg_point(xs) {
            thalweg_offsets.push(thalweg.distance(network_point));
        }
    }
    OffsetMetrics {
        centerline_offset: mean_feet(&centerline_offsets),
        thalweg_offset: mean_feet(&thalweg_offsets),
    }
}

fn length_metrics(
    subset: &[XsFeature],
    centerline: &LineString,
    reach_plus: &LineString,
) -> LengthMetrics {
    let ras_stations: Vec<f64> = subset
        .iter()
        .filter_map(|xs| xs.geometry.intersection(centerline))
        .map(|p| centerline.project(p))
        .collect();
    let network_stations: Vec<f64> = subset
        .iter()
        .filter_map(|xs| xs.geometry.intersection(reach_plus))
        .map(|p| reach_plus.project(p))
        .collect();
    let span = |stations: &[f64]| -> f64 {
        match (
            stations.iter().copied().reduce(f64::min),
            stations.iter().copied().reduce(f64::max),
        ) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0.0,
        }
    };
    let ras = span(&ras_stations);
    let network = span(&network_stations);
    LengthMetrics {
        ras: (ras / METERS_PER_FOOT).round(),
        network: (network / METERS_PER_FOOT).round(),
        network_to_ras_ratio: if ras > 0.0 {
            round2(network / ras)
        } else {
            0.0
        },
    }
}

fn coverage_metrics(
    subset: &[XsFeature],
    reach: &LineString,
    reach_plus: &LineString,
) -> CoverageMetrics {
    let reach_length = reach.length().max(1e-9);
    let percents: Vec<f64> = subset
        .iter()
        .filter_map(|xs| xs.geometry.intersection(reach_plus))
        .map(|p| (reach_plus.project(p) / reach_length).clamp(0.0, 1.0))
        .collect();
    CoverageMetrics {
        start: round2(percents.iter().copied().fold(f64::INFINITY, f64::min).min(1.0)).max(0.0),
        end: round2(
            percents
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max)
                .max(0.0),
        )
        .min(1.0),
    }
}

fn mean_feet(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (mean / METERS_PER_FOOT).round()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
