//! Conflation (`conflate_model`): associate source-model cross sections
//! with reference-network reaches.

use super::{conflation_metrics, StageContext, StageError};
use crate::geometry::{BBox, LineString};
use crate::gpkg::GeoPackage;
use crate::model::layers::{
    read_cross_sections, read_junctions, read_rivers, JunctionFeature, XsFeature,
};
use crate::model::{
    ConflationDocument, ReachConflation, SourceModel, SourceNetworkInfo, XsRef,
};
use crate::sources::{NetworkGraph, NetworkReach};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Buffer around the cross-section extent when querying the network.
const NETWORK_QUERY_BUFFER: f64 = 1000.0;

pub const DEFAULT_LOW_FLOW_MULTIPLIER: f64 = 0.9;
pub const DEFAULT_HIGH_FLOW_MULTIPLIER: f64 = 1.2;

#[derive(Debug, Deserialize)]
pub struct ConflateInput {
    pub source_model_directory: String,
    pub source_network: SourceNetworkInfo,
    #[serde(default)]
    pub low_flow_multiplier: Option<f64>,
    #[serde(default)]
    pub high_flow_multiplier: Option<f64>,
}

/// Produces the conflation document for a source model.
pub fn conflate_model(input: ConflateInput, ctx: &StageContext) -> Result<Value, StageError> {
    if input.source_network.network_type != "nwm_hydrofabric" {
        return Err(StageError::InvalidInput(format!(
            "source_network type must be 'nwm_hydrofabric', got '{}'",
            input.source_network.network_type
        )));
    }
    let low_multiplier = input
        .low_flow_multiplier
        .unwrap_or(DEFAULT_LOW_FLOW_MULTIPLIER);
    let high_multiplier = input
        .high_flow_multiplier
        .unwrap_or(DEFAULT_HIGH_FLOW_MULTIPLIER);

    let model = SourceModel::open(Path::new(&input.source_model_directory))?;
    let gpkg = GeoPackage::open(&model.gpkg_path())?;
    let sections = read_cross_sections(&gpkg)?;
    let rivers = read_rivers(&gpkg)?;
    let junctions = read_junctions(&gpkg);
    info!(model = %model.name(), sections = sections.len(), "conflating");

    reject_divergences(&junctions)?;

    let mut bbox = BBox::empty();
    for xs in &sections {
        bbox.expand(xs.geometry.bbox());
    }
    let source = ctx.reach_source_for(&input.source_network.file_name)?;
    let network = source.query(&bbox.buffered(NETWORK_QUERY_BUFFER))?;
    let graph = NetworkGraph::new(network.clone());

    // Walk each source river/reach to its candidate network path.
    let mut candidates: Vec<i64> = Vec::new();
    for river in &rivers {
        match candidate_path(river.geometry.clone(), &sections, &network, &graph) {
            Ok(path) => {
                for id in path {
                    if !candidates.contains(&id) {
                        candidates.push(id);
                    }
                }
            }
            Err(e) => {
                warn!(river = %river.river, reach = %river.reach, "no network path: {e}");
            }
        }
    }

    let mut document = ConflationDocument::default();
    for id in &candidates {
        let Some(reach) = graph.reach(*id) else {
            continue;
        };
        if let Some(entry) = conflate_reach(reach, &sections, &junctions, low_multiplier, high_multiplier) {
            document.reaches.insert(id.to_string(), entry);
        }
    }
    mark_eclipsed_between_links(&mut document, &graph, low_multiplier, high_multiplier);
    lock_confluences(&mut document, &graph, &sections, &junctions);

    let plan = model.primary_plan()?;
    document.metadata.source_network = SourceNetworkInfo {
        file_name: Path::new(&input.source_network.file_name)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| input.source_network.file_name.clone()),
        network_type: input.source_network.network_type.clone(),
        version: input.source_network.version.clone(),
    };
    document.metadata.source_ras_model = crate::model::SourceRasModelInfo {
        title: model.project().title.clone(),
        units: model.project().units.to_string(),
        project_file: format!("{}.prj", model.name()),
        geometry: plan.geom_extension.clone(),
        forcing: plan.flow_extension.clone(),
        plan: plan.title.clone(),
    };

    let conflation_path = model.conflation_path();
    document.write(&conflation_path)?;

    // Metrics are best-effort: a failure is logged, not fatal.
    if let Err(e) = conflation_metrics::compute_for_document(&model, &source, &mut document) {
        warn!(model = %model.name(), "conflation metrics failed: {e}");
    } else {
        document.write(&conflation_path)?;
    }

    info!(
        model = %model.name(),
        reaches = document.reaches.len(),
        conflated = document.conflated_count(),
        "conflation written"
    );
    Ok(json!({"conflation_file": conflation_path.display().to_string()}))
}

/// A divergence is an upstream river/reach feeding more than one junction.
fn reject_divergences(junctions: &[JunctionFeature]) -> Result<(), StageError> {
    let mut fed: BTreeMap<String, usize> = BTreeMap::new();
    for junction in junctions {
        for (river, reach) in junction
            .us_rivers
            .split(',')
            .zip(junction.us_reaches.split(','))
        {
            *fed.entry(format!("{river}/{reach}")).or_default() += 1;
        }
    }
    if let Some((river_reach, _)) = fed.iter().find(|(_, count)| **count > 1) {
        return Err(StageError::DivergingNetwork(format!(
            "{river_reach} flows into multiple junctions"
        )));
    }
    Ok(())
}

/// Walks the network between the reaches nearest the clipped centerline
/// endpoints.
fn candidate_path(
    centerline: LineString,
    sections: &[XsFeature],
    network: &[NetworkReach],
    graph: &NetworkGraph,
) -> Result<Vec<i64>, StageError> {
    if network.is_empty() {
        return Err(StageError::Precondition(
            "no network reaches near model".to_string(),
        ));
    }
    let stations: Vec<f64> = sections
        .iter()
        .filter_map(|xs| xs.geometry.intersection(&centerline))
        .map(|p| centerline.project(p))
        .collect();
    let clipped = centerline.clipped_to(&stations);
    let (Some(start), Some(end)) = (clipped.first(), clipped.last()) else {
        return Err(StageError::Precondition(
            "centerline does not intersect cross sections".to_string(),
        ));
    };

    let nearest = |point| {
        network
            .iter()
            .min_by(|a, b| {
                a.geometry
                    .distance_to_point(point)
                    .total_cmp(&b.geometry.distance_to_point(point))
            })
            .map(|r| r.id)
    };
    let us_most = nearest(start).expect("non-empty network");
    let ds_most = nearest(end).expect("non-empty network");
    graph
        .walk(us_most, ds_most)
        .map_err(|e| StageError::Internal(e.to_string()))
}

/// Builds the conflation entry for one network reach.
fn conflate_reach(
    reach: &NetworkReach,
    sections: &[XsFeature],
    junctions: &[JunctionFeature],
    low_multiplier: f64,
    high_multiplier: f64,
) -> Option<ReachConflation> {
    // Sections intersecting this reach, with their stations along it.
    let mut intersected: Vec<(&XsFeature, f64)> = sections
        .iter()
        .filter_map(|xs| {
            xs.geometry
                .intersection(&reach.geometry)
                .map(|p| (xs, reach.geometry.project(p)))
        })
        .collect();
    if intersected.is_empty() {
        return None;
    }
    intersected.sort_by(|a, b| a.1.total_cmp(&b.1));

    // Upstream selection: the section intersecting closest to the reach's
    // upstream end.
    let us = intersected.first()?.0;
    // Downstream selection: the section immediately downstream of the last
    // intersected one, crossing a junction when the group ends.
    let last = intersected.last()?.0;
    let ds = next_downstream(last, sections, junctions).unwrap_or(last);

    let eclipsed = us.river == ds.river && us.reach == ds.reach && us.river_station == ds.river_station;
    Some(ReachConflation {
        us_xs: Some(xs_ref(us)),
        ds_xs: Some(xs_ref(ds)),
        eclipsed,
        low_flow: low_multiplier * reach.high_flow_threshold,
        high_flow: high_multiplier * reach.hundred_year_flow,
        network_to_id: reach.to_id.map(|id| id.to_string()),
        metrics: None,
        overlapped_reaches: Vec::new(),
        eclipsed_reaches: Vec::new(),
    })
}

/// The section immediately downstream of `xs` in the source ordering,
/// extending one section past a junction when the group ends.
fn next_downstream<'a>(
    xs: &'a XsFeature,
    sections: &'a [XsFeature],
    junctions: &[JunctionFeature],
) -> Option<&'a XsFeature> {
    let mut group: Vec<&XsFeature> = sections
        .iter()
        .filter(|s| s.river == xs.river && s.reach == xs.reach)
        .collect();
    group.sort_by(|a, b| b.river_station.total_cmp(&a.river_station));
    let position = group
        .iter()
        .position(|s| s.river_station == xs.river_station)?;
    if position + 1 < group.len() {
        return Some(group[position + 1]);
    }
    // End of the group: follow the junction to the downstream reach's top
    // section.
    let junction = junctions.iter().find(|j| {
        j.us_rivers
            .split(',')
            .zip(j.us_reaches.split(','))
            .any(|(river, reach)| river == xs.river && reach == xs.reach)
    })?;
    sections
        .iter()
        .filter(|s| s.river == junction.ds_river && s.reach == junction.ds_reach)
        .max_by(|a, b| a.river_station.total_cmp(&b.river_station))
}

fn xs_ref(xs: &XsFeature) -> XsRef {
    XsRef {
        river: xs.river.clone(),
        reach: xs.reach.clone(),
        xs_id: format!("{}", xs.river_station),
        min_elevation: xs.thalweg,
        max_elevation: xs.max_elevation,
    }
}

/// Marks reaches bracketed between linked entries as eclipsed.
///
/// Two entries are linked when one's downstream selection is the other's
/// upstream selection; every network reach walked between them that has no
/// entry of its own is eclipsed. The eclipsed entry records that shared
/// cross section as both its upstream and downstream selection — an
/// eclipsed reach is exactly one whose selections coincide.
fn mark_eclipsed_between_links(
    document: &mut ConflationDocument,
    graph: &NetworkGraph,
    low_multiplier: f64,
    high_multiplier: f64,
) {
    let ids: Vec<i64> = document
        .reaches
        .keys()
        .filter_map(|k| k.parse().ok())
        .collect();
    let mut eclipsed: Vec<(i64, ReachConflation)> = Vec::new();
    for a in &ids {
        for b in &ids {
            if a == b {
                continue;
            }
            let (Some(entry_a), Some(entry_b)) = (
                document.reaches.get(&a.to_string()),
                document.reaches.get(&b.to_string()),
            ) else {
                continue;
            };
            if entry_a.ds_xs.is_none() || entry_a.ds_xs != entry_b.us_xs {
                continue;
            }
            let shared = entry_a.ds_xs.clone();
            let Ok(path) = graph.walk(*a, *b) else {
                continue;
            };
            for id in path {
                if id != *a && id != *b && !document.reaches.contains_key(&id.to_string()) {
                    if let Some(reach) = graph.reach(id) {
                        eclipsed.push((
                            id,
                            ReachConflation {
                                us_xs: shared.clone(),
                                ds_xs: shared.clone(),
                                eclipsed: true,
                                network_to_id: reach.to_id.map(|t| t.to_string()),
                                low_flow: low_multiplier * reach.high_flow_threshold,
                                high_flow: high_multiplier * reach.hundred_year_flow,
                                ..Default::default()
                            },
                        ));
                    }
                }
            }
        }
    }
    for (id, entry) in eclipsed {
        document.reaches.insert(id.to_string(), entry);
    }
}

/// Locks tributary/outlet selections together at shared confluences.
///
/// When both children of a network reach are conflated and the source model
/// has the matching junction, the two tributaries share their downstream
/// cross section with the outlet's upstream cross section.
fn lock_confluences(
    document: &mut ConflationDocument,
    graph: &NetworkGraph,
    sections: &[XsFeature],
    junctions: &[JunctionFeature],
) {
    let ids: Vec<String> = document.reaches.keys().cloned().collect();
    for id in &ids {
        let Some(entry) = document.reaches.get(id) else {
            continue;
        };
        if entry.eclipsed {
            continue;
        }
        let Ok(numeric_id) = id.parse::<i64>() else {
            continue;
        };
        let children: Vec<String> = graph
            .children(numeric_id)
            .iter()
            .map(|c| c.to_string())
            .filter(|c| document.reaches.contains_key(c))
            .collect();
        if children.len() != 2 {
            continue;
        }
        // Find the source junction joining the two tributaries.
        let tributary_groups: Vec<(String, String)> = children
            .iter()
            .filter_map(|c| {
                document.reaches.get(c).and_then(|e| {
                    e.us_xs
                        .as_ref()
                        .map(|xs| (xs.river.clone(), xs.reach.clone()))
                })
            })
            .collect();
        if tributary_groups.len() != 2 {
            continue;
        }
        let Some(junction) = junctions.iter().find(|j| {
            tributary_groups.iter().all(|(river, reach)| {
                j.us_rivers
                    .split(',')
                    .zip(j.us_reaches.split(','))
                    .any(|(r, rch)| r == river && rch == reach)
            })
        }) else {
            continue; // hydrologically disconnected
        };
        let Some(common) = sections
            .iter()
            .filter(|s| s.river == junction.ds_river && s.reach == junction.ds_reach)
            .max_by(|a, b| a.river_station.total_cmp(&b.river_station))
            .map(xs_ref)
        else {
            continue;
        };
        if let Some(entry) = document.reaches.get_mut(id) {
            entry.us_xs = Some(common.clone());
        }
        for child in &children {
            if let Some(entry) = document.reaches.get_mut(child) {
                entry.ds_xs = Some(common.clone());
            }
        }
    }
}
