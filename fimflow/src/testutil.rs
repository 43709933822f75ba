//! Shared test fixtures: a synthetic straight-channel source model, its
//! matching reference network, and an analytic elevation surface.
//!
//! The fixture river runs north to south along `x = 50` from `y = 300` to
//! `y = 0`; river stations equal `y`. Cross sections span `x ∈ [0, 100]`
//! and carry elevations sampled from the same analytic surface the plane
//! DEM source evaluates, so terrain agreement is near-perfect by
//! construction.

#![doc(hidden)]

use crate::geometry::{LineString, Point};
use crate::ras::{
    BoundaryCondition, FlowFile, FlowProfile, GeometryFile, JunctionData, PlanFile, ProjectFile,
    ReachGeometry, Units, XsData,
};
use crate::sources::{MemoryReachSource, NetworkReach, PlaneDemSource};
use std::path::Path;

pub const FIXTURE_REACH_ID: i64 = 2823932;
pub const FIXTURE_DS_REACH_ID: i64 = 2823934;

/// Ids of the three-reach chain network over the fixture channel.
pub const CHAIN_US_REACH_ID: i64 = 201;
pub const CHAIN_ECLIPSED_REACH_ID: i64 = 202;
pub const CHAIN_DS_REACH_ID: i64 = 203;

/// Ids of the confluence network over the two-tributary model.
pub const TRIB_A_REACH_ID: i64 = 101;
pub const TRIB_B_REACH_ID: i64 = 102;
pub const OUTLET_REACH_ID: i64 = 300;

/// The analytic ground surface: a tilted valley with a parabolic channel
/// carved along `x = 50`.
pub fn fixture_elevation(x: f64, y: f64) -> f64 {
    let base = 160.0;
    let valley_slope = 0.001;
    let channel_depth = 8.0;
    let half_width = 20.0;
    let offset = (x - 50.0).abs();
    let channel = if offset < half_width {
        let t = offset / half_width;
        channel_depth * (1.0 - t * t)
    } else {
        0.0
    };
    base + valley_slope * y - channel
}

/// Elevation source matching [`fixture_elevation`].
pub fn plane_dem() -> PlaneDemSource {
    PlaneDemSource {
        base_elevation: 160.0,
        valley_slope: 0.001,
        channel_x: 50.0,
        channel_depth: 8.0,
        channel_half_width: 20.0,
    }
}

fn cross_section(station: f64) -> XsData {
    let samples: Vec<(f64, f64)> = (0..=10)
        .map(|i| {
            let x = i as f64 * 10.0;
            (x, fixture_elevation(x, station))
        })
        .collect();
    XsData {
        river: "muddy".to_string(),
        reach: "upper".to_string(),
        station,
        cut_line: LineString::new(vec![Point::new(0.0, station), Point::new(100.0, station)]),
        station_elevation: samples,
    }
}

/// Writes a complete steady-state source model under `dir`.
pub fn write_source_model(dir: &Path, name: &str) {
    std::fs::create_dir_all(dir).unwrap();

    let project = ProjectFile {
        title: name.to_string(),
        units: Units::English,
        current_plan: Some("p01".to_string()),
        plan_extensions: vec!["p01".to_string()],
    };
    project.write(&dir.join(format!("{name}.prj"))).unwrap();

    let plan = PlanFile {
        title: format!("{name} existing conditions"),
        short_id: "existing".to_string(),
        geom_extension: "g01".to_string(),
        flow_extension: "f01".to_string(),
        description: String::new(),
        has_encroachments: false,
        write_depth_grids: false,
    };
    plan.write(&dir.join(format!("{name}.p01"))).unwrap();

    let geometry = GeometryFile {
        title: format!("{name} geometry"),
        reaches: vec![ReachGeometry {
            river: "muddy".to_string(),
            reach: "upper".to_string(),
            centerline: LineString::new(vec![
                Point::new(50.0, 300.0),
                Point::new(50.0, 150.0),
                Point::new(50.0, 0.0),
            ]),
        }],
        cross_sections: vec![
            cross_section(300.0),
            cross_section(200.0),
            cross_section(100.0),
            cross_section(10.0),
        ],
        structures: vec![],
        junctions: vec![],
    };
    geometry.write(&dir.join(format!("{name}.g01"))).unwrap();

    let flow = FlowFile {
        title: format!("{name} flows"),
        description: String::new(),
        river: "muddy".to_string(),
        reach: "upper".to_string(),
        station: 300.0,
        profiles: vec![
            FlowProfile {
                name: "50yr".to_string(),
                discharge: 120.0,
                boundary: BoundaryCondition::NormalDepth { slope: 0.001 },
            },
            FlowProfile {
                name: "100yr".to_string(),
                discharge: 480.0,
                boundary: BoundaryCondition::NormalDepth { slope: 0.001 },
            },
        ],
    };
    flow.write(&dir.join(format!("{name}.f01"))).unwrap();
}

/// The reference network covering the fixture model: one reach along the
/// channel plus its downstream neighbour.
pub fn network_source() -> MemoryReachSource {
    MemoryReachSource::new(vec![
        NetworkReach {
            id: FIXTURE_REACH_ID,
            geometry: LineString::new(vec![Point::new(50.0, 295.0), Point::new(50.0, 5.0)]),
            to_id: Some(FIXTURE_DS_REACH_ID),
            high_flow_threshold: 100.0,
            hundred_year_flow: 4000.0,
        },
        NetworkReach {
            id: FIXTURE_DS_REACH_ID,
            geometry: LineString::new(vec![Point::new(50.0, 5.0), Point::new(50.0, -200.0)]),
            to_id: None,
            high_flow_threshold: 120.0,
            hundred_year_flow: 4500.0,
        },
    ])
}

/// Splits the fixture channel into a three-reach chain. The middle reach
/// spans the gap between the 200 and 100 sections, so it intersects no
/// cross section and is bracketed by its conflated neighbours.
pub fn chain_network_source() -> MemoryReachSource {
    MemoryReachSource::new(vec![
        NetworkReach {
            id: CHAIN_US_REACH_ID,
            geometry: LineString::new(vec![Point::new(50.0, 295.0), Point::new(50.0, 190.0)]),
            to_id: Some(CHAIN_ECLIPSED_REACH_ID),
            high_flow_threshold: 100.0,
            hundred_year_flow: 4000.0,
        },
        NetworkReach {
            id: CHAIN_ECLIPSED_REACH_ID,
            geometry: LineString::new(vec![Point::new(50.0, 190.0), Point::new(50.0, 110.0)]),
            to_id: Some(CHAIN_DS_REACH_ID),
            high_flow_threshold: 70.0,
            hundred_year_flow: 2800.0,
        },
        NetworkReach {
            id: CHAIN_DS_REACH_ID,
            geometry: LineString::new(vec![Point::new(50.0, 110.0), Point::new(50.0, 5.0)]),
            to_id: None,
            high_flow_threshold: 120.0,
            hundred_year_flow: 4500.0,
        },
    ])
}

/// A cross section with a simple V profile, cut from `x0` to `x1` at
/// `y = station`.
fn v_section(river: &str, reach: &str, station: f64, x0: f64, x1: f64) -> XsData {
    let width = x1 - x0;
    XsData {
        river: river.to_string(),
        reach: reach.to_string(),
        station,
        cut_line: LineString::new(vec![Point::new(x0, station), Point::new(x1, station)]),
        station_elevation: vec![
            (0.0, 170.0),
            (width * 0.25, 162.0),
            (width * 0.5, 155.0),
            (width * 0.75, 162.0),
            (width, 170.0),
        ],
    }
}

/// Writes a two-tributary source model: `muddy/upper` and `clear/trib`
/// joining at a junction into `muddy/lower`.
///
/// The extra `muddy/upper` section at station 120 sits below the tributary
/// network reach, so conflation first selects it as the tributary's
/// downstream section; confluence locking must rewrite that selection to
/// the outlet's top section (`muddy/lower` @ 80).
pub fn write_confluence_source_model(dir: &Path, name: &str) {
    std::fs::create_dir_all(dir).unwrap();

    let project = ProjectFile {
        title: name.to_string(),
        units: Units::English,
        current_plan: Some("p01".to_string()),
        plan_extensions: vec!["p01".to_string()],
    };
    project.write(&dir.join(format!("{name}.prj"))).unwrap();

    let plan = PlanFile {
        title: format!("{name} existing conditions"),
        short_id: "existing".to_string(),
        geom_extension: "g01".to_string(),
        flow_extension: "f01".to_string(),
        description: String::new(),
        has_encroachments: false,
        write_depth_grids: false,
    };
    plan.write(&dir.join(format!("{name}.p01"))).unwrap();

    let geometry = GeometryFile {
        title: format!("{name} geometry"),
        reaches: vec![
            ReachGeometry {
                river: "muddy".to_string(),
                reach: "upper".to_string(),
                centerline: LineString::new(vec![
                    Point::new(40.0, 300.0),
                    Point::new(40.0, 150.0),
                    Point::new(50.0, 100.0),
                ]),
            },
            ReachGeometry {
                river: "clear".to_string(),
                reach: "trib".to_string(),
                centerline: LineString::new(vec![
                    Point::new(120.0, 300.0),
                    Point::new(120.0, 150.0),
                    Point::new(50.0, 100.0),
                ]),
            },
            ReachGeometry {
                river: "muddy".to_string(),
                reach: "lower".to_string(),
                centerline: LineString::new(vec![
                    Point::new(50.0, 100.0),
                    Point::new(50.0, 0.0),
                ]),
            },
        ],
        cross_sections: vec![
            v_section("muddy", "upper", 300.0, 0.0, 80.0),
            v_section("muddy", "upper", 250.0, 0.0, 80.0),
            v_section("muddy", "upper", 200.0, 0.0, 80.0),
            v_section("muddy", "upper", 150.0, 0.0, 80.0),
            // Off to the side of both network tributaries.
            v_section("muddy", "upper", 120.0, 0.0, 30.0),
            v_section("clear", "trib", 300.0, 80.0, 160.0),
            v_section("clear", "trib", 250.0, 80.0, 160.0),
            v_section("clear", "trib", 200.0, 80.0, 160.0),
            v_section("clear", "trib", 150.0, 80.0, 160.0),
            v_section("muddy", "lower", 80.0, 0.0, 100.0),
            v_section("muddy", "lower", 50.0, 0.0, 100.0),
            v_section("muddy", "lower", 20.0, 0.0, 100.0),
        ],
        structures: vec![],
        junctions: vec![JunctionData {
            name: "forks".to_string(),
            location: Point::new(50.0, 100.0),
            us_rivers: vec!["muddy".to_string(), "clear".to_string()],
            us_reaches: vec!["upper".to_string(), "trib".to_string()],
            ds_river: "muddy".to_string(),
            ds_reach: "lower".to_string(),
        }],
    };
    geometry.write(&dir.join(format!("{name}.g01"))).unwrap();

    let flow = FlowFile {
        title: format!("{name} flows"),
        description: String::new(),
        river: "muddy".to_string(),
        reach: "upper".to_string(),
        station: 300.0,
        profiles: vec![
            FlowProfile {
                name: "50yr".to_string(),
                discharge: 150.0,
                boundary: BoundaryCondition::NormalDepth { slope: 0.001 },
            },
            FlowProfile {
                name: "100yr".to_string(),
                discharge: 600.0,
                boundary: BoundaryCondition::NormalDepth { slope: 0.001 },
            },
        ],
    };
    flow.write(&dir.join(format!("{name}.f01"))).unwrap();
}

/// The reference network matching [`write_confluence_source_model`]: two
/// tributaries flowing into one outlet.
pub fn confluence_network_source() -> MemoryReachSource {
    MemoryReachSource::new(vec![
        NetworkReach {
            id: TRIB_A_REACH_ID,
            geometry: LineString::new(vec![
                Point::new(40.0, 295.0),
                Point::new(40.0, 150.0),
                Point::new(50.0, 105.0),
            ]),
            to_id: Some(OUTLET_REACH_ID),
            high_flow_threshold: 80.0,
            hundred_year_flow: 3000.0,
        },
        NetworkReach {
            id: TRIB_B_REACH_ID,
            geometry: LineString::new(vec![
                Point::new(120.0, 295.0),
                Point::new(120.0, 150.0),
                Point::new(50.0, 105.0),
            ]),
            to_id: Some(OUTLET_REACH_ID),
            high_flow_threshold: 60.0,
            hundred_year_flow: 2500.0,
        },
        NetworkReach {
            id: OUTLET_REACH_ID,
            geometry: LineString::new(vec![Point::new(50.0, 105.0), Point::new(50.0, 5.0)]),
            to_id: None,
            high_flow_threshold: 150.0,
            hundred_year_flow: 5000.0,
        },
    ])
}
