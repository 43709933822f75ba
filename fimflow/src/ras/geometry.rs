//! Geometry file (`*.gNN`): centerlines, cross sections, structures,
//! junctions.
//!
//! Coordinates are stored as whitespace-separated number runs following a
//! count header, four values to a line. Cross sections and structures share
//! the `Type RM Length L Ch R` record; type 1 is a cross section, 2–5 are
//! inline structures, 6 is a lateral structure.

use super::{key_value, RasFileError};
use crate::geometry::{LineString, Point};
use std::path::Path;

/// River centerline of one river/reach pair.
#[derive(Debug, Clone)]
pub struct ReachGeometry {
    pub river: String,
    pub reach: String,
    pub centerline: LineString,
}

/// One cross section.
#[derive(Debug, Clone)]
pub struct XsData {
    pub river: String,
    pub reach: String,
    pub station: f64,
    pub cut_line: LineString,
    /// (station, elevation) samples across the section.
    pub station_elevation: Vec<(f64, f64)>,
}

impl XsData {
    /// Lowest elevation of the section.
    pub fn thalweg(&self) -> f64 {
        self.station_elevation
            .iter()
            .map(|(_, e)| *e)
            .fold(f64::INFINITY, f64::min)
    }

    /// Highest elevation of the section.
    pub fn max_elevation(&self) -> f64 {
        self.station_elevation
            .iter()
            .map(|(_, e)| *e)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// One structure (bridge, culvert, weir...).
#[derive(Debug, Clone)]
pub struct StructureData {
    pub river: String,
    pub reach: String,
    pub station: f64,
    /// Structure type code; 6 marks a lateral structure.
    pub kind: u8,
    pub cut_line: LineString,
}

/// One junction connecting reaches.
#[derive(Debug, Clone)]
pub struct JunctionData {
    pub name: String,
    pub location: Point,
    pub us_rivers: Vec<String>,
    pub us_reaches: Vec<String>,
    pub ds_river: String,
    pub ds_reach: String,
}

/// Parsed geometry file.
#[derive(Debug, Clone, Default)]
pub struct GeometryFile {
    pub title: String,
    pub reaches: Vec<ReachGeometry>,
    pub cross_sections: Vec<XsData>,
    pub structures: Vec<StructureData>,
    pub junctions: Vec<JunctionData>,
}

impl GeometryFile {
    pub fn read(path: &Path) -> Result<Self, RasFileError> {
        let text = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = text.lines().collect();
        let mut geometry = GeometryFile::default();
        let mut river = String::new();
        let mut reach = String::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i].trim_end();
            if let Some((key, value)) = key_value(line) {
                match key {
                    "Geom Title" => geometry.title = value.to_string(),
                    "River Reach" => {
                        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                        if parts.len() != 2 {
                            return Err(RasFileError::parse(path, "bad River Reach record"));
                        }
                        river = parts[0].to_string();
                        reach = parts[1].to_string();
                    }
                    "Reach XY" => {
                        let count = parse_count(path, value)?;
                        let (points, next) = read_points(&lines, i + 1, count);
                        geometry.reaches.push(ReachGeometry {
                            river: river.clone(),
                            reach: reach.clone(),
                            centerline: LineString::new(points),
                        });
                        i = next;
                        continue;
                    }
                    "Type RM Length L Ch R" => {
                        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                        let kind: u8 = parts
                            .first()
                            .and_then(|t| t.parse().ok())
                            .ok_or_else(|| RasFileError::parse(path, "bad section type"))?;
                        let station: f64 = parts
                            .get(1)
                            .map(|s| s.trim_end_matches('*'))
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| RasFileError::parse(path, "bad section station"))?;
                        let (section, next) =
                            read_section(path, &lines, i + 1, &river, &reach, station, kind)?;
                        match section {
                            Section::CrossSection(xs) => geometry.cross_sections.push(xs),
                            Section::Structure(s) => geometry.structures.push(s),
                        }
                        i = next;
                        continue;
                    }
                    "Junct Name" => {
                        let (junction, next) = read_junction(path, &lines, i, value)?;
                        geometry.junctions.push(junction);
                        i = next;
                        continue;
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        if geometry.title.is_empty() {
            return Err(RasFileError::parse(path, "geometry file has no title"));
        }
        Ok(geometry)
    }

    pub fn write(&self, path: &Path) -> Result<(), RasFileError> {
        let mut out = String::new();
        out.push_str(&format!("Geom Title={}\n\n", self.title));
        for reach_geom in &self.reaches {
            out.push_str(&format!(
                "River Reach={},{}\n",
                reach_geom.river, reach_geom.reach
            ));
            write_points(&mut out, "Reach XY", reach_geom.centerline.points());
            for xs in self
                .cross_sections
                .iter()
                .filter(|x| x.river == reach_geom.river && x.reach == reach_geom.reach)
            {
                out.push_str(&format!("Type RM Length L Ch R =1,{}\n", xs.station));
                write_points(&mut out, "XS GIS Cut Line", xs.cut_line.points());
                out.push_str(&format!("#Sta/Elev={}\n", xs.station_elevation.len()));
                let flat: Vec<f64> = xs
                    .station_elevation
                    .iter()
                    .flat_map(|(s, e)| [*s, *e])
                    .collect();
                write_number_run(&mut out, &flat);
            }
            for s in self
                .structures
                .iter()
                .filter(|s| s.river == reach_geom.river && s.reach == reach_geom.reach)
            {
                out.push_str(&format!("Type RM Length L Ch R ={},{}\n", s.kind, s.station));
                write_points(&mut out, "Structure GIS Cut Line", s.cut_line.points());
            }
        }
        for junction in &self.junctions {
            out.push_str(&format!("Junct Name={}\n", junction.name));
            out.push_str(&format!(
                "Junct X Y={},{}\n",
                junction.location.x, junction.location.y
            ));
            for (r, rch) in junction.us_rivers.iter().zip(&junction.us_reaches) {
                out.push_str(&format!("Up River,Reach={r},{rch}\n"));
            }
            out.push_str(&format!(
                "Dn River,Reach={},{}\n",
                junction.ds_river, junction.ds_reach
            ));
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

enum Section {
    CrossSection(XsData),
    Structure(StructureData),
}

fn read_section(
    path: &Path,
    lines: &[&str],
    mut i: usize,
    river: &str,
    reach: &str,
    station: f64,
    kind: u8,
) -> Result<(Section, usize), RasFileError> {
    let mut cut_line = LineString::new(Vec::new());
    let mut station_elevation = Vec::new();

    while i < lines.len() {
        let line = lines[i].trim_end();
        match key_value(line) {
            Some(("XS GIS Cut Line", value)) | Some(("Structure GIS Cut Line", value)) => {
                let count = parse_count(path, value)?;
                let (points, next) = read_points(lines, i + 1, count);
                cut_line = LineString::new(points);
                i = next;
            }
            Some(("#Sta/Elev", value)) => {
                let count = parse_count(path, value)?;
                let (values, next) = read_numbers(lines, i + 1, count * 2);
                station_elevation = values.chunks_exact(2).map(|c| (c[0], c[1])).collect();
                i = next;
            }
            // Any other record ends this section.
            Some(_) => break,
            None => i += 1,
        }
    }

    if kind == 1 {
        Ok((
            Section::CrossSection(XsData {
                river: river.to_string(),
                reach: reach.to_string(),
                station,
                cut_line,
                station_elevation,
            }),
            i,
        ))
    } else {
        Ok((
            Section::Structure(StructureData {
                river: river.to_string(),
                reach: reach.to_string(),
                station,
                kind,
                cut_line,
            }),
            i,
        ))
    }
}

fn read_junction(
    path: &Path,
    lines: &[&str],
    mut i: usize,
    name: &str,
) -> Result<(JunctionData, usize), RasFileError> {
    let mut junction = JunctionData {
        name: name.to_string(),
        location: Point::new(0.0, 0.0),
        us_rivers: Vec::new(),
        us_reaches: Vec::new(),
        ds_river: String::new(),
        ds_reach: String::new(),
    };
    i += 1;
    while i < lines.len() {
        match key_value(lines[i].trim_end()) {
            Some(("Junct X Y", value)) => {
                let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                if parts.len() != 2 {
                    return Err(RasFileError::parse(path, "bad junction location"));
                }
                junction.location = Point::new(
                    parts[0].parse().unwrap_or(0.0),
                    parts[1].parse().unwrap_or(0.0),
                );
            }
            Some(("Up River,Reach", value)) => {
                if let Some((r, rch)) = value.split_once(',') {
                    junction.us_rivers.push(r.trim().to_string());
                    junction.us_reaches.push(rch.trim().to_string());
                }
            }
            Some(("Dn River,Reach", value)) => {
                if let Some((r, rch)) = value.split_once(',') {
                    junction.ds_river = r.trim().to_string();
                    junction.ds_reach = rch.trim().to_string();
                }
            }
            _ => break,
        }
        i += 1;
    }
    Ok((junction, i))
}

fn parse_count(path: &Path, value: &str) -> Result<usize, RasFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| RasFileError::parse(path, format!("bad count: {value:?}")))
}

/// Reads `2 * count` numbers starting at `start`, pairing them into points.
fn read_points(lines: &[&str], start: usize, count: usize) -> (Vec<Point>, usize) {
    let (values, next) = read_numbers(lines, start, count * 2);
    let points = values.chunks_exact(2).map(|c| Point::new(c[0], c[1])).collect();
    (points, next)
}

fn read_numbers(lines: &[&str], mut i: usize, wanted: usize) -> (Vec<f64>, usize) {
    let mut values = Vec::with_capacity(wanted);
    while i < lines.len() && values.len() < wanted {
        let parsed: Vec<f64> = lines[i]
            .split_whitespace()
            .filter_map(|tok| tok.parse().ok())
            .collect();
        if parsed.is_empty() {
            break;
        }
        values.extend(parsed);
        i += 1;
    }
    values.truncate(wanted);
    (values, i)
}

fn write_points(out: &mut String, key: &str, points: &[Point]) {
    out.push_str(&format!("{key}={}\n", points.len()));
    let flat: Vec<f64> = points.iter().flat_map(|p| [p.x, p.y]).collect();
    write_number_run(out, &flat);
}

fn write_number_run(out: &mut String, values: &[f64]) {
    for chunk in values.chunks(4) {
        let formatted: Vec<String> = chunk.iter().map(|v| format!("{v}")).collect();
        out.push_str(&formatted.join(" "));
        out.push('\n');
    }
}
