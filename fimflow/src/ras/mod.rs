//! Source-model file containers.
//!
//! The hydraulic source models arrive as a directory of text files: a
//! project file naming plans, plan files pairing a geometry with a flow
//! file, steady-flow files holding profiles, and geometry files carrying
//! cross-section cut lines and station/elevation data. This module is the
//! pluggable adapter over those containers — the engine only reads and
//! writes the documented fields and treats everything else as opaque.
//!
//! Generated submodel plans and flows are written with the same containers
//! so a submodel directory looks exactly like a (small) source model.

mod flow;
mod geometry;
mod plan;
mod project;

pub use flow::{BoundaryCondition, FlowFile, FlowProfile};
pub use geometry::{GeometryFile, JunctionData, ReachGeometry, StructureData, XsData};
pub use plan::PlanFile;
pub use project::{ProjectFile, Units};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasFileError {
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: {message}")]
    Parse { path: String, message: String },
}

impl RasFileError {
    pub(crate) fn parse(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

/// Splits a `Key=Value` line; values keep interior whitespace.
pub(crate) fn key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Parses a comma-separated list of floats, tolerating blanks.
pub(crate) fn parse_float_list(value: &str) -> Vec<f64> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse::<f64>().ok())
        .collect()
}

/// Formats a flow-file numbered extension, e.g. `f01`, `p12`, `r03`.
pub fn numbered_extension(prefix: char, number: u32) -> String {
    format!("{prefix}{number:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_trims() {
        assert_eq!(key_value("Plan Title= Muddy Creek "), Some(("Plan Title", "Muddy Creek")));
        assert_eq!(key_value("no separator"), None);
    }

    #[test]
    fn test_parse_float_list() {
        assert_eq!(parse_float_list("1, 2.5, ,3"), vec![1.0, 2.5, 3.0]);
    }

    #[test]
    fn test_numbered_extension() {
        assert_eq!(numbered_extension('p', 1), "p01");
        assert_eq!(numbered_extension('f', 12), "f12");
    }
}
