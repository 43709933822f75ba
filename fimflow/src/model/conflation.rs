//! Conflation document: the per-source-model mapping from network reach to
//! cross-section selections, flow bounds, and quality metrics.

use super::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Reference to one source-model cross section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XsRef {
    pub river: String,
    pub reach: String,
    pub xs_id: String,
    pub min_elevation: f64,
    pub max_elevation: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetMetrics {
    pub centerline_offset: f64,
    pub thalweg_offset: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LengthMetrics {
    pub ras: f64,
    pub network: f64,
    pub network_to_ras_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetrics {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReachMetrics {
    pub xs: OffsetMetrics,
    pub lengths: LengthMetrics,
    pub coverage: CoverageMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlappedReach {
    pub id: String,
    pub overlap: f64,
}

/// Conflation entry for one network reach.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReachConflation {
    #[serde(default)]
    pub us_xs: Option<XsRef>,
    #[serde(default)]
    pub ds_xs: Option<XsRef>,
    pub eclipsed: bool,
    #[serde(default)]
    pub low_flow: f64,
    #[serde(default)]
    pub high_flow: f64,
    #[serde(default)]
    pub network_to_id: Option<String>,
    #[serde(default)]
    pub metrics: Option<ReachMetrics>,
    #[serde(default)]
    pub overlapped_reaches: Vec<OverlappedReach>,
    #[serde(default)]
    pub eclipsed_reaches: Vec<String>,
}

impl ReachConflation {
    /// A reach is eclipsed exactly when its cross-section selections
    /// coincide (including both being absent).
    pub fn selections_coincide(&self) -> bool {
        self.us_xs == self.ds_xs
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceNetworkInfo {
    pub file_name: String,
    #[serde(rename = "type")]
    pub network_type: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRasModelInfo {
    pub title: String,
    pub units: String,
    pub project_file: String,
    pub geometry: String,
    pub forcing: String,
    pub plan: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflationMetadata {
    pub source_network: SourceNetworkInfo,
    pub source_ras_model: SourceRasModelInfo,
    #[serde(default)]
    pub length_units: Option<String>,
    #[serde(default)]
    pub flow_units: Option<String>,
}

/// The per-source-model conflation document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflationDocument {
    pub reaches: BTreeMap<String, ReachConflation>,
    pub metadata: ConflationMetadata,
}

impl ConflationDocument {
    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ModelError::Document {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| ModelError::Document {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn reach(&self, reach_id: &str) -> Option<&ReachConflation> {
        self.reaches.get(reach_id)
    }

    /// Count of reaches with a usable cross-section pair.
    pub fn conflated_count(&self) -> usize {
        self.reaches.values().filter(|r| !r.eclipsed).count()
    }
}
