//! Reach submodel directory contract.

use super::ModelError;
use crate::ras::PlanFile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A reach-scoped submodel directory.
///
/// Layout, relative to the directory:
///
/// ```text
/// <reach>.prj                      project file
/// <reach>.gpkg                     reach geopackage
/// <reach>.reach.json               reach parameter document
/// <reach>.terrain_agreement.json   terrain agreement metrics
/// Terrain/<reach>.hdf              terrain bundle
/// <reach>.pNN / .fNN / .rNN        plan / flow / result generations
/// grids/<suffix>/                  raw depth grids per plan suffix
/// fims/<reach>/<Q>-<E>.tif         clipped map library
/// <reach>.db                       rating-curve database
/// ```
#[derive(Debug, Clone)]
pub struct ReachModel {
    directory: PathBuf,
    reach_id: String,
}

impl ReachModel {
    pub fn new(directory: &Path) -> Self {
        let reach_id = directory
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            directory: directory.to_path_buf(),
            reach_id,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn reach_id(&self) -> &str {
        &self.reach_id
    }

    pub fn project_path(&self) -> PathBuf {
        self.directory.join(format!("{}.prj", self.reach_id))
    }

    pub fn gpkg_path(&self) -> PathBuf {
        self.directory.join(format!("{}.gpkg", self.reach_id))
    }

    pub fn parameters_path(&self) -> PathBuf {
        self.directory.join(format!("{}.reach.json", self.reach_id))
    }

    pub fn terrain_directory(&self) -> PathBuf {
        self.directory.join("Terrain")
    }

    pub fn terrain_path(&self) -> PathBuf {
        self.terrain_directory()
            .join(format!("{}.hdf", self.reach_id))
    }

    pub fn terrain_agreement_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.terrain_agreement.json", self.reach_id))
    }

    pub fn plan_path(&self, number: u32) -> PathBuf {
        self.numbered_path('p', number)
    }

    pub fn flow_path(&self, number: u32) -> PathBuf {
        self.numbered_path('f', number)
    }

    pub fn result_path(&self, number: u32) -> PathBuf {
        self.numbered_path('r', number)
    }

    fn numbered_path(&self, prefix: char, number: u32) -> PathBuf {
        self.directory.join(format!(
            "{}.{}",
            self.reach_id,
            crate::ras::numbered_extension(prefix, number)
        ))
    }

    /// Raw (unclipped) depth grids for a plan suffix.
    pub fn grids_directory(&self, plan_suffix: &str) -> PathBuf {
        self.directory.join("grids").join(plan_suffix)
    }

    /// Clipped map library directory.
    pub fn fim_directory(&self) -> PathBuf {
        self.directory.join("fims").join(&self.reach_id)
    }

    /// Path of one library depth grid; `boundary` is `nd` for normal-depth
    /// profiles.
    pub fn fim_grid_path(&self, discharge: f64, boundary: &str) -> PathBuf {
        self.fim_directory()
            .join(format!("{discharge:.0}-{boundary}.tif"))
    }

    pub fn rating_db_path(&self) -> PathBuf {
        self.directory.join(format!("{}.db", self.reach_id))
    }

    /// Lowest unused plan/flow/result number.
    pub fn next_run_number(&self) -> u32 {
        let mut number = 1;
        while self.plan_path(number).exists() {
            number += 1;
        }
        number
    }

    /// Finds the plan whose short identifier matches `suffix`.
    pub fn find_plan(&self, suffix: &str) -> Option<(u32, PlanFile)> {
        for number in 1..100 {
            let path = self.plan_path(number);
            if !path.exists() {
                continue;
            }
            if let Ok(plan) = PlanFile::read(&path) {
                if plan.short_id == suffix {
                    return Some((number, plan));
                }
            }
        }
        None
    }

    pub fn read_parameters(&self) -> Result<ReachParameters, ModelError> {
        let path = self.parameters_path();
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| ModelError::Document {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn write_parameters(&self, parameters: &ReachParameters) -> Result<(), ModelError> {
        std::fs::create_dir_all(&self.directory)?;
        let text = serde_json::to_string_pretty(parameters).map_err(|e| ModelError::Document {
            path: self.parameters_path().display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(self.parameters_path(), text)?;
        Ok(())
    }
}

/// Reach parameter document (`<reach>.reach.json`).
///
/// Written by submodel extraction; read by every later stage working on the
/// reach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachParameters {
    pub reach_id: String,
    pub eclipsed: bool,
    pub low_flow: f64,
    pub high_flow: f64,
    #[serde(default)]
    pub network_to_id: Option<String>,
    pub crs: i32,
    /// Directory of the source model the reach was extracted from.
    pub source_model: String,
    #[serde(default)]
    pub notes: Vec<String>,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_path_contract() {
        let model = ReachModel::new(Path::new("/data/submodels/2823932"));
        assert_eq!(model.reach_id(), "2823932");
        assert!(model.gpkg_path().ends_with("2823932/2823932.gpkg"));
        assert!(model.terrain_path().ends_with("Terrain/2823932.hdf"));
        assert!(model.plan_path(3).ends_with("2823932.p03"));
        assert!(model.result_path(12).ends_with("2823932.r12"));
        assert!(model
            .fim_grid_path(1200.0, "163.5")
            .ends_with("fims/2823932/1200-163.5.tif"));
        assert!(model.fim_grid_path(80.0, "nd").ends_with("fims/2823932/80-nd.tif"));
    }

    #[test]
    fn test_parameters_round_trip() {
        let dir = tempdir().unwrap();
        let reach_dir = dir.path().join("2823932");
        let model = ReachModel::new(&reach_dir);
        let parameters = ReachParameters {
            reach_id: "2823932".to_string(),
            eclipsed: false,
            low_flow: 90.0,
            high_flow: 4400.0,
            network_to_id: Some("2823934".to_string()),
            crs: 5070,
            source_model: "/data/source/muddy".to_string(),
            notes: vec!["low_flow computed from source model flows".to_string()],
            version: "0.3.1".to_string(),
        };
        model.write_parameters(&parameters).unwrap();
        let back = model.read_parameters().unwrap();
        assert_eq!(back.low_flow, 90.0);
        assert_eq!(back.network_to_id.as_deref(), Some("2823934"));
        assert!(!back.eclipsed);
    }

    #[test]
    fn test_next_run_number_skips_existing() {
        let dir = tempdir().unwrap();
        let reach_dir = dir.path().join("77");
        std::fs::create_dir_all(&reach_dir).unwrap();
        let model = ReachModel::new(&reach_dir);
        assert_eq!(model.next_run_number(), 1);
        std::fs::write(model.plan_path(1), "Plan Title=x\n").unwrap();
        assert_eq!(model.next_run_number(), 2);
    }
}
