//! Source-model directory handling and primary-plan selection.

use super::ModelError;
use crate::ras::{FlowFile, GeometryFile, PlanFile, ProjectFile};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A source-model directory: project file plus plan/geometry/flow files.
///
/// Identity is the directory path; the model name is the project file stem.
#[derive(Debug, Clone)]
pub struct SourceModel {
    directory: PathBuf,
    name: String,
    project: ProjectFile,
}

impl SourceModel {
    /// Opens a source model, scanning the directory for its project file.
    ///
    /// Fails with `NotASourceModel` when the directory holds no parseable
    /// project file.
    pub fn open(directory: &Path) -> Result<Self, ModelError> {
        if !directory.is_dir() {
            return Err(ModelError::NotASourceModel(format!(
                "{} is not a directory",
                directory.display()
            )));
        }
        let prj_path = WalkDir::new(directory)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| e.into_path())
            .find(|p| p.extension().and_then(|e| e.to_str()) == Some("prj"))
            .ok_or_else(|| {
                ModelError::NotASourceModel(format!(
                    "no project file under {}",
                    directory.display()
                ))
            })?;
        let project = ProjectFile::read(&prj_path).map_err(|e| {
            ModelError::NotASourceModel(format!("unreadable project file: {e}"))
        })?;
        let name = prj_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self {
            directory: directory.to_path_buf(),
            name,
            project,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn project(&self) -> &ProjectFile {
        &self.project
    }

    /// Path of a model file with the given extension, e.g. `p01`.
    pub fn file_with_extension(&self, extension: &str) -> PathBuf {
        self.directory.join(format!("{}.{extension}", self.name))
    }

    pub fn gpkg_path(&self) -> PathBuf {
        self.directory.join(format!("{}.gpkg", self.name))
    }

    pub fn conflation_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.conflation.json", self.name))
    }

    /// Selects the primary plan.
    ///
    /// Preference order: the current plan when it carries no encroachments,
    /// otherwise the first listed plan without encroachments. A model whose
    /// plans all carry encroachments has no valid plan.
    pub fn primary_plan(&self) -> Result<PlanFile, ModelError> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(current) = &self.project.current_plan {
            candidates.push(current.clone());
        }
        for ext in &self.project.plan_extensions {
            if !candidates.contains(ext) {
                candidates.push(ext.clone());
            }
        }
        if candidates.is_empty() {
            return Err(ModelError::NoValidPlan(format!(
                "project {} lists no plans",
                self.name
            )));
        }
        for ext in &candidates {
            let path = self.file_with_extension(ext);
            if !path.exists() {
                continue;
            }
            let plan = PlanFile::read(&path)?;
            if !plan.has_encroachments {
                return Ok(plan);
            }
        }
        Err(ModelError::NoValidPlan(format!(
            "every plan of {} carries encroachments",
            self.name
        )))
    }

    /// Geometry of the primary plan.
    pub fn primary_geometry(&self) -> Result<GeometryFile, ModelError> {
        let plan = self.primary_plan()?;
        Ok(GeometryFile::read(
            &self.file_with_extension(&plan.geom_extension),
        )?)
    }

    /// Steady flow file of the primary plan.
    pub fn primary_flow(&self) -> Result<FlowFile, ModelError> {
        let plan = self.primary_plan()?;
        Ok(FlowFile::read(
            &self.file_with_extension(&plan.flow_extension),
        )?)
    }
}
