//! Plan file (`*.pNN`): pairs a geometry with a flow file.

use super::{key_value, RasFileError};
use std::path::Path;

/// Parsed plan file.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub title: String,
    pub short_id: String,
    /// Geometry extension, e.g. `g01`.
    pub geom_extension: String,
    /// Flow extension, e.g. `f01` (steady) or `u01` (unsteady).
    pub flow_extension: String,
    /// Free-form description; runs store the profile-name map here.
    pub description: String,
    /// Plans carrying encroachment data cannot seed the extraction.
    pub has_encroachments: bool,
    /// Whether the solver should emit a depth grid per profile.
    pub write_depth_grids: bool,
}

impl PlanFile {
    pub fn read(path: &Path) -> Result<Self, RasFileError> {
        let text = std::fs::read_to_string(path)?;
        let mut plan = PlanFile {
            title: String::new(),
            short_id: String::new(),
            geom_extension: String::new(),
            flow_extension: String::new(),
            description: String::new(),
            has_encroachments: false,
            write_depth_grids: false,
        };
        let mut in_description = false;
        for line in text.lines() {
            let trimmed = line.trim_end();
            if trimmed == "BEGIN DESCRIPTION:" {
                in_description = true;
                continue;
            }
            if trimmed == "END DESCRIPTION:" {
                in_description = false;
                continue;
            }
            if in_description {
                if !plan.description.is_empty() {
                    plan.description.push('\n');
                }
                plan.description.push_str(trimmed);
                continue;
            }
            if trimmed.trim_start().starts_with("Encroach") {
                plan.has_encroachments = true;
                continue;
            }
            if let Some((key, value)) = key_value(trimmed) {
                match key {
                    "Plan Title" => plan.title = value.to_string(),
                    "Short Identifier" => plan.short_id = value.to_string(),
                    "Geom File" => plan.geom_extension = value.to_string(),
                    "Flow File" => plan.flow_extension = value.to_string(),
                    "Write Depth Grids" => plan.write_depth_grids = value == "1",
                    _ => {}
                }
            }
        }
        if plan.geom_extension.is_empty() || plan.flow_extension.is_empty() {
            return Err(RasFileError::parse(
                path,
                "plan names no geometry or flow file",
            ));
        }
        Ok(plan)
    }

    pub fn write(&self, path: &Path) -> Result<(), RasFileError> {
        let mut out = String::new();
        out.push_str(&format!("Plan Title={}\n", self.title));
        out.push_str(&format!("Short Identifier={}\n", self.short_id));
        if !self.description.is_empty() {
            out.push_str("BEGIN DESCRIPTION:\n");
            out.push_str(&self.description);
            out.push_str("\nEND DESCRIPTION:\n");
        }
        out.push_str(&format!("Geom File={}\n", self.geom_extension));
        out.push_str(&format!("Flow File={}\n", self.flow_extension));
        out.push_str(&format!(
            "Write Depth Grids={}\n",
            if self.write_depth_grids { "1" } else { "0" }
        ));
        std::fs::write(path, out)?;
        Ok(())
    }

    /// True when the referenced flow file is steady-state.
    pub fn is_steady(&self) -> bool {
        self.flow_extension.starts_with('f')
    }
}
