//! Project file (`*.prj`): titles the model and names its plan files.

use super::{key_value, RasFileError};
use std::fmt;
use std::path::Path;

/// Unit system declared by the project file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    English,
    Si,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::English => write!(f, "English"),
            Units::Si => write!(f, "SI"),
        }
    }
}

/// Parsed project file.
#[derive(Debug, Clone)]
pub struct ProjectFile {
    pub title: String,
    pub units: Units,
    /// Extension of the plan marked current, e.g. `p01`.
    pub current_plan: Option<String>,
    /// Extensions of every plan the project lists, in file order.
    pub plan_extensions: Vec<String>,
}

impl ProjectFile {
    pub fn read(path: &Path) -> Result<Self, RasFileError> {
        let text = std::fs::read_to_string(path)?;
        let mut title = String::new();
        let mut units = Units::English;
        let mut current_plan = None;
        let mut plan_extensions = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed == "SI Units" {
                units = Units::Si;
            } else if trimmed == "English Units" {
                units = Units::English;
            } else if let Some((key, value)) = key_value(trimmed) {
                match key {
                    "Proj Title" => title = value.to_string(),
                    "Current Plan" => current_plan = Some(value.to_string()),
                    "Plan File" => plan_extensions.push(value.to_string()),
                    _ => {}
                }
            }
        }

        if title.is_empty() {
            return Err(RasFileError::parse(path, "project file has no title"));
        }
        Ok(Self {
            title,
            units,
            current_plan,
            plan_extensions,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), RasFileError> {
        let mut out = String::new();
        out.push_str(&format!("Proj Title={}\n", self.title));
        if let Some(current) = &self.current_plan {
            out.push_str(&format!("Current Plan={current}\n"));
        }
        out.push_str(match self.units {
            Units::English => "English Units\n",
            Units::Si => "SI Units\n",
        });
        for plan in &self.plan_extensions {
            out.push_str(&format!("Plan File={plan}\n"));
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}
