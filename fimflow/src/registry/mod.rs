//! Process registry: the static catalog of invocable processes.
//!
//! The registry is built once at startup and is the authority for input
//! validation on submission. Each descriptor lists the recognised input
//! fields with their domains, the files that must exist before the handler
//! can run, and how the handler treats eclipsed reaches.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown process: {0}")]
    UnknownProcess(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Domain of one input field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputKind {
    /// Free-form string.
    Text,
    /// String interpreted as a filesystem path.
    PathText,
    Float,
    Integer { min: i64, max: i64 },
    Boolean,
    /// Array of strings.
    TextList,
    /// Nested JSON object.
    Object,
}

impl InputKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            InputKind::Text | InputKind::PathText => value.is_string(),
            InputKind::Float => value.is_number(),
            InputKind::Integer { min, max } => value
                .as_i64()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            InputKind::Boolean => value.is_boolean(),
            InputKind::TextList => value
                .as_array()
                .map(|a| a.iter().all(Value::is_string))
                .unwrap_or(false),
            InputKind::Object => value.is_object(),
        }
    }

    fn describe(&self) -> String {
        match self {
            InputKind::Text => "a string".to_string(),
            InputKind::PathText => "a path string".to_string(),
            InputKind::Float => "a number".to_string(),
            InputKind::Integer { min, max } => format!("an integer in [{min}, {max}]"),
            InputKind::Boolean => "a boolean".to_string(),
            InputKind::TextList => "an array of strings".to_string(),
            InputKind::Object => "an object".to_string(),
        }
    }
}

/// One recognised input field.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub name: &'static str,
    pub kind: InputKind,
    pub required: bool,
}

impl InputSpec {
    const fn required(name: &'static str, kind: InputKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    const fn optional(name: &'static str, kind: InputKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// How a handler treats an eclipsed reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EclipsedBehaviour {
    /// The stage is not reach-scoped.
    NotApplicable,
    /// Succeeds immediately with a recorded reason.
    ShortCircuit,
    /// The stage cannot run on an eclipsed reach.
    Reject,
}

/// Files that must exist before a handler may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    SourceModelGpkg,
    SourceModelConflation,
    SubmodelGpkg,
    SubmodelParameters,
    SubmodelTerrain,
    /// A plan with this suffix must exist in the submodel.
    SubmodelPlan(&'static str),
}

/// Descriptor of one registered process.
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub name: &'static str,
    pub inputs: Vec<InputSpec>,
    pub preconditions: Vec<Precondition>,
    pub eclipsed: EclipsedBehaviour,
}

impl ProcessDescriptor {
    /// Validates an input document against the declared fields.
    pub fn validate(&self, input: &Value) -> Result<(), RegistryError> {
        let Some(map) = input.as_object() else {
            return Err(RegistryError::InvalidInput(
                "input must be a JSON object".to_string(),
            ));
        };
        let mut unexpected = Vec::new();
        for key in map.keys() {
            if !self.inputs.iter().any(|spec| spec.name == key) {
                unexpected.push(key.clone());
            }
        }
        let mut missing = Vec::new();
        for spec in &self.inputs {
            match map.get(spec.name) {
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(RegistryError::InvalidInput(format!(
                            "field '{}' must be {}",
                            spec.name,
                            spec.kind.describe()
                        )));
                    }
                }
                None if spec.required => missing.push(spec.name.to_string()),
                None => {}
            }
        }
        if !unexpected.is_empty() || !missing.is_empty() {
            return Err(RegistryError::InvalidInput(format!(
                "unexpected args: {unexpected:?}, missing args: {missing:?}"
            )));
        }
        Ok(())
    }

    /// Checks the declared file preconditions against the input document.
    pub fn check_preconditions(&self, input: &Value) -> Result<(), String> {
        for precondition in &self.preconditions {
            check_precondition(*precondition, input)?;
        }
        Ok(())
    }
}

fn check_precondition(precondition: Precondition, input: &Value) -> Result<(), String> {
    use crate::model::{ReachModel, SourceModel};

    let source_dir = || -> Result<SourceModel, String> {
        let dir = input
            .get("source_model_directory")
            .and_then(Value::as_str)
            .ok_or("source_model_directory missing")?;
        SourceModel::open(Path::new(dir)).map_err(|e| e.to_string())
    };
    let reach_model = || -> Result<ReachModel, String> {
        let dir = input
            .get("submodel_directory")
            .and_then(Value::as_str)
            .ok_or("submodel_directory missing")?;
        Ok(ReachModel::new(Path::new(dir)))
    };

    match precondition {
        Precondition::SourceModelGpkg => {
            let model = source_dir()?;
            let path = model.gpkg_path();
            if !path.exists() {
                return Err(format!("geopackage not found: {}", path.display()));
            }
        }
        Precondition::SourceModelConflation => {
            let model = source_dir()?;
            let path = model.conflation_path();
            if !path.exists() {
                return Err(format!("conflation document not found: {}", path.display()));
            }
        }
        Precondition::SubmodelGpkg => {
            let model = reach_model()?;
            let path = model.gpkg_path();
            if !path.exists() {
                return Err(format!("submodel geopackage not found: {}", path.display()));
            }
        }
        Precondition::SubmodelParameters => {
            let model = reach_model()?;
            let path = model.parameters_path();
            if !path.exists() {
                return Err(format!(
                    "reach parameter document not found: {}",
                    path.display()
                ));
            }
        }
        Precondition::SubmodelTerrain => {
            let model = reach_model()?;
            let path = model.terrain_path();
            if !path.exists() {
                return Err(format!("terrain bundle not found: {}", path.display()));
            }
        }
        Precondition::SubmodelPlan(suffix) => {
            let model = reach_model()?;
            if model.find_plan(suffix).is_none() {
                return Err(format!(
                    "no plan with suffix '{suffix}' in {}",
                    model.directory().display()
                ));
            }
        }
    }
    Ok(())
}

/// The process catalog, keyed by name.
pub struct ProcessRegistry {
    descriptors: BTreeMap<&'static str, ProcessDescriptor>,
}

impl ProcessRegistry {
    /// Builds the standard registry.
    pub fn standard() -> Self {
        use EclipsedBehaviour::*;
        use InputKind::*;
        use Precondition::*;

        let mut descriptors = BTreeMap::new();
        let mut register = |descriptor: ProcessDescriptor| {
            descriptors.insert(descriptor.name, descriptor);
        };

        register(ProcessDescriptor {
            name: "test",
            inputs: vec![InputSpec::optional("sleep_seconds", Float)],
            preconditions: vec![],
            eclipsed: NotApplicable,
        });
        register(ProcessDescriptor {
            name: "ras_to_gpkg",
            inputs: vec![
                InputSpec::required("source_model_directory", PathText),
                InputSpec::optional("crs", Integer { min: 1, max: 1_000_000 }),
            ],
            preconditions: vec![],
            eclipsed: NotApplicable,
        });
        register(ProcessDescriptor {
            name: "conflate_model",
            inputs: vec![
                InputSpec::required("source_model_directory", PathText),
                InputSpec::required("source_network", Object),
                InputSpec::optional("low_flow_multiplier", Float),
                InputSpec::optional("high_flow_multiplier", Float),
            ],
            preconditions: vec![SourceModelGpkg],
            eclipsed: NotApplicable,
        });
        register(ProcessDescriptor {
            name: "compute_conflation_metrics",
            inputs: vec![
                InputSpec::required("source_model_directory", PathText),
                InputSpec::required("source_network", Object),
            ],
            preconditions: vec![SourceModelGpkg, SourceModelConflation],
            eclipsed: NotApplicable,
        });
        register(ProcessDescriptor {
            name: "extract_submodel",
            inputs: vec![
                InputSpec::required("source_model_directory", PathText),
                InputSpec::required("submodel_directory", PathText),
                InputSpec::required("nwm_id", Text),
                InputSpec::optional("ignore_source_flows", Boolean),
                InputSpec::optional("ignore_network_flows", Boolean),
            ],
            preconditions: vec![SourceModelGpkg, SourceModelConflation],
            eclipsed: ShortCircuit,
        });
        register(ProcessDescriptor {
            name: "create_ras_terrain",
            inputs: vec![
                InputSpec::required("submodel_directory", PathText),
                InputSpec::optional("resolution", Float),
                InputSpec::optional("resolution_units", Text),
            ],
            preconditions: vec![SubmodelGpkg],
            eclipsed: Reject,
        });
        register(ProcessDescriptor {
            name: "create_model_run_normal_depth",
            inputs: vec![
                InputSpec::required("submodel_directory", PathText),
                InputSpec::optional("plan_suffix", Text),
                InputSpec::optional(
                    "num_of_discharges_for_initial_normal_depth_runs",
                    Integer { min: 2, max: 10_000 },
                ),
            ],
            preconditions: vec![SubmodelGpkg, SubmodelParameters],
            eclipsed: ShortCircuit,
        });
        register(ProcessDescriptor {
            name: "run_incremental_normal_depth",
            inputs: vec![
                InputSpec::required("submodel_directory", PathText),
                InputSpec::optional("plan_suffix", Text),
                InputSpec::optional("depth_increment", Float),
                InputSpec::optional("write_depth_grids", Boolean),
            ],
            preconditions: vec![SubmodelGpkg, SubmodelParameters, SubmodelPlan("ind")],
            eclipsed: Reject,
        });
        register(ProcessDescriptor {
            name: "run_known_wse",
            inputs: vec![
                InputSpec::required("submodel_directory", PathText),
                InputSpec::required("min_elevation", Float),
                InputSpec::required("max_elevation", Float),
                InputSpec::optional("plan_suffix", Text),
                InputSpec::optional("depth_increment", Float),
                InputSpec::optional("write_depth_grids", Boolean),
            ],
            preconditions: vec![SubmodelGpkg, SubmodelParameters, SubmodelPlan("nd")],
            eclipsed: Reject,
        });
        register(ProcessDescriptor {
            name: "create_fim_lib",
            inputs: vec![
                InputSpec::required("submodel_directory", PathText),
                InputSpec::required("plans", TextList),
                InputSpec::optional("library_directory", PathText),
                InputSpec::optional("cleanup", Boolean),
            ],
            preconditions: vec![SubmodelGpkg, SubmodelParameters],
            eclipsed: Reject,
        });
        register(ProcessDescriptor {
            name: "create_rating_curves_db",
            inputs: vec![
                InputSpec::required("submodel_directory", PathText),
                InputSpec::required("plans", TextList),
                InputSpec::optional("table_name", Text),
            ],
            preconditions: vec![SubmodelGpkg, SubmodelParameters],
            eclipsed: Reject,
        });

        Self { descriptors }
    }

    pub fn get(&self, name: &str) -> Option<&ProcessDescriptor> {
        self.descriptors.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.descriptors.keys().copied().collect()
    }

    /// Full submission-time validation: process exists and input conforms.
    pub fn validate_submission(&self, name: &str, input: &Value) -> Result<(), RegistryError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProcess(name.to_string()))?;
        descriptor.validate(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_standard_registry_is_complete() {
        let registry = ProcessRegistry::standard();
        for name in [
            "test",
            "ras_to_gpkg",
            "conflate_model",
            "compute_conflation_metrics",
            "extract_submodel",
            "create_ras_terrain",
            "create_model_run_normal_depth",
            "run_incremental_normal_depth",
            "run_known_wse",
            "create_fim_lib",
            "create_rating_curves_db",
        ] {
            assert!(registry.get(name).is_some(), "missing process {name}");
        }
    }

    #[test]
    fn test_unknown_process() {
        let registry = ProcessRegistry::standard();
        assert!(matches!(
            registry.validate_submission("solve_everything", &json!({})),
            Err(RegistryError::UnknownProcess(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let registry = ProcessRegistry::standard();
        let err = registry
            .validate_submission("run_known_wse", &json!({"submodel_directory": "/x"}))
            .unwrap_err();
        match err {
            RegistryError::InvalidInput(message) => {
                assert!(message.contains("min_elevation"));
                assert!(message.contains("max_elevation"));
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_field() {
        let registry = ProcessRegistry::standard();
        let err = registry
            .validate_submission("test", &json!({"bogus": 1}))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput(_)));
    }

    #[test]
    fn test_type_domains() {
        let registry = ProcessRegistry::standard();
        // Integer out of range.
        assert!(registry
            .validate_submission(
                "create_model_run_normal_depth",
                &json!({
                    "submodel_directory": "/x",
                    "num_of_discharges_for_initial_normal_depth_runs": 1
                })
            )
            .is_err());
        // Wrong type for list.
        assert!(registry
            .validate_submission(
                "create_fim_lib",
                &json!({"submodel_directory": "/x", "plans": "nd"})
            )
            .is_err());
        // Correct shapes pass.
        assert!(registry
            .validate_submission(
                "create_fim_lib",
                &json!({"submodel_directory": "/x", "plans": ["nd", "kwse"]})
            )
            .is_ok());
    }

    #[test]
    fn test_non_object_input_rejected() {
        let registry = ProcessRegistry::standard();
        assert!(matches!(
            registry.validate_submission("test", &json!([1, 2])),
            Err(RegistryError::InvalidInput(_))
        ));
    }
}
