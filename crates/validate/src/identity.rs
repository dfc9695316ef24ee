//! Workload identity rules for components under revision tracking, and the
//! componentName/revisionName exclusivity of configuration components.

use keel_core::{ValidatingComponent, ValidationError, ValidationSnapshot, WORKLOAD_NAME_PATH};
use keel_schema::targets_field;
use rustc_hash::FxHashSet;
use serde_json::Value as Json;

fn display_value(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Value a parameter targeting the workload name receives, if any.
fn assigned_name(component: &ValidatingComponent) -> Option<String> {
    let targets: FxHashSet<&str> = component
        .parameters
        .iter()
        .filter(|p| p.field_paths.iter().any(|fp| targets_field(fp, WORKLOAD_NAME_PATH)))
        .map(|p| p.name.as_str())
        .collect();
    if targets.is_empty() {
        return None;
    }
    component
        .parameter_values
        .iter()
        .find(|v| targets.contains(v.name.as_str()) && !v.value.is_null())
        .map(|v| display_value(&v.value))
}

/// Revision-tracked workloads get their names from the system: neither a parameter nor the
/// workload itself may fix one.
pub fn check_identity(component: &ValidatingComponent) -> Vec<ValidationError> {
    if !component.revision_enabled() {
        return Vec::new();
    }
    let mut errs = Vec::new();
    if let Some(name) = assigned_name(component) {
        errs.push(ValidationError::WorkloadNameAssigned { component: component.name.clone(), name });
    }
    if let Some(name) = &component.workload_view.name {
        errs.push(ValidationError::WorkloadNameAssigned { component: component.name.clone(), name: name.clone() });
    }
    errs
}

pub fn check_workload_names(snapshot: &ValidationSnapshot) -> Vec<ValidationError> {
    snapshot.components.iter().flat_map(check_identity).collect()
}

pub fn check_revision_names(snapshot: &ValidationSnapshot) -> Vec<ValidationError> {
    snapshot
        .components
        .iter()
        .filter_map(|c| match (&c.component_name, &c.revision_name) {
            (Some(component), Some(revision)) => {
                Some(ValidationError::RevisionNameExclusive { component: component.clone(), revision: revision.clone() })
            }
            _ => None,
        })
        .collect()
}
