//! Whether a trait may attach to a component's workload.

use keel_core::{GroupResource, TraitDefinition, ValidationError, ValidationSnapshot, WorkloadDefinition};
use tracing::debug;

const ANY: &str = "*";
const GROUP_WILDCARD: &str = "*.";

/// First matching rule wins: empty list, `*`, `*.<group>`, then the definition name or
/// `resource.group` reference.
pub fn applies(def: &TraitDefinition, workload: &WorkloadDefinition) -> bool {
    if def.applies_to.is_empty() {
        return true;
    }
    let reference = workload.reference.resource_type_ref.as_str();
    let group = GroupResource::parse(reference).group;
    def.applies_to.iter().any(|entry| {
        entry == ANY
            || entry.strip_prefix(GROUP_WILDCARD).map(|g| g == group).unwrap_or(false)
            || entry == &workload.name
            || (!reference.is_empty() && entry == reference)
    })
}

/// One error per inapplicable (trait, workload) pair. Traits without a known definition
/// are skipped.
pub fn check_applicability(snapshot: &ValidationSnapshot) -> Vec<ValidationError> {
    let mut errs = Vec::new();
    for comp in &snapshot.components {
        let workload = &comp.workload_definition;
        for def in comp.traits.iter().filter_map(|t| t.definition.known()) {
            if applies(def, workload) {
                continue;
            }
            debug!(component = %comp.name, trait_def = %def.name, workload = %workload.name, "trait not appliable");
            errs.push(ValidationError::Unappliable {
                trait_name: def.name.clone(),
                workload: workload.name.clone(),
                component: comp.name.clone(),
                applies_to: def.applies_to.clone(),
            });
        }
    }
    errs
}
