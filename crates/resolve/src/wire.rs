//! Wire shapes of the stored objects the resolver reads. Only the fields the engine uses
//! are decoded; everything else in the payload is ignored.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as Json;

use keel_core::{ComponentParameter, DefinitionRef, GroupKind, TraitDefinition, WorkloadDefinition};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Meta {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct NamedRef {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct TraitDefinitionSpec {
    pub applies_to_workloads: Vec<String>,
    pub conflicts_with: Vec<String>,
    pub revision_enabled: bool,
    pub definition_ref: NamedRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct TraitDefinitionObject {
    pub metadata: Meta,
    pub spec: TraitDefinitionSpec,
}

impl TraitDefinitionObject {
    pub fn into_definition(self) -> TraitDefinition {
        let reference = DefinitionRef::new(self.metadata.name.clone(), self.spec.definition_ref.name);
        TraitDefinition {
            name: self.metadata.name,
            applies_to: self.spec.applies_to_workloads,
            conflicts_with: self.spec.conflicts_with,
            revision_enabled: self.spec.revision_enabled,
            reference,
            labels: self.metadata.labels,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct WorkloadDefinitionSpec {
    pub definition_ref: NamedRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WorkloadDefinitionObject {
    pub metadata: Meta,
    pub spec: WorkloadDefinitionSpec,
}

impl WorkloadDefinitionObject {
    pub fn into_definition(self, group_kind: GroupKind) -> WorkloadDefinition {
        WorkloadDefinition {
            reference: DefinitionRef::new(self.metadata.name.clone(), self.spec.definition_ref.name),
            name: self.metadata.name,
            group_kind,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ComponentSpec {
    pub workload: Option<Json>,
    pub parameters: Vec<ComponentParameter>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ComponentObject {
    pub spec: ComponentSpec,
}

/// A ControllerRevision snapshotting a component; `data` holds the Component object.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RevisionObject {
    pub data: Option<Json>,
}
