//! Keel core types: admission objects, the validation snapshot and the collaborator seams
//! the engine reads through.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod mock;
pub mod path;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub use config::{parse_flag, EngineConfig, RetryPolicy};
pub use error::{PermissionError, ResolutionError, StoreError, ValidationError};
pub use path::{FieldError, FieldErrorKind, FieldPath};

/// Label on a workload payload naming its WorkloadDefinition directly.
pub const WORKLOAD_TYPE_LABEL: &str = "workload.oam.dev/type";
/// Label on a trait payload naming its TraitDefinition directly.
pub const TRAIT_TYPE_LABEL: &str = "trait.oam.dev/type";
/// Field path a component parameter uses to target the workload name.
pub const WORKLOAD_NAME_PATH: &str = "metadata.name";
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "vela-system";
pub const ANNOTATION_AUTO_UPDATE: &str = "app.oam.dev/autoUpdate";
pub const ANNOTATION_PUBLISH_VERSION: &str = "app.oam.dev/publishVersion";

// ---- resource kinds ----

/// A served resource type the engine reads or authorizes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ResourceKind {
    pub const COMPONENT: Self = Self::oam("v1alpha2", "Component", "components");
    pub const WORKLOAD_DEFINITION: Self = Self::oam("v1beta1", "WorkloadDefinition", "workloaddefinitions");
    pub const TRAIT_DEFINITION: Self = Self::oam("v1beta1", "TraitDefinition", "traitdefinitions");
    pub const COMPONENT_DEFINITION: Self = Self::oam("v1beta1", "ComponentDefinition", "componentdefinitions");
    pub const POLICY_DEFINITION: Self = Self::oam("v1beta1", "PolicyDefinition", "policydefinitions");
    pub const WORKFLOW_STEP_DEFINITION: Self =
        Self::oam("v1beta1", "WorkflowStepDefinition", "workflowstepdefinitions");
    pub const CONTROLLER_REVISION: Self =
        Self { group: "apps", version: "v1", kind: "ControllerRevision", plural: "controllerrevisions" };

    const fn oam(version: &'static str, kind: &'static str, plural: &'static str) -> Self {
        Self { group: "core.oam.dev", version, kind, plural }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.to_string() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind)
    }
}

/// Definition kinds a configuration object can reference by type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Component,
    Trait,
    Policy,
    WorkflowStep,
}

impl DefinitionKind {
    pub fn resource(&self) -> ResourceKind {
        match self {
            DefinitionKind::Component => ResourceKind::COMPONENT_DEFINITION,
            DefinitionKind::Trait => ResourceKind::TRAIT_DEFINITION,
            DefinitionKind::Policy => ResourceKind::POLICY_DEFINITION,
            DefinitionKind::WorkflowStep => ResourceKind::WORKFLOW_STEP_DEFINITION,
        }
    }
}

/// A `resource.group` identifier split into its parts. The group is everything after the
/// first dot; a bare resource (core group) has an empty group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupResource<'a> {
    pub resource: &'a str,
    pub group: &'a str,
}

impl<'a> GroupResource<'a> {
    pub fn parse(s: &'a str) -> Self {
        match s.split_once('.') {
            Some((resource, group)) => Self { resource, group },
            None => Self { resource: s, group: "" },
        }
    }
}

// ---- definitions ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRef {
    /// Definition object name.
    pub name: String,
    /// Underlying `resource.group`, e.g. `foos.example.com`.
    pub resource_type_ref: String,
}

impl DefinitionRef {
    pub fn new(name: impl Into<String>, resource_type_ref: impl Into<String>) -> Self {
        Self { name: name.into(), resource_type_ref: resource_type_ref.into() }
    }

    pub fn group(&self) -> &str {
        GroupResource::parse(&self.resource_type_ref).group
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitDefinition {
    pub name: String,
    pub applies_to: Vec<String>,
    pub conflicts_with: Vec<String>,
    pub revision_enabled: bool,
    pub reference: DefinitionRef,
    pub labels: BTreeMap<String, String>,
}

/// A trait's definition as the registry answered it. `Unknown` marks a trait whose
/// definition was not found: it is checked structurally, never against rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraitDef {
    Known(TraitDefinition),
    Unknown(DefinitionRef),
}

impl TraitDef {
    pub fn name(&self) -> &str {
        match self {
            TraitDef::Known(d) => &d.name,
            TraitDef::Unknown(r) => &r.name,
        }
    }

    pub fn reference(&self) -> &DefinitionRef {
        match self {
            TraitDef::Known(d) => &d.reference,
            TraitDef::Unknown(r) => r,
        }
    }

    pub fn known(&self) -> Option<&TraitDefinition> {
        match self {
            TraitDef::Known(d) => Some(d),
            TraitDef::Unknown(_) => None,
        }
    }

    pub fn revision_enabled(&self) -> bool {
        self.known().map(|d| d.revision_enabled).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupKind {
    pub api_group: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDefinition {
    pub name: String,
    pub reference: DefinitionRef,
    pub group_kind: GroupKind,
}

// ---- snapshot ----

/// The few fields of an open payload the passes need, read once during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectView {
    pub api_version: String,
    pub kind: String,
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ObjectView {
    pub fn from_json(v: &Json) -> Self {
        let str_at = |key: &str| v.get(key).and_then(|s| s.as_str()).unwrap_or("").to_string();
        let meta = v.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let labels = meta
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.as_object())
            .map(|l| {
                l.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Self { api_version: str_at("apiVersion"), kind: str_at("kind"), name, labels }
    }

    pub fn group(&self) -> &str {
        self.api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatingTrait {
    pub content: Json,
    pub view: ObjectView,
    pub definition: TraitDef,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentParameter {
    pub name: String,
    pub field_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterValue {
    pub name: String,
    pub value: Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatingComponent {
    pub name: String,
    pub component_name: Option<String>,
    pub revision_name: Option<String>,
    pub workload: Json,
    pub workload_view: ObjectView,
    pub workload_definition: WorkloadDefinition,
    pub parameters: Vec<ComponentParameter>,
    pub parameter_values: Vec<ParameterValue>,
    pub traits: Vec<ValidatingTrait>,
}

impl ValidatingComponent {
    pub fn revision_enabled(&self) -> bool {
        self.traits.iter().any(|t| t.definition.revision_enabled())
    }
}

/// Everything one admission evaluation validates against. Built once by the resolver and
/// only read afterwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationSnapshot {
    pub name: String,
    pub namespace: String,
    pub components: Vec<ValidatingComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub username: String,
    pub groups: Vec<String>,
}

impl CallerIdentity {
    pub fn new(username: impl Into<String>, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { username: username.into(), groups: groups.into_iter().map(Into::into).collect() }
    }
}

// ---- admission objects ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
}

impl ObjectMeta {
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().filter(|s| !s.is_empty()).unwrap_or("default")
    }
}

/// Raw configuration object: components referenced by name with traits attached inline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub metadata: ObjectMeta,
    pub spec: AppConfigSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfigSpec {
    pub components: Vec<AppConfigComponent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfigComponent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_name: Option<String>,
    pub parameter_values: Vec<ParameterValue>,
    pub traits: Vec<ComponentTrait>,
}

impl AppConfigComponent {
    /// Name the component is referred to by: `componentName`, else `revisionName`.
    pub fn reference_name(&self) -> &str {
        self.component_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.revision_name.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentTrait {
    #[serde(rename = "trait")]
    pub content: Json,
}

/// Application object: components, traits, policies and workflow steps referenced by type name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSpec {
    pub components: Vec<ApplicationComponent>,
    pub policies: Vec<AppPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationComponent {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Json>,
    pub traits: Vec<ApplicationTrait>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationTrait {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Json>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppPolicy {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Json>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowStep {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    pub sub_steps: Vec<WorkflowStep>,
}

// ---- collaborators ----

/// One access question put to the access-check collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessReview<'a> {
    pub verb: &'a str,
    pub resource: ResourceKind,
    pub namespace: &'a str,
    pub name: &'a str,
}

/// Object store reads. A missing object is `StoreError::NotFound`, never `Ok(Null)`.
#[async_trait::async_trait]
pub trait ObjectReader: Send + Sync {
    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<Json, StoreError>;
}

/// Subject access checks on behalf of a caller.
#[async_trait::async_trait]
pub trait AccessChecker: Send + Sync {
    async fn can_access(&self, caller: &CallerIdentity, review: AccessReview<'_>) -> Result<bool, StoreError>;
}

/// Maps a payload's apiVersion/kind to its `resource.group` reference (`deployments.apps`).
#[async_trait::async_trait]
pub trait KindMapper: Send + Sync {
    async fn resource_type_ref(&self, api_version: &str, kind: &str) -> Result<String, StoreError>;
}

pub mod prelude {
    pub use super::{
        AccessChecker, AccessReview, CallerIdentity, DefinitionKind, DefinitionRef, KindMapper, ObjectReader,
        ResourceKind, TraitDef, TraitDefinition, ValidatingComponent, ValidatingTrait, ValidationSnapshot,
        WorkloadDefinition,
    };
}
