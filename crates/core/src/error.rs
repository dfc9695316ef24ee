//! Error taxonomy: store failures, resolution failures (fatal), validation failures
//! (aggregated) and permission failures (per reference).

use serde::{Deserialize, Serialize};

use crate::path::FieldPath;
use crate::ResourceKind;

/// Failure of the object store or the access-check collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("{}", not_found_message(.kind, .namespace, .name))]
    NotFound { kind: String, namespace: Option<String>, name: String },
    #[error("{0}")]
    Transport(String),
}

fn not_found_message(kind: &str, namespace: &Option<String>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {:?} not found in namespace {:?}", kind, name, ns),
        None => format!("{} {:?} not found", kind, name),
    }
}

impl StoreError {
    pub fn not_found(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        StoreError::NotFound {
            kind: kind.kind.to_string(),
            namespace: namespace.map(|s| s.to_string()),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A referenced object could not be fetched or read. Aborts the evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("cannot get component {component:?}: not found after {attempts} attempts")]
    ComponentNotFound { component: String, attempts: u32 },
    #[error("cannot get component {component:?}: {source}")]
    ComponentFetch { component: String, #[source] source: StoreError },
    #[error("component {component:?} is malformed: {reason}")]
    Decode { component: String, reason: String },
    #[error("cannot resolve workload definition of component {component:?}: {source}")]
    WorkloadDefinition { component: String, #[source] source: StoreError },
    #[error("trait #{index} of component {component:?} is invalid: {reason}")]
    TraitFormat { component: String, index: usize, reason: String },
    #[error("cannot resolve trait definition {definition:?} of component {component:?}: {source}")]
    TraitDefinition { component: String, definition: String, #[source] source: StoreError },
}

impl ResolutionError {
    /// Component the failure is attributed to.
    pub fn component(&self) -> &str {
        match self {
            ResolutionError::ComponentNotFound { component, .. }
            | ResolutionError::ComponentFetch { component, .. }
            | ResolutionError::Decode { component, .. }
            | ResolutionError::WorkloadDefinition { component, .. }
            | ResolutionError::TraitFormat { component, .. }
            | ResolutionError::TraitDefinition { component, .. } => component,
        }
    }
}

/// A semantic rule failed. Non-fatal; passes accumulate these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the trait {trait_name:?} cannot apply to workload {workload:?} of component {component:?} (appliable: {applies_to:?})")]
    Unappliable { trait_name: String, workload: String, component: String, applies_to: Vec<String> },
    #[error("conflict(rule: {rule:?}) between traits ({owner:?} and {other:?}) of component {component:?} is detected")]
    TraitConflict { rule: String, owner: String, other: String, component: String },
    #[error("trait {owner:?} of component {component:?} conflicts with all other traits")]
    ConflictsWithAll { owner: String, component: String },
    #[error("labelSelector in conflict rule ({rule:?}) is invalid for {reason}")]
    InvalidConflictSelector { rule: String, reason: String },
    #[error("versioning-enabled component's workload name MUST NOT be assigned, expect workload name {name:?} to be empty")]
    WorkloadNameAssigned { component: String, name: String },
    #[error("componentName {component:?} and revisionName {revision:?} are mutually exclusive, you can only specify one of them")]
    RevisionNameExclusive { component: String, revision: String },
    #[error("invalid replicas {value:?} in batch {index}: {reason}")]
    InvalidBatch { index: usize, value: String, reason: String },
    #[error("the number of rollout batches {actual} does not match numBatches {expected}")]
    BatchCount { expected: i32, actual: usize },
    #[error("the total replicas of rollout batches {total} exceeds targetSize {target}")]
    BatchTotal { total: i64, target: i32 },
}

impl ValidationError {
    /// Field path the violation is reported against.
    pub fn field_path(&self) -> FieldPath {
        match self {
            ValidationError::InvalidBatch { index, .. } => {
                FieldPath::new("spec").child("rolloutPlan").child("rolloutBatches").index(*index).child("replicas")
            }
            ValidationError::BatchCount { .. } => FieldPath::new("spec").child("rolloutPlan").child("numBatches"),
            ValidationError::BatchTotal { .. } => FieldPath::new("spec").child("rolloutPlan").child("rolloutBatches"),
            _ => FieldPath::new("spec"),
        }
    }
}

/// Outcome of a definition permission check other than "allowed".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error("user {user:?} cannot get {kind} {name:?} in namespace {app_namespace:?} or {system_namespace:?}")]
    Denied { user: String, kind: String, name: String, app_namespace: String, system_namespace: String },
    #[error("unable to verify permissions for {kind} {name:?}: {source}")]
    Unverified { kind: String, name: String, #[source] source: StoreError },
}
