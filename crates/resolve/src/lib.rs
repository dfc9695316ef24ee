//! Keel resolver: fetches every component an application configuration references, its
//! workload, the workload's definition and each attached trait's definition, and builds
//! one [`ValidationSnapshot`].

#![forbid(unsafe_code)]

mod wire;

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use keel_core::{
    AppConfig, AppConfigComponent, DefinitionRef, GroupKind, KindMapper, ObjectReader, ObjectView, ResolutionError,
    ResourceKind, RetryPolicy, StoreError, TraitDef, ValidatingComponent, ValidatingTrait, ValidationSnapshot,
    WorkloadDefinition, TRAIT_TYPE_LABEL, WORKLOAD_TYPE_LABEL,
};

use wire::{ComponentObject, RevisionObject, TraitDefinitionObject, WorkloadDefinitionObject};

/// Top-level trait fields that must have been rewritten before admission.
const TRAIT_TYPE_FIELD: &str = "name";
const TRAIT_ALIAS_FIELD: &str = "type";
const TRAIT_PROPERTIES_FIELD: &str = "properties";

/// Check a trait payload is an already-normalized object with a resource identity.
pub fn check_trait_object(content: &Json) -> Result<(), String> {
    let Some(obj) = content.as_object() else {
        return Err("the trait content should be an object".to_string());
    };
    if obj.contains_key(TRAIT_TYPE_FIELD) || obj.contains_key(TRAIT_ALIAS_FIELD) {
        return Err("the trait contains 'name' or 'type' info that should be mutated to apiVersion/kind".to_string());
    }
    if obj.contains_key(TRAIT_PROPERTIES_FIELD) {
        return Err("the trait contains 'properties' info that should be mutated to spec".to_string());
    }
    let view = ObjectView::from_json(content);
    if view.api_version.is_empty() || view.kind.is_empty() {
        return Err(format!(
            "the trait data missing apiVersion/kind, apiVersion {:?}, kind {:?}",
            view.api_version, view.kind
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Resolver {
    reader: Arc<dyn ObjectReader>,
    mapper: Arc<dyn KindMapper>,
    retry: RetryPolicy,
    system_namespace: String,
}

impl Resolver {
    pub fn new(reader: Arc<dyn ObjectReader>, mapper: Arc<dyn KindMapper>, system_namespace: impl Into<String>) -> Self {
        Self { reader, mapper, retry: RetryPolicy::default(), system_namespace: system_namespace.into() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the snapshot for one configuration. The first resolution failure aborts.
    pub async fn resolve(&self, config: &AppConfig) -> Result<ValidationSnapshot, ResolutionError> {
        let started = Instant::now();
        let namespace = config.metadata.namespace_or_default().to_string();
        let mut components = Vec::with_capacity(config.spec.components.len());
        for comp in &config.spec.components {
            components.push(self.resolve_component(&namespace, comp).await?);
        }
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("resolve_latency_ms", ms);
        info!(name = %config.metadata.name, ns = %namespace, components = components.len(), took_ms = %ms, "configuration resolved");
        Ok(ValidationSnapshot { name: config.metadata.name.clone(), namespace, components })
    }

    async fn resolve_component(
        &self,
        namespace: &str,
        comp: &AppConfigComponent,
    ) -> Result<ValidatingComponent, ResolutionError> {
        let name = comp.reference_name().to_string();
        let component_name = comp.component_name.clone().filter(|s| !s.is_empty());
        let revision_name = comp.revision_name.clone().filter(|s| !s.is_empty());
        let decode = |reason: String| ResolutionError::Decode { component: name.clone(), reason };

        let raw = match (&component_name, &revision_name) {
            (Some(c), _) => self.fetch_component(ResourceKind::COMPONENT, namespace, c, &name).await?,
            (None, Some(r)) => {
                let rev = self.fetch_component(ResourceKind::CONTROLLER_REVISION, namespace, r, &name).await?;
                let rev: RevisionObject = serde_json::from_value(rev).map_err(|e| decode(e.to_string()))?;
                rev.data.ok_or_else(|| decode(format!("revision {:?} carries no component data", r)))?
            }
            (None, None) => return Err(decode("neither componentName nor revisionName is set".to_string())),
        };
        let component: ComponentObject = serde_json::from_value(raw).map_err(|e| decode(e.to_string()))?;
        let workload = component.spec.workload.ok_or_else(|| decode("spec.workload is missing".to_string()))?;
        if !workload.is_object() {
            return Err(decode("spec.workload is not an object".to_string()));
        }
        let workload_view = ObjectView::from_json(&workload);
        if workload_view.api_version.is_empty() || workload_view.kind.is_empty() {
            return Err(decode("workload is missing apiVersion or kind".to_string()));
        }

        let workload_definition = self.resolve_workload_definition(namespace, &name, &workload_view).await?;

        let mut traits = Vec::with_capacity(comp.traits.len());
        for (index, t) in comp.traits.iter().enumerate() {
            check_trait_object(&t.content)
                .map_err(|reason| ResolutionError::TraitFormat { component: name.clone(), index, reason })?;
            let view = ObjectView::from_json(&t.content);
            let definition = self.resolve_trait_definition(namespace, &name, &view).await?;
            traits.push(ValidatingTrait { content: t.content.clone(), view, definition });
        }

        debug!(component = %name, workload_def = %workload_definition.name, traits = traits.len(), "component resolved");
        Ok(ValidatingComponent {
            name,
            component_name,
            revision_name,
            workload,
            workload_view,
            workload_definition,
            parameters: component.spec.parameters,
            parameter_values: comp.parameter_values.clone(),
            traits,
        })
    }

    /// Fetch a component (or its revision), retrying NotFound with backoff.
    async fn fetch_component(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        component: &str,
    ) -> Result<Json, ResolutionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.reader.get(kind, Some(namespace), name).await {
                Ok(obj) => return Ok(obj),
                Err(e) if e.is_not_found() && self.retry.should_retry(attempt) => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    counter!("resolve_fetch_retries", 1u64);
                    debug!(kind = %kind, ns = namespace, name, attempt, delay_ms = delay.as_millis() as u64, "not yet visible, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_not_found() => {
                    warn!(kind = %kind, ns = namespace, name, attempts = attempt + 1, "component not found");
                    return Err(ResolutionError::ComponentNotFound {
                        component: component.to_string(),
                        attempts: attempt + 1,
                    });
                }
                Err(source) => {
                    return Err(ResolutionError::ComponentFetch { component: component.to_string(), source })
                }
            }
        }
    }

    /// Definitions are looked up in the application namespace, then the system namespace.
    async fn get_definition(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Json, StoreError> {
        match self.reader.get(kind, Some(namespace), name).await {
            Err(e) if e.is_not_found() && namespace != self.system_namespace => {
                self.reader.get(kind, Some(&self.system_namespace), name).await
            }
            other => other,
        }
    }

    /// Name of the definition a payload refers to: its type label, else its `resource.group`.
    async fn definition_name(&self, view: &ObjectView, label: &str) -> Result<(String, String), StoreError> {
        if let Some(name) = view.labels.get(label).filter(|s| !s.is_empty()) {
            return Ok((name.clone(), String::new()));
        }
        let reference = self.mapper.resource_type_ref(&view.api_version, &view.kind).await?;
        Ok((reference.clone(), reference))
    }

    async fn resolve_workload_definition(
        &self,
        namespace: &str,
        component: &str,
        view: &ObjectView,
    ) -> Result<WorkloadDefinition, ResolutionError> {
        let wrap = |source: StoreError| ResolutionError::WorkloadDefinition { component: component.to_string(), source };
        let (name, _) = self.definition_name(view, WORKLOAD_TYPE_LABEL).await.map_err(wrap)?;
        let raw = self.get_definition(ResourceKind::WORKLOAD_DEFINITION, namespace, &name).await.map_err(wrap)?;
        let obj: WorkloadDefinitionObject = serde_json::from_value(raw)
            .map_err(|e| ResolutionError::Decode { component: component.to_string(), reason: e.to_string() })?;
        let group_kind = GroupKind { api_group: view.group().to_string(), kind: view.kind.clone() };
        Ok(obj.into_definition(group_kind))
    }

    async fn resolve_trait_definition(
        &self,
        namespace: &str,
        component: &str,
        view: &ObjectView,
    ) -> Result<TraitDef, ResolutionError> {
        let (name, reference) = self.definition_name(view, TRAIT_TYPE_LABEL).await.map_err(|source| {
            ResolutionError::TraitDefinition {
                component: component.to_string(),
                definition: format!("{}/{}", view.api_version, view.kind),
                source,
            }
        })?;
        match self.get_definition(ResourceKind::TRAIT_DEFINITION, namespace, &name).await {
            Ok(raw) => {
                let obj: TraitDefinitionObject = serde_json::from_value(raw)
                    .map_err(|e| ResolutionError::Decode { component: component.to_string(), reason: e.to_string() })?;
                Ok(TraitDef::Known(obj.into_definition()))
            }
            Err(e) if e.is_not_found() => {
                debug!(component, definition = %name, "trait definition not found, validating structurally");
                Ok(TraitDef::Unknown(DefinitionRef::new(name, reference)))
            }
            Err(source) => {
                Err(ResolutionError::TraitDefinition { component: component.to_string(), definition: name, source })
            }
        }
    }
}
