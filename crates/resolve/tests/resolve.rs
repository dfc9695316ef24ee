use std::sync::Arc;
use std::time::Duration;

use keel_core::mock::{MemoryStore, StaticMapper};
use keel_core::{AppConfig, ResolutionError, ResourceKind, RetryPolicy, StoreError, TraitDef};
use keel_resolve::Resolver;
use serde_json::{json, Value as Json};

const NS: &str = "team-a";
const SYS: &str = "vela-system";

fn fast_retry(max: u32) -> RetryPolicy {
    RetryPolicy::default().with_max_retries(max).with_initial_delay(Duration::ZERO).with_max_delay(Duration::ZERO)
}

fn component(name: &str, workload: Json) -> Json {
    json!({
        "apiVersion": "core.oam.dev/v1alpha2",
        "kind": "Component",
        "metadata": { "name": name },
        "spec": {
            "workload": workload,
            "parameters": [{ "name": "instance", "fieldPaths": ["metadata.name"] }]
        }
    })
}

fn deployment() -> Json {
    json!({ "apiVersion": "apps/v1", "kind": "Deployment", "spec": {} })
}

fn workload_def() -> Json {
    json!({ "metadata": { "name": "deployments.apps" }, "spec": { "definitionRef": { "name": "deployments.apps" } } })
}

fn trait_def(name: &str, crd: &str) -> Json {
    json!({
        "metadata": { "name": name, "labels": { "kind": "scaling" } },
        "spec": { "appliesToWorkloads": ["*.apps"], "revisionEnabled": true, "definitionRef": { "name": crd } }
    })
}

fn app(components: Json) -> AppConfig {
    serde_json::from_value(json!({ "metadata": { "name": "demo", "namespace": NS }, "spec": { "components": components } }))
        .expect("app config")
}

fn mapper() -> Arc<StaticMapper> {
    Arc::new(
        StaticMapper::new()
            .with("apps/v1", "Deployment", "deployments.apps")
            .with("core.oam.dev/v1alpha2", "ManualScalerTrait", "manualscalertraits.core.oam.dev")
            .with("example.com/v1", "Mystery", "mysteries.example.com"),
    )
}

fn scaler_trait() -> Json {
    json!({ "trait": { "apiVersion": "core.oam.dev/v1alpha2", "kind": "ManualScalerTrait", "spec": { "replicaCount": 2 } } })
}

#[tokio::test]
async fn resolves_components_with_definitions_from_both_namespaces() {
    let store = MemoryStore::new()
        .with(ResourceKind::COMPONENT, Some(NS), component("web", deployment()))
        .with(ResourceKind::WORKLOAD_DEFINITION, Some(SYS), workload_def())
        .with(ResourceKind::TRAIT_DEFINITION, Some(NS), trait_def("manualscalertraits.core.oam.dev", "manualscalertraits.core.oam.dev"));
    let store = Arc::new(store);
    let resolver = Resolver::new(store.clone(), mapper(), SYS).with_retry(fast_retry(0));

    let snap = resolver
        .resolve(&app(json!([{ "componentName": "web", "traits": [scaler_trait()] }])))
        .await
        .expect("resolve");

    assert_eq!(snap.namespace, NS);
    let c = &snap.components[0];
    assert_eq!(c.name, "web");
    assert_eq!(c.workload_definition.name, "deployments.apps");
    assert_eq!(c.workload_definition.reference.group(), "apps");
    assert_eq!(c.workload_definition.group_kind.kind, "Deployment");
    assert_eq!(c.parameters[0].field_paths, vec!["metadata.name".to_string()]);
    assert!(c.revision_enabled());
    assert!(matches!(c.traits[0].definition, TraitDef::Known(_)));
    // workload definition missed the app namespace first
    assert_eq!(store.gets(ResourceKind::WORKLOAD_DEFINITION, Some(NS), "deployments.apps"), 1);
    assert_eq!(store.gets(ResourceKind::WORKLOAD_DEFINITION, Some(SYS), "deployments.apps"), 1);
}

#[tokio::test]
async fn type_label_names_the_definition_directly() {
    let mut workload = deployment();
    workload["metadata"] = json!({ "labels": { "workload.oam.dev/type": "webservice" } });
    let store = MemoryStore::new()
        .with(ResourceKind::COMPONENT, Some(NS), component("web", workload))
        .with(ResourceKind::WORKLOAD_DEFINITION, Some(SYS), json!({
            "metadata": { "name": "webservice" },
            "spec": { "definitionRef": { "name": "deployments.apps" } }
        }));
    let resolver = Resolver::new(Arc::new(store), Arc::new(StaticMapper::new()), SYS).with_retry(fast_retry(0));
    let snap = resolver.resolve(&app(json!([{ "componentName": "web" }]))).await.expect("resolve");
    assert_eq!(snap.components[0].workload_definition.name, "webservice");
}

#[tokio::test]
async fn component_fetch_retries_until_visible() {
    let store = MemoryStore::new()
        .with(ResourceKind::COMPONENT, Some(NS), component("web", deployment()))
        .with(ResourceKind::WORKLOAD_DEFINITION, Some(NS), workload_def())
        .not_found_times(ResourceKind::COMPONENT, Some(NS), "web", 2);
    let store = Arc::new(store);
    let resolver = Resolver::new(store.clone(), mapper(), SYS).with_retry(fast_retry(3));
    resolver.resolve(&app(json!([{ "componentName": "web" }]))).await.expect("resolve");
    assert_eq!(store.gets(ResourceKind::COMPONENT, Some(NS), "web"), 3);
}

#[tokio::test]
async fn component_not_found_after_budget_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let resolver = Resolver::new(store.clone(), mapper(), SYS).with_retry(fast_retry(2));
    let err = resolver.resolve(&app(json!([{ "componentName": "ghost" }]))).await.unwrap_err();
    assert_eq!(err, ResolutionError::ComponentNotFound { component: "ghost".into(), attempts: 3 });
    assert_eq!(err.component(), "ghost");
    assert_eq!(store.gets(ResourceKind::COMPONENT, Some(NS), "ghost"), 3);
}

#[tokio::test]
async fn transport_error_is_not_retried() {
    let store = Arc::new(MemoryStore::new().failing(ResourceKind::COMPONENT, Some(NS), "web", "connection refused"));
    let resolver = Resolver::new(store.clone(), mapper(), SYS).with_retry(fast_retry(5));
    let err = resolver.resolve(&app(json!([{ "componentName": "web" }]))).await.unwrap_err();
    assert_eq!(
        err,
        ResolutionError::ComponentFetch { component: "web".into(), source: StoreError::Transport("connection refused".into()) }
    );
    assert_eq!(store.gets(ResourceKind::COMPONENT, Some(NS), "web"), 1);
}

#[tokio::test]
async fn unknown_trait_definition_falls_back() {
    let store = MemoryStore::new()
        .with(ResourceKind::COMPONENT, Some(NS), component("web", deployment()))
        .with(ResourceKind::WORKLOAD_DEFINITION, Some(NS), workload_def());
    let resolver = Resolver::new(Arc::new(store), mapper(), SYS).with_retry(fast_retry(0));
    let snap = resolver
        .resolve(&app(json!([{
            "componentName": "web",
            "traits": [{ "trait": { "apiVersion": "example.com/v1", "kind": "Mystery" } }]
        }])))
        .await
        .expect("resolve");
    match &snap.components[0].traits[0].definition {
        TraitDef::Unknown(r) => assert_eq!(r.resource_type_ref, "mysteries.example.com"),
        other => panic!("expected unknown, got {:?}", other),
    }
}

#[tokio::test]
async fn unnormalized_trait_is_rejected_before_lookup() {
    let store = MemoryStore::new()
        .with(ResourceKind::COMPONENT, Some(NS), component("web", deployment()))
        .with(ResourceKind::WORKLOAD_DEFINITION, Some(NS), workload_def());
    let resolver = Resolver::new(Arc::new(store), mapper(), SYS).with_retry(fast_retry(0));
    let err = resolver
        .resolve(&app(json!([{ "componentName": "web", "traits": [{ "trait": { "name": "scaler", "properties": {} } }] }])))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolutionError::TraitFormat { index: 0, .. }), "{err:?}");
}

#[tokio::test]
async fn missing_workload_definition_is_fatal() {
    let store = MemoryStore::new().with(ResourceKind::COMPONENT, Some(NS), component("web", deployment()));
    let resolver = Resolver::new(Arc::new(store), mapper(), SYS).with_retry(fast_retry(0));
    let err = resolver.resolve(&app(json!([{ "componentName": "web" }]))).await.unwrap_err();
    assert!(matches!(err, ResolutionError::WorkloadDefinition { .. }), "{err:?}");
}

#[tokio::test]
async fn revision_name_reads_component_from_revision() {
    let rev = json!({ "metadata": { "name": "web-v2" }, "data": component("web", deployment()) });
    let store = MemoryStore::new()
        .with(ResourceKind::CONTROLLER_REVISION, Some(NS), rev)
        .with(ResourceKind::WORKLOAD_DEFINITION, Some(NS), workload_def());
    let resolver = Resolver::new(Arc::new(store), mapper(), SYS).with_retry(fast_retry(0));
    let snap = resolver.resolve(&app(json!([{ "revisionName": "web-v2" }]))).await.expect("resolve");
    let c = &snap.components[0];
    assert_eq!(c.name, "web-v2");
    assert_eq!(c.revision_name.as_deref(), Some("web-v2"));
    assert!(c.component_name.is_none());
}
