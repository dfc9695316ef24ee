use std::sync::Arc;

use keel_authz::PermissionResolver;
use keel_core::mock::{MemoryStore, StaticAccess};
use keel_core::{Application, CallerIdentity, DefinitionKind, FieldErrorKind, ResourceKind, StoreError};
use serde_json::json;

const SYS: &str = "vela-system";
const APP: &str = "team-a";

fn caller() -> CallerIdentity {
    CallerIdentity::new("alice", ["devs"])
}

fn def(name: &str) -> serde_json::Value {
    json!({ "metadata": { "name": name } })
}

fn resolver(access: StaticAccess, store: MemoryStore) -> (PermissionResolver, Arc<StaticAccess>) {
    let access = Arc::new(access);
    (PermissionResolver::new(access.clone(), Arc::new(store), SYS), access)
}

#[tokio::test]
async fn system_namespace_grant_with_definition_succeeds_first() {
    let (r, access) = resolver(
        StaticAccess::new().allow(ResourceKind::TRAIT_DEFINITION, SYS, "scaler"),
        MemoryStore::new().with(ResourceKind::TRAIT_DEFINITION, Some(SYS), def("scaler")),
    );
    assert_eq!(r.resolve(&caller(), DefinitionKind::Trait, "scaler", APP).await, Ok(true));
    assert_eq!(access.calls(), vec!["traitdefinitions/vela-system/scaler".to_string()]);
}

#[tokio::test]
async fn denied_in_system_but_granted_in_app_namespace() {
    let (r, _) = resolver(
        StaticAccess::new()
            .deny(ResourceKind::TRAIT_DEFINITION, SYS, "scaler")
            .allow(ResourceKind::TRAIT_DEFINITION, APP, "scaler"),
        MemoryStore::new().with(ResourceKind::TRAIT_DEFINITION, Some(APP), def("scaler")),
    );
    assert_eq!(r.resolve(&caller(), DefinitionKind::Trait, "scaler", APP).await, Ok(true));
}

#[tokio::test]
async fn allowed_but_absent_in_system_falls_through_to_app_namespace() {
    let (r, access) = resolver(
        StaticAccess::new()
            .allow(ResourceKind::COMPONENT_DEFINITION, SYS, "*")
            .allow(ResourceKind::COMPONENT_DEFINITION, APP, "worker"),
        MemoryStore::new().with(ResourceKind::COMPONENT_DEFINITION, Some(APP), def("worker")),
    );
    assert_eq!(r.resolve(&caller(), DefinitionKind::Component, "worker", APP).await, Ok(true));
    assert_eq!(access.calls().len(), 2);
}

#[tokio::test]
async fn wildcard_grant_does_not_cover_absent_definitions() {
    let (r, _) = resolver(
        StaticAccess::new()
            .allow(ResourceKind::COMPONENT_DEFINITION, SYS, "*")
            .allow(ResourceKind::COMPONENT_DEFINITION, APP, "*"),
        MemoryStore::new(),
    );
    assert_eq!(r.resolve(&caller(), DefinitionKind::Component, "worker", APP).await, Ok(false));
}

#[tokio::test]
async fn denied_everywhere() {
    let (r, _) = resolver(StaticAccess::new(), MemoryStore::new());
    assert_eq!(r.resolve(&caller(), DefinitionKind::Policy, "topology", APP).await, Ok(false));
}

#[tokio::test]
async fn app_namespace_equal_to_system_is_checked_once() {
    let (r, access) = resolver(StaticAccess::new(), MemoryStore::new());
    assert_eq!(r.resolve(&caller(), DefinitionKind::Policy, "topology", SYS).await, Ok(false));
    assert_eq!(access.calls().len(), 1);
}

#[tokio::test]
async fn transport_errors_propagate_from_either_phase() {
    let (r, _) = resolver(StaticAccess::new().fail(ResourceKind::TRAIT_DEFINITION, SYS, "timeout"), MemoryStore::new());
    assert_eq!(
        r.resolve(&caller(), DefinitionKind::Trait, "scaler", APP).await,
        Err(StoreError::Transport("timeout".into()))
    );

    let (r, _) = resolver(StaticAccess::new().fail(ResourceKind::TRAIT_DEFINITION, APP, "timeout"), MemoryStore::new());
    assert!(r.resolve(&caller(), DefinitionKind::Trait, "scaler", APP).await.is_err());

    let (r, _) = resolver(
        StaticAccess::new().allow(ResourceKind::TRAIT_DEFINITION, SYS, "scaler"),
        MemoryStore::new().failing(ResourceKind::TRAIT_DEFINITION, Some(SYS), "scaler", "etcd unavailable"),
    );
    assert!(r.resolve(&caller(), DefinitionKind::Trait, "scaler", APP).await.is_err());
}

fn application() -> Application {
    serde_json::from_value(json!({
        "metadata": { "name": "shop", "namespace": APP },
        "spec": {
            "components": [
                { "name": "a", "type": "webservice", "traits": [{ "type": "scaler" }] },
                { "name": "b", "type": "webservice", "traits": [{ "type": "scaler" }] }
            ]
        }
    }))
    .expect("application")
}

#[tokio::test]
async fn denials_are_reported_at_every_location() {
    let (r, access) = resolver(
        StaticAccess::new().allow(ResourceKind::COMPONENT_DEFINITION, SYS, "webservice"),
        MemoryStore::new().with(ResourceKind::COMPONENT_DEFINITION, Some(SYS), def("webservice")),
    );
    let errs = r.validate_definition_permissions(&application(), &caller()).await;
    let paths: Vec<String> = errs.iter().map(|e| e.path.to_string()).collect();
    assert_eq!(paths, vec!["spec.components[0].traits[0].type", "spec.components[1].traits[0].type"]);
    assert!(errs.iter().all(|e| e.kind == FieldErrorKind::Forbidden));
    assert_eq!(
        errs[0].detail,
        "user \"alice\" cannot get TraitDefinition \"scaler\" in namespace \"team-a\" or \"vela-system\""
    );
    // webservice once, scaler once per namespace
    assert_eq!(access.calls().len(), 3);
}

#[tokio::test]
async fn unverifiable_permissions_are_distinct_from_denials() {
    let (r, _) = resolver(
        StaticAccess::new()
            .allow(ResourceKind::COMPONENT_DEFINITION, SYS, "webservice")
            .fail(ResourceKind::TRAIT_DEFINITION, SYS, "connection reset"),
        MemoryStore::new().with(ResourceKind::COMPONENT_DEFINITION, Some(SYS), def("webservice")),
    );
    let errs = r.validate_definition_permissions(&application(), &caller()).await;
    assert_eq!(errs.len(), 2);
    assert_eq!(errs[0].detail, "unable to verify permissions for TraitDefinition \"scaler\": connection reset");
}

#[tokio::test]
async fn empty_definition_type_is_denied_at_its_location() {
    let (r, _) = resolver(
        StaticAccess::new().allow(ResourceKind::COMPONENT_DEFINITION, SYS, "*").allow(ResourceKind::COMPONENT_DEFINITION, APP, "*"),
        MemoryStore::new(),
    );
    let app: Application = serde_json::from_value(json!({
        "metadata": { "name": "shop", "namespace": APP },
        "spec": { "components": [{ "name": "a", "type": "" }] }
    }))
    .expect("application");
    let errs = r.validate_definition_permissions(&app, &caller()).await;
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].path.to_string(), "spec.components[0].type");
    assert_eq!(errs[0].kind, FieldErrorKind::Forbidden);
}
