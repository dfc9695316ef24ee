use keel_core::mock::{MemoryStore, StaticAccess, StaticMapper};
use keel_core::{AccessChecker, AccessReview, CallerIdentity, KindMapper, ObjectReader, ResourceKind, StoreError};
use serde_json::json;

#[tokio::test]
async fn store_serves_scripted_not_found_then_object() {
    let store = MemoryStore::new()
        .with(ResourceKind::COMPONENT, Some("team"), json!({ "metadata": { "name": "web" } }))
        .not_found_times(ResourceKind::COMPONENT, Some("team"), "web", 2);
    for _ in 0..2 {
        let err = store.get(ResourceKind::COMPONENT, Some("team"), "web").await.unwrap_err();
        assert!(err.is_not_found());
    }
    let obj = store.get(ResourceKind::COMPONENT, Some("team"), "web").await.expect("object");
    assert_eq!(obj["metadata"]["name"], "web");
    assert_eq!(store.gets(ResourceKind::COMPONENT, Some("team"), "web"), 3);
}

#[tokio::test]
async fn store_keys_by_namespace_and_kind() {
    let store = MemoryStore::new().with(ResourceKind::TRAIT_DEFINITION, Some("sys"), json!({ "metadata": { "name": "scaler" } }));
    assert!(store.get(ResourceKind::TRAIT_DEFINITION, Some("team"), "scaler").await.is_err());
    assert!(store.get(ResourceKind::WORKLOAD_DEFINITION, Some("sys"), "scaler").await.is_err());
    let failing = MemoryStore::new().failing(ResourceKind::TRAIT_DEFINITION, Some("sys"), "scaler", "boom");
    assert_eq!(
        failing.get(ResourceKind::TRAIT_DEFINITION, Some("sys"), "scaler").await,
        Err(StoreError::Transport("boom".into()))
    );
}

fn review(name: &str) -> AccessReview<'_> {
    AccessReview { verb: "get", resource: ResourceKind::TRAIT_DEFINITION, namespace: "sys", name }
}

#[tokio::test]
async fn access_exact_grant_overrides_wildcard() {
    let access = StaticAccess::new()
        .allow(ResourceKind::TRAIT_DEFINITION, "sys", "*")
        .deny(ResourceKind::TRAIT_DEFINITION, "sys", "secret");
    let caller = CallerIdentity::new("alice", ["devs"]);
    assert_eq!(access.can_access(&caller, review("scaler")).await, Ok(true));
    assert_eq!(access.can_access(&caller, review("secret")).await, Ok(false));
    assert_eq!(access.calls(), vec!["traitdefinitions/sys/scaler".to_string(), "traitdefinitions/sys/secret".to_string()]);
}

#[tokio::test]
async fn mapper_reports_unknown_kinds_as_not_found() {
    let mapper = StaticMapper::new().with("apps/v1", "Deployment", "deployments.apps");
    assert_eq!(mapper.resource_type_ref("apps/v1", "Deployment").await, Ok("deployments.apps".to_string()));
    assert!(mapper.resource_type_ref("apps/v1", "StatefulSet").await.unwrap_err().is_not_found());
}
