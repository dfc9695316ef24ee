//! Keel kubehub: the cluster-backed object reader, access checker and kind mapper.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::{
    api::{Api, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::Discovery,
    Client,
};
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use keel_core::{AccessChecker, AccessReview, CallerIdentity, KindMapper, ObjectReader, ResourceKind, StoreError};

fn transport(e: impl std::fmt::Display) -> StoreError {
    StoreError::Transport(e.to_string())
}

/// Split `group/version` (or a bare core `version`) into its parts.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// `resource.group` for a served resource; core resources have no group suffix.
pub fn resource_type_ref(plural: &str, group: &str) -> String {
    if group.is_empty() { plural.to_string() } else { format!("{}.{}", plural, group) }
}

fn api_resource(kind: ResourceKind) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(kind.group, kind.version, kind.kind), kind.plural)
}

/// Connected cluster collaborators sharing one client.
#[derive(Clone)]
pub struct KubeHub {
    pub reader: KubeReader,
    pub access: KubeAccess,
    pub mapper: DiscoveryMapper,
}

impl KubeHub {
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await.context("creating kube client")?;
        info!("kube client ready");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            reader: KubeReader::new(client.clone()),
            access: KubeAccess::new(client.clone()),
            mapper: DiscoveryMapper::new(client),
        }
    }
}

/// Reads objects through the dynamic API.
#[derive(Clone)]
pub struct KubeReader {
    client: Client,
}

impl KubeReader {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl ObjectReader for KubeReader {
    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<Json, StoreError> {
        let ar = api_resource(kind);
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        debug!(kind = %kind, ns = ?namespace, name, "get");
        match api.get_opt(name).await.map_err(transport)? {
            Some(obj) => serde_json::to_value(&obj).map_err(transport),
            None => Err(StoreError::not_found(kind, namespace, name)),
        }
    }
}

/// Answers access questions with SubjectAccessReview on behalf of the caller.
#[derive(Clone)]
pub struct KubeAccess {
    client: Client,
}

impl KubeAccess {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl AccessChecker for KubeAccess {
    async fn can_access(&self, caller: &CallerIdentity, review: AccessReview<'_>) -> Result<bool, StoreError> {
        use k8s_openapi::api::authorization::v1::{ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec};
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let ra = ResourceAttributes {
            group: if review.resource.group.is_empty() { None } else { Some(review.resource.group.to_string()) },
            version: Some(review.resource.version.to_string()),
            resource: Some(review.resource.plural.to_string()),
            verb: Some(review.verb.to_string()),
            namespace: Some(review.namespace.to_string()),
            name: Some(review.name.to_string()),
            ..Default::default()
        };
        let sar = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: Some(caller.username.clone()),
                groups: Some(caller.groups.clone()),
                resource_attributes: Some(ra),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = api.create(&PostParams::default(), &sar).await.map_err(transport)?;
        let allowed = created.status.map(|s| s.allowed).unwrap_or(false);
        debug!(user = %caller.username, kind = %review.resource, ns = review.namespace, name = review.name, allowed, "subject access review");
        Ok(allowed)
    }
}

/// Maps apiVersion/kind to `resource.group` using API discovery, run once and cached.
#[derive(Clone)]
pub struct DiscoveryMapper {
    client: Client,
    discovery: std::sync::Arc<OnceCell<Discovery>>,
}

impl DiscoveryMapper {
    pub fn new(client: Client) -> Self { Self { client, discovery: Default::default() } }

    async fn discovery(&self) -> Result<&Discovery, StoreError> {
        self.discovery
            .get_or_try_init(|| async {
                let d = Discovery::new(self.client.clone()).run().await.map_err(transport)?;
                info!(groups = d.groups().count(), "api discovery complete");
                Ok::<_, StoreError>(d)
            })
            .await
    }
}

#[async_trait::async_trait]
impl KindMapper for DiscoveryMapper {
    async fn resource_type_ref(&self, api_version: &str, kind: &str) -> Result<String, StoreError> {
        let (group, version) = split_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        match self.discovery().await?.resolve_gvk(&gvk) {
            Some((ar, _caps)) => Ok(resource_type_ref(&ar.plural, &ar.group)),
            None => Err(StoreError::NotFound {
                kind: "resource mapping".to_string(),
                namespace: None,
                name: format!("{}/{}", api_version, kind),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_api_version_handles_core_group() {
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(split_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn resource_type_ref_omits_empty_group() {
        assert_eq!(resource_type_ref("deployments", "apps"), "deployments.apps");
        assert_eq!(resource_type_ref("configmaps", ""), "configmaps");
    }

    #[test]
    fn api_resource_uses_declared_plural() {
        let ar = api_resource(ResourceKind::TRAIT_DEFINITION);
        assert_eq!(ar.plural, "traitdefinitions");
        assert_eq!(ar.api_version, "core.oam.dev/v1beta1");
        let ar = api_resource(ResourceKind::CONTROLLER_REVISION);
        assert_eq!(ar.group, "apps");
    }
}
