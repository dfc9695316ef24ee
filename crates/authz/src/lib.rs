//! Keel authz: decides whether a caller may use a referenced definition.
//!
//! The trusted system namespace is consulted first, then the application's own namespace.
//! In each namespace an allowed access review only counts when the definition also exists
//! there.

#![forbid(unsafe_code)]

pub mod usage;

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use keel_core::{
    AccessChecker, AccessReview, Application, CallerIdentity, DefinitionKind, FieldError, ObjectReader,
    PermissionError, ResourceKind, StoreError,
};

pub use usage::{collect_usage, DefinitionUsage};

const VERB_GET: &str = "get";

#[derive(Clone)]
pub struct PermissionResolver {
    access: Arc<dyn AccessChecker>,
    reader: Arc<dyn ObjectReader>,
    system_namespace: String,
}

impl PermissionResolver {
    pub fn new(access: Arc<dyn AccessChecker>, reader: Arc<dyn ObjectReader>, system_namespace: impl Into<String>) -> Self {
        Self { access, reader, system_namespace: system_namespace.into() }
    }

    pub fn system_namespace(&self) -> &str { &self.system_namespace }

    /// Access review for reading `name` in `namespace`.
    pub async fn check_allowed(
        &self,
        caller: &CallerIdentity,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Result<bool, StoreError> {
        counter!("permission_checks", 1u64);
        self.access.can_access(caller, AccessReview { verb: VERB_GET, resource: kind, namespace, name }).await
    }

    /// Whether the definition is present in `namespace`. Only NotFound means absent; an
    /// empty name never exists.
    pub async fn definition_exists(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<bool, StoreError> {
        if name.is_empty() {
            return Ok(false);
        }
        match self.reader.get(kind, Some(namespace), name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn granted_in(
        &self,
        caller: &CallerIdentity,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Result<bool, StoreError> {
        if !self.check_allowed(caller, kind, name, namespace).await? {
            debug!(user = %caller.username, kind = %kind, name, ns = namespace, "access review denied");
            return Ok(false);
        }
        let exists = self.definition_exists(kind, name, namespace).await?;
        if !exists {
            debug!(kind = %kind, name, ns = namespace, "allowed but absent");
        }
        Ok(exists)
    }

    /// Decide whether `caller` may use definition `name`. Store or access-check failures are
    /// returned as errors, never folded into a denial.
    pub async fn resolve(
        &self,
        caller: &CallerIdentity,
        kind: DefinitionKind,
        name: &str,
        app_namespace: &str,
    ) -> Result<bool, StoreError> {
        let resource = kind.resource();
        if self.granted_in(caller, resource, name, &self.system_namespace).await? {
            return Ok(true);
        }
        if app_namespace != self.system_namespace && self.granted_in(caller, resource, name, app_namespace).await? {
            return Ok(true);
        }
        counter!("permission_denials", 1u64);
        info!(user = %caller.username, kind = %resource, name, app_ns = app_namespace, system_ns = %self.system_namespace, "definition permission denied");
        Ok(false)
    }

    /// Check each distinct definition an application references once and report every
    /// location of every reference that is denied or could not be verified.
    pub async fn validate_definition_permissions(&self, app: &Application, caller: &CallerIdentity) -> Vec<FieldError> {
        let app_namespace = app.metadata.namespace_or_default();
        let mut errs = Vec::new();
        for used in collect_usage(app) {
            let kind = used.kind.resource();
            let failure = match self.resolve(caller, used.kind, &used.name, app_namespace).await {
                Ok(true) => continue,
                Ok(false) => PermissionError::Denied {
                    user: caller.username.clone(),
                    kind: kind.kind.to_string(),
                    name: used.name.clone(),
                    app_namespace: app_namespace.to_string(),
                    system_namespace: self.system_namespace.clone(),
                },
                Err(source) => {
                    warn!(user = %caller.username, kind = %kind, name = %used.name, error = %source, "permission check failed");
                    PermissionError::Unverified { kind: kind.kind.to_string(), name: used.name.clone(), source }
                }
            };
            let detail = failure.to_string();
            errs.extend(used.paths.into_iter().map(|p| FieldError::forbidden(p, detail.clone())));
        }
        errs
    }
}
