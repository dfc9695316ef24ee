//! Keel admission facade.
//!
//! Frontends (the CLI, a webhook server) depend on [`AdmissionApi`]. [`AdmissionEngine`]
//! implements it in-process: it resolves the object, runs the validation passes and turns
//! their findings into one [`Verdict`].

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use keel_authz::PermissionResolver;
use keel_core::path::aggregate;
use keel_core::{
    AccessChecker, AppConfig, Application, CallerIdentity, EngineConfig, FieldError, FieldPath, KindMapper,
    ObjectReader, ResolutionError, ValidationError, ValidationSnapshot,
};
use keel_resolve::Resolver;
use keel_rollout::{default_plan, validate_batches, PlanError, Rollout};
use keel_validate::{default_validators, run_all, validate_annotations, validate_workflow, Validator};

/// API errors suitable for transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum KeelError {
    #[error("resolution: {0}")]
    Resolution(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type KeelResult<T> = Result<T, KeelError>;

impl From<ResolutionError> for KeelError {
    fn from(e: ResolutionError) -> Self { KeelError::Resolution(e.to_string()) }
}

/// Outcome of one admission review.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    /// Defaulted object to admit in place of the submitted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patched: Option<serde_json::Value>,
}

impl Verdict {
    pub fn allow() -> Self { Self { allowed: true, ..Default::default() } }

    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self { allowed: errors.is_empty(), errors, patched: None }
    }

    /// Rejection message enumerating every offending field, empty when allowed.
    pub fn reason(&self) -> String { aggregate(&self.errors) }
}

fn field_errors(errs: Vec<ValidationError>) -> Vec<FieldError> {
    errs.into_iter().map(|e| FieldError::invalid(e.field_path(), e.to_string())).collect()
}

fn plan_field_error(e: PlanError) -> FieldError {
    let plan = FieldPath::new("spec").child("rolloutPlan");
    match e {
        PlanError::BatchCount(_) => FieldError::invalid(plan.child("numBatches"), e.to_string()),
        PlanError::NegativeTotal(_) => FieldError::invalid(plan.child("targetSize"), e.to_string()),
    }
}

/// Admission surface consumed by frontends.
#[async_trait::async_trait]
pub trait AdmissionApi: Send + Sync {
    /// Resolve an application configuration and run every snapshot pass.
    async fn review_app_config(&self, config: &AppConfig) -> KeelResult<Verdict>;

    /// Annotation, definition-permission and workflow checks for an application.
    async fn review_application(&self, app: &Application, caller: &CallerIdentity) -> KeelResult<Verdict>;

    /// Default a rollout plan and check its batches.
    async fn review_rollout(&self, rollout: &Rollout) -> KeelResult<Verdict>;
}

pub struct AdmissionEngine {
    config: EngineConfig,
    resolver: Resolver,
    permissions: PermissionResolver,
    validators: Vec<Box<dyn Validator>>,
}

impl AdmissionEngine {
    pub fn new(
        reader: Arc<dyn ObjectReader>,
        access: Arc<dyn AccessChecker>,
        mapper: Arc<dyn KindMapper>,
        config: EngineConfig,
    ) -> Self {
        let resolver =
            Resolver::new(reader.clone(), mapper, config.system_namespace.clone()).with_retry(config.fetch_retry.clone());
        let permissions = PermissionResolver::new(access, reader, config.system_namespace.clone());
        Self { config, resolver, permissions, validators: default_validators() }
    }

    /// Replace the snapshot passes.
    pub fn with_validators(mut self, validators: Vec<Box<dyn Validator>>) -> Self {
        self.validators = validators;
        self
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub async fn resolve(&self, config: &AppConfig) -> KeelResult<ValidationSnapshot> {
        Ok(self.resolver.resolve(config).await?)
    }

    fn finish(&self, kind: &'static str, name: &str, started: Instant, verdict: Verdict) -> Verdict {
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("admission_latency_ms", ms, "kind" => kind);
        if verdict.allowed {
            debug!(kind, name, took_ms = %ms, "admitted");
        } else {
            counter!("admission_rejections", 1u64, "kind" => kind);
            info!(kind, name, errors = verdict.errors.len(), reason = %verdict.reason(), "rejected");
        }
        verdict
    }
}

#[async_trait::async_trait]
impl AdmissionApi for AdmissionEngine {
    async fn review_app_config(&self, config: &AppConfig) -> KeelResult<Verdict> {
        const KIND: &str = "ApplicationConfiguration";
        counter!("admission_reviews", 1u64, "kind" => KIND);
        if config.metadata.is_deleting() {
            debug!(name = %config.metadata.name, "deleting, skipped");
            return Ok(Verdict::allow());
        }
        let started = Instant::now();
        let snapshot = match self.resolver.resolve(config).await {
            Ok(s) => s,
            Err(e) => {
                counter!("admission_rejections", 1u64, "kind" => KIND);
                info!(name = %config.metadata.name, component = %e.component(), error = %e, "resolution failed");
                return Err(e.into());
            }
        };
        let verdict = Verdict::from_errors(field_errors(run_all(&self.validators, &snapshot)));
        Ok(self.finish(KIND, &config.metadata.name, started, verdict))
    }

    async fn review_application(&self, app: &Application, caller: &CallerIdentity) -> KeelResult<Verdict> {
        const KIND: &str = "Application";
        counter!("admission_reviews", 1u64, "kind" => KIND);
        if app.metadata.is_deleting() {
            debug!(name = %app.metadata.name, "deleting, skipped");
            return Ok(Verdict::allow());
        }
        let started = Instant::now();
        let mut errors = validate_annotations(app);
        if self.config.validate_permissions {
            errors.extend(self.permissions.validate_definition_permissions(app, caller).await);
        }
        errors.extend(validate_workflow(app));
        Ok(self.finish(KIND, &app.metadata.name, started, Verdict::from_errors(errors)))
    }

    async fn review_rollout(&self, rollout: &Rollout) -> KeelResult<Verdict> {
        const KIND: &str = "Rollout";
        counter!("admission_reviews", 1u64, "kind" => KIND);
        if rollout.metadata.is_deleting() {
            return Ok(Verdict::allow());
        }
        let started = Instant::now();
        let verdict = check_rollout(rollout)?;
        Ok(self.finish(KIND, &rollout.metadata.name, started, verdict))
    }
}

/// Default a rollout plan and check its batches. Needs no collaborators.
pub fn check_rollout(rollout: &Rollout) -> KeelResult<Verdict> {
    let mut defaulted = rollout.clone();
    let changed = match default_plan(&mut defaulted.spec.rollout_plan) {
        Ok(changed) => changed,
        Err(e) => return Ok(Verdict::from_errors(vec![plan_field_error(e)])),
    };
    let mut verdict = Verdict::from_errors(field_errors(validate_batches(&defaulted.spec.rollout_plan)));
    if changed && verdict.allowed {
        verdict.patched = Some(serde_json::to_value(&defaulted).map_err(|e| KeelError::Internal(e.to_string()))?);
    }
    Ok(verdict)
}
