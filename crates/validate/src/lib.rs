//! Keel validation passes.
//!
//! Each pass reads one resolved [`ValidationSnapshot`] and returns every violation it
//! finds; an empty list means the pass succeeded. Passes are independent and never mutate
//! the snapshot.

#![forbid(unsafe_code)]

pub mod applicability;
pub mod application;
pub mod conflict;
pub mod identity;

use keel_core::{ValidationError, ValidationSnapshot};
use tracing::debug;

pub use applicability::{applies, check_applicability};
pub use application::{parse_duration, validate_annotations, validate_workflow};
pub use conflict::{check_conflicts, detect_conflicts};
pub use identity::{check_identity, check_revision_names, check_workload_names};

/// A validation pass over a resolved snapshot.
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, snapshot: &ValidationSnapshot) -> Vec<ValidationError>;
}

/// Adapts a plain function into a [`Validator`].
pub struct FnValidator {
    name: &'static str,
    run: fn(&ValidationSnapshot) -> Vec<ValidationError>,
}

impl FnValidator {
    pub const fn new(name: &'static str, run: fn(&ValidationSnapshot) -> Vec<ValidationError>) -> Self {
        Self { name, run }
    }
}

impl Validator for FnValidator {
    fn name(&self) -> &'static str { self.name }
    fn validate(&self, snapshot: &ValidationSnapshot) -> Vec<ValidationError> { (self.run)(snapshot) }
}

/// Passes run on every application configuration.
pub fn default_validators() -> Vec<Box<dyn Validator>> {
    vec![
        Box::new(FnValidator::new("revision-name", check_revision_names)),
        Box::new(FnValidator::new("workload-name", check_workload_names)),
        Box::new(FnValidator::new("trait-applicability", check_applicability)),
        Box::new(FnValidator::new("trait-conflict", check_conflicts)),
    ]
}

/// Run every pass to completion and concatenate their findings in pass order.
pub fn run_all(validators: &[Box<dyn Validator>], snapshot: &ValidationSnapshot) -> Vec<ValidationError> {
    let mut errs = Vec::new();
    for v in validators {
        let found = v.validate(snapshot);
        debug!(pass = v.name(), errors = found.len(), "validation pass done");
        errs.extend(found);
    }
    errs
}
