//! Structural checks on Application objects: workflow step names, step timeouts and the
//! versioning annotations.

use keel_core::{Application, FieldError, FieldPath, ANNOTATION_AUTO_UPDATE, ANNOTATION_PUBLISH_VERSION};
use rustc_hash::FxHashSet;

const TIMEOUT_HINT: &str = "invalid timeout, please use the format of timeout like 1s, 1m, 1h or 1d";

/// Parse a Go duration string such as `300ms`, `-1.5h` or `2h45m` into signed nanoseconds.
/// Overflowing values are errors.
pub fn parse_duration(s: &str) -> Result<i64, String> {
    go_parse_duration::parse_duration(s).map_err(|e| format!("invalid duration {:?}: {:?}", s, e))
}

/// Step names are unique across steps and sub-steps; every set timeout must parse.
pub fn validate_workflow(app: &Application) -> Vec<FieldError> {
    let Some(workflow) = &app.spec.workflow else { return Vec::new() };
    let mut errs = Vec::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let steps = FieldPath::new("spec").child("workflow").child("steps");
    for (i, step) in workflow.steps.iter().enumerate() {
        let path = steps.clone().index(i);
        if !seen.insert(step.name.as_str()) {
            errs.push(FieldError::duplicate(path.clone().child("name"), format!("{:?}: duplicated step name", step.name)));
        }
        if let Some(timeout) = step.timeout.as_deref().filter(|t| !t.is_empty()) {
            if parse_duration(timeout).is_err() {
                errs.push(FieldError::invalid(path.clone().child("timeout"), format!("{:?}: {}", timeout, TIMEOUT_HINT)));
            }
        }
        for (j, sub) in step.sub_steps.iter().enumerate() {
            let sub_path = path.clone().child("subSteps").index(j);
            if !seen.insert(sub.name.as_str()) {
                errs.push(FieldError::duplicate(sub_path.clone().child("name"), format!("{:?}: duplicated step name", sub.name)));
            }
            if let Some(timeout) = sub.timeout.as_deref().filter(|t| !t.is_empty()) {
                if parse_duration(timeout).is_err() {
                    errs.push(FieldError::invalid(sub_path.child("timeout"), format!("{:?}: {}", timeout, TIMEOUT_HINT)));
                }
            }
        }
    }
    errs
}

/// `autoUpdate` and `publishVersion` cannot both be in effect.
pub fn validate_annotations(app: &Application) -> Vec<FieldError> {
    let annotations = &app.metadata.annotations;
    let auto_update = annotations.get(ANNOTATION_AUTO_UPDATE).map(String::as_str) == Some("true");
    let publish_version = annotations.get(ANNOTATION_PUBLISH_VERSION).map(|v| !v.is_empty()).unwrap_or(false);
    if auto_update && publish_version {
        return vec![FieldError::invalid(
            FieldPath::new("metadata").child("annotations"),
            "Application has both autoUpdate and publishVersion annotations. Only one can be present",
        )];
    }
    Vec::new()
}
