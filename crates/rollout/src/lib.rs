//! Keel rollout planning: splits a replica count across ordered batches, defaults rollout
//! plans and checks authored batches.

#![forbid(unsafe_code)]

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_core::{ObjectMeta, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("batch count must be positive, got {0}")]
    BatchCount(i32),
    #[error("total replicas must not be negative, got {0}")]
    NegativeTotal(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutBatch {
    pub replicas: IntOrString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
}

impl RolloutBatch {
    pub fn of(replicas: i32) -> Self {
        Self { replicas: IntOrString::Int(replicas), max_unavailable: None }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RolloutPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_size: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_batches: Option<i32>,
    pub rollout_batches: Vec<RolloutBatch>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RolloutSpec {
    pub rollout_plan: RolloutPlan,
}

/// A rollout object as admitted: only the plan is inspected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rollout {
    pub metadata: ObjectMeta,
    pub spec: RolloutSpec,
}

/// Even split of `total` across `count` batches, with the remainder on the last batches.
pub fn plan_even(total: i32, count: i32) -> Result<Vec<i32>, PlanError> {
    if count <= 0 {
        return Err(PlanError::BatchCount(count));
    }
    if total < 0 {
        return Err(PlanError::NegativeTotal(total));
    }
    let base = total / count;
    let remainder = total % count;
    let larger_from = count - remainder;
    Ok((0..count).map(|i| if i < larger_from { base } else { base + 1 }).collect())
}

/// Batches of a plan: authored batches as-is, else an even split when both `targetSize`
/// and `numBatches` are set, else none.
pub fn plan_from_plan(plan: &RolloutPlan) -> Result<Vec<RolloutBatch>, PlanError> {
    if !plan.rollout_batches.is_empty() {
        return Ok(plan.rollout_batches.clone());
    }
    match (plan.target_size, plan.num_batches) {
        (Some(total), Some(count)) => Ok(plan_even(total, count)?.into_iter().map(RolloutBatch::of).collect()),
        _ => Ok(Vec::new()),
    }
}

/// Resize `batches` to `count` slots and overwrite every slot's replicas with an even split
/// of `total`. Other slot settings are kept.
pub fn fill(batches: &mut Vec<RolloutBatch>, total: i32, count: i32) -> Result<(), PlanError> {
    let split = plan_even(total, count)?;
    batches.truncate(split.len());
    for (i, replicas) in split.into_iter().enumerate() {
        match batches.get_mut(i) {
            Some(b) => b.replicas = IntOrString::Int(replicas),
            None => batches.push(RolloutBatch::of(replicas)),
        }
    }
    Ok(())
}

/// Fill in what an author left implicit. Returns whether the plan changed.
pub fn default_plan(plan: &mut RolloutPlan) -> Result<bool, PlanError> {
    if plan.rollout_batches.is_empty() {
        if let (Some(total), Some(count)) = (plan.target_size, plan.num_batches) {
            fill(&mut plan.rollout_batches, total, count)?;
            debug!(total, count, "rollout batches planned");
            return Ok(true);
        }
        return Ok(false);
    }
    if plan.num_batches.is_none() {
        plan.num_batches = Some(i32::try_from(plan.rollout_batches.len()).unwrap_or(i32::MAX));
        return Ok(true);
    }
    Ok(false)
}

/// Replica count a batch encodes: `Ok(Some(n))` for an integer, `Ok(None)` for a percentage.
fn batch_replicas(replicas: &IntOrString) -> Result<Option<i64>, String> {
    match replicas {
        IntOrString::Int(n) if *n < 0 => Err("must not be negative".to_string()),
        IntOrString::Int(n) => Ok(Some(i64::from(*n))),
        IntOrString::String(s) => {
            let (digits, percent) = match s.strip_suffix('%') {
                Some(d) => (d, true),
                None => (s.as_str(), false),
            };
            if digits.starts_with('-') && digits.len() > 1 && digits[1..].chars().all(|c| c.is_ascii_digit()) {
                return Err("must not be negative".to_string());
            }
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err("must be an integer or an integer percentage".to_string());
            }
            let n: i64 = digits.parse().map_err(|_| "is out of range".to_string())?;
            Ok(if percent { None } else { Some(n) })
        }
    }
}

fn replicas_text(replicas: &IntOrString) -> String {
    match replicas {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

/// Every malformed batch, then the count and total checks.
pub fn validate_batches(plan: &RolloutPlan) -> Vec<ValidationError> {
    let mut errs = Vec::new();
    let mut total: i64 = 0;
    for (index, batch) in plan.rollout_batches.iter().enumerate() {
        match batch_replicas(&batch.replicas) {
            Ok(n) => total += n.unwrap_or(0),
            Err(reason) => errs.push(ValidationError::InvalidBatch { index, value: replicas_text(&batch.replicas), reason }),
        }
    }
    if plan.rollout_batches.is_empty() {
        return errs;
    }
    if let Some(expected) = plan.num_batches {
        if usize::try_from(expected).ok() != Some(plan.rollout_batches.len()) {
            errs.push(ValidationError::BatchCount { expected, actual: plan.rollout_batches.len() });
        }
    }
    if let Some(target) = plan.target_size {
        if total > i64::from(target) {
            errs.push(ValidationError::BatchTotal { total, target });
        }
    }
    errs
}
