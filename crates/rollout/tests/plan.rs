use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use keel_core::ValidationError;
use keel_rollout::{default_plan, validate_batches, Rollout, RolloutBatch, RolloutPlan};

fn rollout(yaml: &str) -> Rollout {
    serde_yaml::from_str(yaml).expect("rollout yaml")
}

fn invalid_indices(errs: &[ValidationError]) -> Vec<usize> {
    errs.iter()
        .filter_map(|e| match e {
            ValidationError::InvalidBatch { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

#[test]
fn rejects_fractions_words_and_negatives() {
    let r = rollout(
        r#"
metadata: { name: canary, namespace: default }
spec:
  rolloutPlan:
    rolloutBatches:
      - replicas: "0.2"
      - replicas: ab
      - replicas: -1
      - replicas: 2
      - replicas: "40%"
      - replicas: "3"
"#,
    );
    let errs = validate_batches(&r.spec.rollout_plan);
    assert_eq!(invalid_indices(&errs), vec![0, 1, 2]);
    assert_eq!(errs[1].field_path().to_string(), "spec.rolloutPlan.rolloutBatches[1].replicas");
    assert_eq!(errs.len(), 3);
}

#[test]
fn counts_and_totals_must_agree() {
    let plan = RolloutPlan {
        target_size: Some(4),
        num_batches: Some(3),
        rollout_batches: vec![RolloutBatch::of(3), RolloutBatch::of(2)],
    };
    let errs = validate_batches(&plan);
    assert_eq!(
        errs,
        vec![ValidationError::BatchCount { expected: 3, actual: 2 }, ValidationError::BatchTotal { total: 5, target: 4 }]
    );
}

#[test]
fn percentages_do_not_count_towards_the_total() {
    let plan = RolloutPlan {
        target_size: Some(2),
        num_batches: None,
        rollout_batches: vec![
            RolloutBatch { replicas: IntOrString::String("90%".into()), max_unavailable: None },
            RolloutBatch::of(2),
        ],
    };
    assert!(validate_batches(&plan).is_empty());
}

#[test]
fn defaulting_plans_missing_batches() {
    let mut plan = RolloutPlan { target_size: Some(8), num_batches: Some(5), rollout_batches: vec![] };
    assert_eq!(default_plan(&mut plan), Ok(true));
    let replicas: Vec<IntOrString> = plan.rollout_batches.iter().map(|b| b.replicas.clone()).collect();
    assert_eq!(replicas, [1, 1, 2, 2, 2].map(IntOrString::Int).to_vec());
    assert!(validate_batches(&plan).is_empty());
    assert_eq!(default_plan(&mut plan), Ok(false));
}

#[test]
fn defaulting_sets_num_batches_from_authored_batches() {
    let mut plan = RolloutPlan { target_size: None, num_batches: None, rollout_batches: vec![RolloutBatch::of(1); 3] };
    assert_eq!(default_plan(&mut plan), Ok(true));
    assert_eq!(plan.num_batches, Some(3));

    let mut empty = RolloutPlan::default();
    assert_eq!(default_plan(&mut empty), Ok(false));
}

#[test]
fn defaulting_reports_bad_batch_counts() {
    let mut plan = RolloutPlan { target_size: Some(3), num_batches: Some(0), rollout_batches: vec![] };
    assert!(default_plan(&mut plan).is_err());
}
