//! Every definition an application references, with the field paths it is referenced from.

use rustc_hash::FxHashMap;

use keel_core::{Application, DefinitionKind, FieldPath};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionUsage {
    pub kind: DefinitionKind,
    pub name: String,
    pub paths: Vec<FieldPath>,
}

#[derive(Default)]
struct Collector {
    order: Vec<DefinitionUsage>,
    index: FxHashMap<(DefinitionKind, String), usize>,
}

impl Collector {
    fn add(&mut self, kind: DefinitionKind, name: &str, path: FieldPath) {
        match self.index.get(&(kind, name.to_string())) {
            Some(&i) => self.order[i].paths.push(path),
            None => {
                self.index.insert((kind, name.to_string()), self.order.len());
                self.order.push(DefinitionUsage { kind, name: name.to_string(), paths: vec![path] });
            }
        }
    }
}

/// Distinct `(kind, name)` references in first-seen order. Components and their traits come
/// first, then policies, then workflow steps with their sub-steps.
pub fn collect_usage(app: &Application) -> Vec<DefinitionUsage> {
    let mut c = Collector::default();
    let components = FieldPath::new("spec").child("components");
    for (i, comp) in app.spec.components.iter().enumerate() {
        c.add(DefinitionKind::Component, &comp.type_name, components.clone().index(i).child("type"));
        for (j, t) in comp.traits.iter().enumerate() {
            c.add(DefinitionKind::Trait, &t.type_name, components.clone().index(i).child("traits").index(j).child("type"));
        }
    }
    let policies = FieldPath::new("spec").child("policies");
    for (i, p) in app.spec.policies.iter().enumerate() {
        c.add(DefinitionKind::Policy, &p.type_name, policies.clone().index(i).child("type"));
    }
    if let Some(workflow) = &app.spec.workflow {
        let steps = FieldPath::new("spec").child("workflow").child("steps");
        for (i, step) in workflow.steps.iter().enumerate() {
            c.add(DefinitionKind::WorkflowStep, &step.type_name, steps.clone().index(i).child("type"));
            for (j, sub) in step.sub_steps.iter().enumerate() {
                let path = steps.clone().index(i).child("subSteps").index(j).child("type");
                c.add(DefinitionKind::WorkflowStep, &sub.type_name, path);
            }
        }
    }
    c.order
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deduplicates_and_keeps_every_location() {
        let app: Application = serde_json::from_value(json!({
            "metadata": { "name": "app", "namespace": "team" },
            "spec": {
                "components": [
                    { "name": "a", "type": "webservice", "traits": [{ "type": "scaler" }] },
                    { "name": "b", "type": "webservice", "traits": [{ "type": "gateway" }, { "type": "scaler" }] }
                ],
                "policies": [{ "name": "p", "type": "topology" }],
                "workflow": { "steps": [
                    { "name": "s", "type": "deploy" },
                    { "name": "g", "type": "step-group", "subSteps": [{ "name": "s2", "type": "deploy" }] }
                ]}
            }
        }))
        .expect("application");

        let usage = collect_usage(&app);
        let names: Vec<(DefinitionKind, &str)> = usage.iter().map(|u| (u.kind, u.name.as_str())).collect();
        assert_eq!(
            names,
            vec![
                (DefinitionKind::Component, "webservice"),
                (DefinitionKind::Trait, "scaler"),
                (DefinitionKind::Trait, "gateway"),
                (DefinitionKind::Policy, "topology"),
                (DefinitionKind::WorkflowStep, "deploy"),
                (DefinitionKind::WorkflowStep, "step-group"),
            ]
        );
        let scaler: Vec<String> = usage[1].paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(scaler, vec!["spec.components[0].traits[0].type", "spec.components[1].traits[1].type"]);
        let deploy: Vec<String> = usage[4].paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(deploy, vec!["spec.workflow.steps[0].type", "spec.workflow.steps[1].subSteps[0].type"]);
    }

    #[test]
    fn same_name_different_kind_is_distinct() {
        let app: Application = serde_json::from_value(json!({
            "spec": {
                "components": [{ "name": "a", "type": "shared", "traits": [{ "type": "shared" }] }]
            }
        }))
        .expect("application");
        assert_eq!(collect_usage(&app).len(), 2);
    }

    #[test]
    fn empty_type_names_are_still_collected() {
        let app: Application = serde_json::from_value(json!({
            "spec": { "components": [{ "name": "a", "type": "" }] }
        }))
        .expect("application");
        let usage = collect_usage(&app);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].name, "");
        assert_eq!(usage[0].paths[0].to_string(), "spec.components[0].type");
    }
}
