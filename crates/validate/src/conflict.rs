//! Mutually exclusive traits on one component.
//!
//! The scan stops at the first conflict of a component. Traits are visited in the order
//! they are attached, rules in the order they are declared.

use keel_core::{GroupResource, ValidatingComponent, ValidatingTrait, ValidationError, ValidationSnapshot};
use keel_schema::LabelSelector;
use tracing::debug;

const ANY: &str = "*";
const GROUP_WILDCARD: &str = "*.";
const LABEL_SELECTOR_PREFIX: &str = "labelSelector:";

enum Rule<'a> {
    Group(&'a str),
    Selector(LabelSelector),
    Exact(&'a str),
}

impl<'a> Rule<'a> {
    fn parse(rule: &'a str) -> Result<Self, ValidationError> {
        if let Some(expr) = rule.strip_prefix(LABEL_SELECTOR_PREFIX) {
            return LabelSelector::parse(expr).map(Rule::Selector).map_err(|e| {
                ValidationError::InvalidConflictSelector { rule: rule.to_string(), reason: e.to_string() }
            });
        }
        Ok(match rule.strip_prefix(GROUP_WILDCARD) {
            Some(group) => Rule::Group(group),
            None => Rule::Exact(rule),
        })
    }

    fn matches(&self, other: &ValidatingTrait) -> bool {
        let reference = other.definition.reference().resource_type_ref.as_str();
        match self {
            Rule::Group(group) => GroupResource::parse(reference).group == *group,
            Rule::Exact(rule) => (!reference.is_empty() && reference == *rule) || other.definition.name() == *rule,
            Rule::Selector(sel) => match other.definition.known() {
                Some(def) => sel.matches(&def.labels),
                None => false,
            },
        }
    }
}

/// First conflict among the traits of `component`, if any.
pub fn detect_conflicts(component: &ValidatingComponent) -> Option<ValidationError> {
    let traits = &component.traits;
    for (owner_idx, owner) in traits.iter().enumerate() {
        let Some(def) = owner.definition.known() else { continue };
        if def.conflicts_with.is_empty() {
            continue;
        }
        if traits.len() > 1 && def.conflicts_with.iter().any(|r| r == ANY) {
            return Some(ValidationError::ConflictsWithAll { owner: def.name.clone(), component: component.name.clone() });
        }
        for raw in &def.conflicts_with {
            if raw == ANY {
                continue;
            }
            let rule = match Rule::parse(raw) {
                Ok(rule) => rule,
                Err(e) => return Some(e),
            };
            for (idx, other) in traits.iter().enumerate() {
                if idx == owner_idx {
                    continue;
                }
                if rule.matches(other) {
                    debug!(component = %component.name, owner = %def.name, other = %other.definition.name(), rule = %raw, "trait conflict");
                    return Some(ValidationError::TraitConflict {
                        rule: raw.clone(),
                        owner: def.name.clone(),
                        other: other.definition.name().to_string(),
                        component: component.name.clone(),
                    });
                }
            }
        }
    }
    None
}

/// The first conflict of every component.
pub fn check_conflicts(snapshot: &ValidationSnapshot) -> Vec<ValidationError> {
    snapshot.components.iter().filter_map(detect_conflicts).collect()
}
