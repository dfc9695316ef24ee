//! Keel schema helpers: field paths used by component parameters and the label-selector
//! grammar used by trait conflict rules.

#![forbid(unsafe_code)]

pub mod selector;

pub use selector::{LabelSelector, Operator, Requirement, SelectorError};

/// Normalize a parameter field path to its canonical dotted form.
///
/// Accepts simple paths like `.spec.containers[0].image`; returns `None` for wildcard,
/// filter or otherwise malformed paths.
pub fn normalize_field_path(jp: &str) -> Option<String> {
    if jp.contains('?') || jp.contains('*') { return None; }
    let s = jp.strip_prefix('.').unwrap_or(jp);
    if s.is_empty() { return None; }
    for seg in s.split('.') {
        if seg.is_empty() { return None; }
        let key = match seg.find('[') {
            Some(open) => {
                // exactly one trailing [digits]
                let idx = seg[open + 1..].strip_suffix(']')?;
                if idx.is_empty() || !idx.chars().all(|c| c.is_ascii_digit()) { return None; }
                &seg[..open]
            }
            None if seg.contains(']') => return None,
            None => seg,
        };
        if key.is_empty() { return None; }
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') { return None; }
    }
    Some(s.to_string())
}

/// Whether `path` addresses the same field as `target` once both are normalized.
pub fn targets_field(path: &str, target: &str) -> bool {
    match (normalize_field_path(path), normalize_field_path(target)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
