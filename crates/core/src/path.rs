//! Field paths and per-field diagnostics, rendered the way the API server renders them
//! (`spec.components[0].traits[1].type`).

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FieldPath {
    segments: SmallVec<[Segment; 8]>,
}

impl FieldPath {
    pub fn new(root: &str) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Segment::Field(root.to_string()));
        Self { segments }
    }

    pub fn child(mut self, name: &str) -> Self {
        self.segments.push(Segment::Field(name.to_string()));
        self
    }

    pub fn index(mut self, i: usize) -> Self {
        self.segments.push(Segment::Index(i));
        self
    }

    pub fn segments(&self) -> &[Segment] { &self.segments }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Field(name) if i == 0 => f.write_str(name)?,
                Segment::Field(name) => write!(f, ".{}", name)?,
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldErrorKind {
    Invalid,
    Forbidden,
    Required,
    Duplicate,
}

impl FieldErrorKind {
    fn label(&self) -> &'static str {
        match self {
            FieldErrorKind::Invalid => "Invalid value",
            FieldErrorKind::Forbidden => "Forbidden",
            FieldErrorKind::Required => "Required value",
            FieldErrorKind::Duplicate => "Duplicate value",
        }
    }
}

/// One offending field and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: FieldPath,
    pub kind: FieldErrorKind,
    pub detail: String,
}

impl FieldError {
    pub fn invalid(path: FieldPath, detail: impl Into<String>) -> Self {
        Self { path, kind: FieldErrorKind::Invalid, detail: detail.into() }
    }

    pub fn forbidden(path: FieldPath, detail: impl Into<String>) -> Self {
        Self { path, kind: FieldErrorKind::Forbidden, detail: detail.into() }
    }

    pub fn duplicate(path: FieldPath, detail: impl Into<String>) -> Self {
        Self { path, kind: FieldErrorKind::Duplicate, detail: detail.into() }
    }

    pub fn required(path: FieldPath, detail: impl Into<String>) -> Self {
        Self { path, kind: FieldErrorKind::Required, detail: detail.into() }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.path, self.kind.label(), self.detail)
    }
}

/// Single rejection message enumerating every field error.
pub fn aggregate(errors: &[FieldError]) -> String {
    match errors {
        [] => String::new(),
        [one] => one.to_string(),
        many => format!("[{}]", many.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_paths() {
        let p = FieldPath::new("spec").child("components").index(0).child("traits").index(1).child("type");
        assert_eq!(p.to_string(), "spec.components[0].traits[1].type");
    }

    #[test]
    fn aggregate_lists_every_error() {
        let a = FieldError::forbidden(FieldPath::new("spec").child("x"), "no");
        let b = FieldError::duplicate(FieldPath::new("spec").child("y"), "twice");
        assert_eq!(aggregate(&[a.clone()]), "spec.x: Forbidden: no");
        let msg = aggregate(&[a, b]);
        assert!(msg.starts_with('[') && msg.ends_with(']'));
        assert!(msg.contains("spec.y: Duplicate value: twice"), "msg={}", msg);
    }
}
