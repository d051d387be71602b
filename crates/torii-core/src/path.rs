//! Path-tracked access into JSON documents.
//!
//! Clinical bundles arrive in every state of disrepair, so a lookup that
//! dies halfway through a nested structure must report the exact spot it
//! reached. Errors carry the successfully descended prefix plus the step
//! that failed; steps that were never attempted are not part of the path.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// One traversal step: an object key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

impl Step {
    pub fn key(name: impl Into<String>) -> Self {
        Step::Key(name.into())
    }

    pub fn index(index: usize) -> Self {
        Step::Index(index)
    }
}

impl From<&str> for Step {
    fn from(name: &str) -> Self {
        Step::Key(name.to_string())
    }
}

impl From<usize> for Step {
    fn from(index: usize) -> Self {
        Step::Index(index)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(name) => write!(f, "{name}"),
            Step::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Renders a step sequence in FHIRPath style, e.g. `code.coding[0]`.
pub fn render(steps: &[Step]) -> String {
    let mut out = String::new();
    for step in steps {
        if !out.is_empty() && matches!(step, Step::Key(_)) {
            out.push('.');
        }
        out.push_str(&step.to_string());
    }
    out
}

/// Why a single step could not be taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessCause {
    #[error("key '{0}' not found")]
    MissingKey(String),
    #[error("index {index} out of range (length {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
}

/// A failed lookup and the steps attempted before it gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no value at '{}': {cause}", render(.path))]
pub struct AccessError {
    pub path: Vec<Step>,
    pub cause: AccessCause,
}

impl AccessError {
    /// Error for a value that exists but has the wrong shape.
    pub fn unexpected_type(path: Vec<Step>, expected: &'static str, found: &'static str) -> Self {
        Self {
            path,
            cause: AccessCause::UnexpectedType { expected, found },
        }
    }

    /// Prepends an outer step, used when unwinding through containers.
    pub fn prefixed(mut self, step: Step) -> Self {
        self.path.insert(0, step);
        self
    }
}

/// JSON type name for diagnostics.
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolves `path` against `root`, reporting exactly where a miss happened.
pub fn get<'a>(root: &'a Value, path: &[Step]) -> Result<&'a Value, AccessError> {
    let mut current = root;
    for (depth, step) in path.iter().enumerate() {
        current = descend(current, step).map_err(|cause| AccessError {
            path: path[..=depth].to_vec(),
            cause,
        })?;
    }
    Ok(current)
}

/// Mutable twin of [`get`].
pub fn get_mut<'a>(root: &'a mut Value, path: &[Step]) -> Result<&'a mut Value, AccessError> {
    let mut current = root;
    for (depth, step) in path.iter().enumerate() {
        current = descend_mut(current, step).map_err(|cause| AccessError {
            path: path[..=depth].to_vec(),
            cause,
        })?;
    }
    Ok(current)
}

/// Like [`get`], but the resolved value must be a sequence.
pub fn get_array<'a>(root: &'a Value, path: &[Step]) -> Result<&'a [Value], AccessError> {
    let value = get(root, path)?;
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| AccessError {
            path: path.to_vec(),
            cause: AccessCause::UnexpectedType {
                expected: "array",
                found: kind_of(value),
            },
        })
}

fn descend<'a>(value: &'a Value, step: &Step) -> Result<&'a Value, AccessCause> {
    match step {
        Step::Key(name) => match value {
            Value::Object(map) => map
                .get(name)
                .ok_or_else(|| AccessCause::MissingKey(name.clone())),
            other => Err(AccessCause::UnexpectedType {
                expected: "object",
                found: kind_of(other),
            }),
        },
        Step::Index(index) => match value {
            Value::Array(items) => {
                let len = items.len();
                items.get(*index).ok_or(AccessCause::OutOfRange {
                    index: *index,
                    len,
                })
            }
            other => Err(AccessCause::UnexpectedType {
                expected: "array",
                found: kind_of(other),
            }),
        },
    }
}

fn descend_mut<'a>(value: &'a mut Value, step: &Step) -> Result<&'a mut Value, AccessCause> {
    match step {
        Step::Key(name) => match value {
            Value::Object(map) => map
                .get_mut(name)
                .ok_or_else(|| AccessCause::MissingKey(name.clone())),
            other => Err(AccessCause::UnexpectedType {
                expected: "object",
                found: kind_of(other),
            }),
        },
        Step::Index(index) => match value {
            Value::Array(items) => {
                let len = items.len();
                items.get_mut(*index).ok_or(AccessCause::OutOfRange {
                    index: *index,
                    len,
                })
            }
            other => Err(AccessCause::UnexpectedType {
                expected: "array",
                found: kind_of(other),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn steps(parts: &[&str]) -> Vec<Step> {
        parts.iter().map(|p| Step::key(*p)).collect()
    }

    #[test]
    fn resolves_nested_keys_and_indices() {
        let doc = json!({"a": {"b": [10, 20, 30]}});
        let path = vec![Step::key("a"), Step::key("b"), Step::index(1)];
        assert_eq!(get(&doc, &path).unwrap(), &json!(20));
    }

    #[test]
    fn empty_path_yields_root() {
        let doc = json!({"a": 1});
        assert_eq!(get(&doc, &[]).unwrap(), &doc);
    }

    #[test]
    fn missing_key_reports_only_attempted_steps() {
        let doc = json!({"a": [1, 2]});
        let err = get(&doc, &[Step::key("b"), Step::index(0)]).unwrap_err();
        assert_eq!(err.path, vec![Step::key("b")]);
        assert_eq!(err.cause, AccessCause::MissingKey("b".to_string()));
    }

    #[test]
    fn out_of_range_includes_failing_index() {
        let doc = json!({"a": [1, 2]});
        let err = get(&doc, &[Step::key("a"), Step::index(5)]).unwrap_err();
        assert_eq!(err.path, vec![Step::key("a"), Step::index(5)]);
        assert_eq!(err.cause, AccessCause::OutOfRange { index: 5, len: 2 });
    }

    #[test]
    fn keying_into_scalar_reports_type_mismatch() {
        let doc = json!({"a": {"b": 5}});
        let err = get(&doc, &steps(&["a", "b", "c"])).unwrap_err();
        assert_eq!(err.path, steps(&["a", "b", "c"]));
        assert_eq!(
            err.cause,
            AccessCause::UnexpectedType {
                expected: "object",
                found: "number",
            }
        );
    }

    #[test]
    fn indexing_into_object_reports_type_mismatch() {
        let doc = json!({"a": {"b": 1}});
        let err = get(&doc, &[Step::key("a"), Step::index(0)]).unwrap_err();
        assert_eq!(err.path, vec![Step::key("a"), Step::index(0)]);
        assert!(matches!(err.cause, AccessCause::UnexpectedType { .. }));
    }

    #[test]
    fn get_mut_allows_in_place_updates() {
        let mut doc = json!({"entry": [{"resource": {"id": "x"}}]});
        let path = vec![
            Step::key("entry"),
            Step::index(0),
            Step::key("resource"),
            Step::key("id"),
        ];
        *get_mut(&mut doc, &path).unwrap() = json!("y");
        assert_eq!(doc["entry"][0]["resource"]["id"], json!("y"));
    }

    #[test]
    fn get_array_rejects_non_sequences() {
        let doc = json!({"code": {"coding": {"system": "s"}}});
        let err = get_array(&doc, &steps(&["code", "coding"])).unwrap_err();
        assert_eq!(err.path, steps(&["code", "coding"]));
        assert_eq!(
            err.cause,
            AccessCause::UnexpectedType {
                expected: "array",
                found: "object",
            }
        );
    }

    #[test]
    fn render_is_fhirpath_like() {
        assert_eq!(render(&[Step::key("a"), Step::index(5)]), "a[5]");
        assert_eq!(
            render(&[Step::key("entry"), Step::index(3), Step::key("resource")]),
            "entry[3].resource"
        );
        assert_eq!(render(&[]), "");
    }

    #[test]
    fn step_display_matches_render_segments() {
        assert_eq!(Step::key("resource").to_string(), "resource");
        assert_eq!(Step::index(2).to_string(), "[2]");
    }

    #[test]
    fn error_display_names_path_and_cause() {
        let doc = json!({"a": [1, 2]});
        let err = get(&doc, &[Step::key("a"), Step::index(5)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no value at 'a[5]': index 5 out of range (length 2)"
        );
    }

    #[test]
    fn prefixed_prepends_outer_context() {
        let err = AccessError {
            path: vec![Step::key("meta")],
            cause: AccessCause::MissingKey("meta".to_string()),
        }
        .prefixed(Step::key("resource"));
        assert_eq!(err.path, vec![Step::key("resource"), Step::key("meta")]);
    }
}
