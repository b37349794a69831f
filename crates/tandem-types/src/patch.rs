//! Structural patches between two state snapshots.
//!
//! A [`Patch`] is an ordered list of `add` / `replace` / `remove` operations
//! addressed by JSON Pointer paths. [`diff`] produces operations that, applied
//! in order to the previous snapshot, reproduce the next one exactly.
//!
//! ```text
//!   prev ──diff──▶ [ {op:remove,path:/a/1}, {op:add,path:/b,value:..} ] ──apply(prev)──▶ next
//! ```
//!
//! Array changes are expressed per index: a shared prefix is diffed
//! element-wise, growth appends, shrinkage removes from the tail backwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from applying a patch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("invalid JSON pointer `{0}`")]
    InvalidPointer(String),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("index {index} out of bounds (len {len}) at {path}")]
    IndexOutOfBounds { path: String, index: usize, len: usize },
    #[error("cannot address into a scalar at {0}")]
    NotAContainer(String),
}

/// One patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => {
                path
            }
        }
    }
}

/// An ordered sequence of operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Vec<PatchOp>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.0
    }

    pub fn push(&mut self, op: PatchOp) {
        self.0.push(op);
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.0).unwrap_or(Value::Array(Vec::new()))
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl From<Vec<PatchOp>> for Patch {
    fn from(ops: Vec<PatchOp>) -> Self {
        Self(ops)
    }
}

/// Escape one reference token (RFC 6901).
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(path.to_string()));
    };
    Ok(rest.split('/').map(unescape_token).collect())
}

/// Compute the patch that turns `prev` into `next`.
///
/// Equal inputs yield an empty patch.
pub fn diff(prev: &Value, next: &Value) -> Patch {
    let mut ops = Vec::new();
    diff_value(prev, next, "", &mut ops);
    Patch(ops)
}

fn diff_value(prev: &Value, next: &Value, path: &str, ops: &mut Vec<PatchOp>) {
    if prev == next {
        return;
    }

    match (prev, next) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let child = format!("{path}/{}", escape_token(key));
                match b.get(key) {
                    Some(new) => diff_value(old, new, &child, ops),
                    None => ops.push(PatchOp::Remove { path: child }),
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    ops.push(PatchOp::Add {
                        path: format!("{path}/{}", escape_token(key)),
                        value: new.clone(),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                diff_value(&a[i], &b[i], &format!("{path}/{i}"), ops);
            }
            if b.len() > a.len() {
                for (i, value) in b.iter().enumerate().skip(common) {
                    ops.push(PatchOp::Add {
                        path: format!("{path}/{i}"),
                        value: value.clone(),
                    });
                }
            } else {
                for i in (common..a.len()).rev() {
                    ops.push(PatchOp::Remove {
                        path: format!("{path}/{i}"),
                    });
                }
            }
        }
        _ => ops.push(PatchOp::Replace {
            path: path.to_string(),
            value: next.clone(),
        }),
    }
}

/// Apply `patch` to `doc`.
///
/// Application is atomic: on error `doc` is left exactly as it was.
pub fn apply(doc: &mut Value, patch: &Patch) -> Result<(), PatchError> {
    let mut work = doc.clone();
    for op in patch.ops() {
        apply_op(&mut work, op)?;
    }
    *doc = work;
    Ok(())
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let path = op.path();
    let mut tokens = parse_pointer(path)?;

    match op {
        PatchOp::Replace { value, .. } => {
            let target = resolve_mut(doc, &tokens, path)?;
            *target = value.clone();
            Ok(())
        }
        PatchOp::Add { value, .. } => {
            let Some(last) = tokens.pop() else {
                *doc = value.clone();
                return Ok(());
            };
            match resolve_mut(doc, &tokens, path)? {
                Value::Object(map) => {
                    map.insert(last, value.clone());
                    Ok(())
                }
                Value::Array(items) => {
                    let len = items.len();
                    let index = if last == "-" { len } else { parse_index(&last, path)? };
                    if index > len {
                        return Err(PatchError::IndexOutOfBounds {
                            path: path.to_string(),
                            index,
                            len,
                        });
                    }
                    items.insert(index, value.clone());
                    Ok(())
                }
                _ => Err(PatchError::NotAContainer(path.to_string())),
            }
        }
        PatchOp::Remove { .. } => {
            let Some(last) = tokens.pop() else {
                return Err(PatchError::InvalidPointer(path.to_string()));
            };
            match resolve_mut(doc, &tokens, path)? {
                Value::Object(map) => map
                    .remove(&last)
                    .map(|_| ())
                    .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
                Value::Array(items) => {
                    let index = parse_index(&last, path)?;
                    if index >= items.len() {
                        return Err(PatchError::IndexOutOfBounds {
                            path: path.to_string(),
                            index,
                            len: items.len(),
                        });
                    }
                    items.remove(index);
                    Ok(())
                }
                _ => Err(PatchError::NotAContainer(path.to_string())),
            }
        }
    }
}

fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    // Leading zeros are not valid array indices.
    if token.len() > 1 && token.starts_with('0') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    token
        .parse()
        .map_err(|_| PatchError::InvalidPointer(path.to_string()))
}

fn resolve_mut<'a>(
    doc: &'a mut Value,
    tokens: &[String],
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?,
            Value::Array(items) => {
                let index = parse_index(token, path)?;
                let len = items.len();
                items.get_mut(index).ok_or_else(|| PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len,
                })?
            }
            _ => return Err(PatchError::NotAContainer(path.to_string())),
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(prev: Value, next: Value) {
        let patch = diff(&prev, &next);
        let mut doc = prev.clone();
        apply(&mut doc, &patch).expect("patch applies to its own base");
        assert_eq!(doc, next, "patch {patch:?}");
    }

    #[test]
    fn test_no_change_is_empty() {
        let state = json!({ "a": [1, 2], "b": { "c": null } });
        assert!(diff(&state, &state.clone()).is_empty());
    }

    #[test]
    fn test_nested_object_changes() {
        roundtrip(
            json!({ "user": { "name": "ann", "tags": ["x"] }, "gone": 1 }),
            json!({ "user": { "name": "bea", "tags": ["x", "y"] }, "new": { "k": true } }),
        );
    }

    #[test]
    fn test_array_shrink_removes_from_tail() {
        let patch = diff(&json!([1, 2, 3, 4]), &json!([1, 9]));
        let paths: Vec<_> = patch.ops().iter().map(PatchOp::path).collect();
        assert_eq!(paths, vec!["/1", "/3", "/2"]);
        roundtrip(json!([1, 2, 3, 4]), json!([1, 9]));
    }

    #[test]
    fn test_type_change_and_root_replace() {
        roundtrip(json!({ "a": [1] }), json!({ "a": { "b": 1 } }));
        roundtrip(json!(1), json!("one"));
    }

    #[test]
    fn test_keys_needing_escape() {
        roundtrip(json!({}), json!({ "a/b": 1, "c~d": 2 }));
        let patch = diff(&json!({}), &json!({ "a/b": 1 }));
        assert_eq!(patch.ops()[0].path(), "/a~1b");
    }

    #[test]
    fn test_wire_format() {
        let patch = diff(&json!({ "a": 1 }), &json!({ "a": 2 }));
        assert_eq!(patch.to_value(), json!([{ "op": "replace", "path": "/a", "value": 2 }]));
        let back = Patch::from_value(patch.to_value()).expect("decode");
        assert_eq!(back, patch);
    }

    #[test]
    fn test_stale_base_is_rejected_and_doc_untouched() {
        let base = json!({});
        let first = json!({ "a": { "n": 1 } });
        let second = json!({ "a": { "n": 2 } });
        let later = diff(&first, &second);

        // Skipping the patch that created `/a` must fail.
        let mut doc = base.clone();
        let err = apply(&mut doc, &later).unwrap_err();
        assert_eq!(err, PatchError::PathNotFound("/a/n".into()));
        assert_eq!(doc, base);
    }

    #[test]
    fn test_add_index_bounds() {
        let mut doc = json!([1]);
        let patch = Patch::from(vec![PatchOp::Add { path: "/5".into(), value: json!(2) }]);
        assert!(matches!(
            apply(&mut doc, &patch),
            Err(PatchError::IndexOutOfBounds { index: 5, len: 1, .. })
        ));

        let append = Patch::from(vec![PatchOp::Add { path: "/-".into(), value: json!(2) }]);
        apply(&mut doc, &append).expect("append");
        assert_eq!(doc, json!([1, 2]));
    }

    #[test]
    fn test_invalid_pointer() {
        let mut doc = json!({});
        let patch = Patch::from(vec![PatchOp::Replace { path: "a".into(), value: json!(1) }]);
        assert_eq!(
            apply(&mut doc, &patch),
            Err(PatchError::InvalidPointer("a".into()))
        );
    }
}
