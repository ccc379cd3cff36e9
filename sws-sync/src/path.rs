//! Path addressing inside a single JSON document.
//!
//! A [`Path`] is a list of steps, each either an object key or an array
//! index. Reads never allocate; writes consume the old root and return the
//! new one, creating intermediate containers on the way:
//!
//! ```text
//! set_at_path(None, ["a", 0], "x")   →  {"a": ["x"]}
//! set_at_path(None, [0, "a"], "x")   →  [{"a": "x"}]
//! ```
//!
//! Objects and arrays share one step-application path: an index step on an
//! object addresses the stringified key, and a numeric key step on an array
//! addresses that index.
//!
//! Writing past the end of an array pads it with `null`, at most
//! [`MAX_ARRAY_PADDING`] slots per step.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::PathError;

/// Most `null` slots a single index step may add in front of the written one.
pub const MAX_ARRAY_PADDING: usize = 4096;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    Index(usize),
    Key(String),
}

/// Ordered key/index sequence. The empty path is the whole document.
pub type Path = Vec<PathStep>;

impl PathStep {
    /// Key used when this step is applied to an object.
    pub fn object_key(&self) -> String {
        match self {
            PathStep::Key(key) => key.clone(),
            PathStep::Index(index) => index.to_string(),
        }
    }

    /// Index used when this step is applied to an array.
    ///
    /// Key steps only qualify when they are the canonical decimal form of
    /// an index (`"2"`, not `"02"`).
    pub fn array_index(&self) -> Option<usize> {
        match self {
            PathStep::Index(index) => Some(*index),
            PathStep::Key(key) => key
                .parse::<usize>()
                .ok()
                .filter(|index| index.to_string() == *key),
        }
    }

    /// The container auto-vivified in front of this step.
    fn empty_container(&self) -> Value {
        match self {
            PathStep::Key(_) => Value::Object(Map::new()),
            PathStep::Index(_) => Value::Array(Vec::new()),
        }
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Key(key) => f.write_str(key),
            PathStep::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathStep {
    fn from(key: &str) -> Self {
        PathStep::Key(key.to_string())
    }
}

impl From<String> for PathStep {
    fn from(key: String) -> Self {
        PathStep::Key(key)
    }
}

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

/// Registry key for a path: the steps joined with `.`.
pub fn path_key(path: &[PathStep]) -> String {
    path.iter()
        .map(PathStep::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Parse a dotted path. Segments made of ASCII digits become indices.
///
/// The empty string parses to the empty path.
pub fn parse_path(dotted: &str) -> Path {
    if dotted.is_empty() {
        return Vec::new();
    }
    dotted
        .split('.')
        .map(|segment| match segment.parse::<usize>() {
            Ok(index) if segment.bytes().all(|b| b.is_ascii_digit()) => PathStep::Index(index),
            _ => PathStep::Key(segment.to_string()),
        })
        .collect()
}

/// Read the value at `path` inside `root`.
///
/// Returns `None` as soon as a non-container is met before the path is
/// exhausted, or when the final step is absent.
pub fn get_at_path<'a>(root: Option<&'a Value>, path: &[PathStep]) -> Option<&'a Value> {
    let mut target = root;
    for step in path {
        target = match target? {
            Value::Object(map) => map.get(&step.object_key()),
            Value::Array(items) => step.array_index().and_then(|index| items.get(index)),
            _ => return None,
        };
    }
    target
}

/// Write `value` at `path`, returning the new root.
///
/// - An empty path returns `value` itself.
/// - Missing or non-container nodes along the way become `{}` or `[]`,
///   chosen by the type of the step that will be applied to them.
/// - Writing `None` removes an object key (or nulls an array slot), so a
///   later read yields `None` exactly as for a key that never existed.
///
/// The old root is consumed: a caller holding a clone never observes the
/// edit. On error it is handed back untouched.
pub fn set_at_path(
    root: Option<Value>,
    path: &[PathStep],
    value: Option<Value>,
) -> Result<Option<Value>, (PathError, Option<Value>)> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(value);
    };
    if let Err(e) = check_padding(root.as_ref(), path) {
        return Err((e, root));
    }

    let mut root = match root {
        Some(node @ (Value::Object(_) | Value::Array(_))) => node,
        _ => path[0].empty_container(),
    };

    let mut target = &mut root;
    for (i, step) in parents.iter().enumerate() {
        let slot = slot_mut(target, step);
        if !slot.is_object() && !slot.is_array() {
            *slot = path[i + 1].empty_container();
        }
        target = slot;
    }

    match value {
        Some(value) => *slot_mut(target, last) = value,
        None => remove(target, last),
    }

    Ok(Some(root))
}

/// Reject a write whose index steps would pad an array by more than
/// [`MAX_ARRAY_PADDING`] slots. Walks the same containers `set_at_path`
/// would, before anything is mutated.
fn check_padding(root: Option<&Value>, path: &[PathStep]) -> Result<(), PathError> {
    let mut target = root;
    for step in path {
        target = match target {
            Some(Value::Object(map)) => map.get(&step.object_key()),
            Some(Value::Array(items)) => match step.array_index() {
                Some(index) => {
                    ensure_padding(index, items.len())?;
                    items.get(index)
                }
                // Converted to an object; any key is fine.
                None => None,
            },
            // Vivified: an index step gets a fresh empty array.
            _ => {
                if let PathStep::Index(index) = step {
                    ensure_padding(*index, 0)?;
                }
                None
            }
        };
    }
    Ok(())
}

fn ensure_padding(index: usize, len: usize) -> Result<(), PathError> {
    if index.saturating_sub(len) > MAX_ARRAY_PADDING {
        return Err(PathError::IndexOutOfRange { index, len });
    }
    Ok(())
}

/// Mutable slot for `step` inside the container `target`, created as
/// `null` when absent. Arrays grow with `null` padding.
fn slot_mut<'a>(target: &'a mut Value, step: &PathStep) -> &'a mut Value {
    match (target, step.array_index()) {
        (Value::Array(items), Some(index)) => {
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[index]
        }
        (target, _) => object_entry(target, step.object_key()),
    }
}

/// Entry `key` of `target`, turning `target` into an object first if needed.
///
/// An array keeps its elements under their stringified indices.
fn object_entry(target: &mut Value, key: String) -> &mut Value {
    match target {
        Value::Object(map) => map.entry(key).or_insert(Value::Null),
        other => {
            let converted = match other.take() {
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), item))
                    .collect(),
                _ => Map::new(),
            };
            *other = Value::Object(converted);
            object_entry(other, key)
        }
    }
}

fn remove(target: &mut Value, step: &PathStep) {
    if let Value::Object(map) = target {
        map.remove(&step.object_key());
    } else if target.is_array() && step.array_index().is_some() {
        *slot_mut(target, step) = Value::Null;
    }
    // A non-numeric key on an array is already absent.
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(steps: &[PathStep]) -> Path {
        steps.to_vec()
    }

    fn k(key: &str) -> PathStep {
        PathStep::Key(key.to_string())
    }

    fn i(index: usize) -> PathStep {
        PathStep::Index(index)
    }

    fn write(root: Option<Value>, path: &[PathStep], value: Option<Value>) -> Option<Value> {
        set_at_path(root, path, value).unwrap()
    }

    #[test]
    fn test_empty_path_replaces_root() {
        let root = Some(json!({"a": 1}));
        assert_eq!(write(root, &[], Some(json!(5))), Some(json!(5)));
        assert_eq!(write(Some(json!([1])), &[], None), None);
    }

    #[test]
    fn test_vivification_object_then_array() {
        let root = write(None, &p(&[k("a"), i(0)]), Some(json!("x")));
        assert_eq!(root, Some(json!({"a": ["x"]})));
    }

    #[test]
    fn test_vivification_array_then_object() {
        let root = write(None, &p(&[i(0), k("a")]), Some(json!("x")));
        assert_eq!(root, Some(json!([{"a": "x"}])));
    }

    #[test]
    fn test_vivification_replaces_scalars_at_every_level() {
        let root = Some(json!({"a": 3, "keep": true}));
        let root = write(root, &p(&[k("a"), k("b"), i(1)]), Some(json!(null)));
        assert_eq!(root, Some(json!({"a": {"b": [null, null]}, "keep": true})));

        let root = write(Some(json!("scalar")), &p(&[k("z")]), Some(json!(1)));
        assert_eq!(root, Some(json!({"z": 1})));
    }

    #[test]
    fn test_write_then_read() {
        let paths = [
            p(&[k("a")]),
            p(&[i(3)]),
            p(&[k("a"), k("b"), k("c")]),
            p(&[k("list"), i(2), k("name")]),
            p(&[i(0), i(0), i(0)]),
        ];
        let value = json!({"nested": [1, 2, {"deep": "yes"}]});
        for path in &paths {
            let root = write(None, path, Some(value.clone()));
            assert_eq!(get_at_path(root.as_ref(), path), Some(&value), "path {path:?}");
        }
    }

    #[test]
    fn test_overlapping_writes_keep_siblings() {
        let root = write(None, &p(&[k("a"), k("x")]), Some(json!(1)));
        let root = write(root, &p(&[k("a"), k("y")]), Some(json!(2)));
        assert_eq!(root, Some(json!({"a": {"x": 1, "y": 2}})));
    }

    #[test]
    fn test_original_root_untouched() {
        let original = json!({"a": {"b": 1}});
        let kept = original.clone();
        let updated = write(Some(original), &p(&[k("a"), k("b")]), Some(json!(2)));
        assert_eq!(kept, json!({"a": {"b": 1}}));
        assert_eq!(updated, Some(json!({"a": {"b": 2}})));
    }

    #[test]
    fn test_index_step_on_object_uses_string_key() {
        let root = write(Some(json!({})), &p(&[i(0)]), Some(json!("zero")));
        assert_eq!(root, Some(json!({"0": "zero"})));
        assert_eq!(get_at_path(root.as_ref(), &[i(0)]), Some(&json!("zero")));
        assert_eq!(get_at_path(root.as_ref(), &[k("0")]), Some(&json!("zero")));
    }

    #[test]
    fn test_numeric_key_on_array_indexes() {
        let root = Some(json!(["a", "b"]));
        assert_eq!(get_at_path(root.as_ref(), &[k("1")]), Some(&json!("b")));
        assert_eq!(get_at_path(root.as_ref(), &[k("01")]), None);
        let root = write(root, &[k("1")], Some(json!("c")));
        assert_eq!(root, Some(json!(["a", "c"])));
    }

    #[test]
    fn test_named_key_on_array_converts_to_object() {
        let root = write(Some(json!(["a"])), &[k("name")], Some(json!(1)));
        assert_eq!(root, Some(json!({"0": "a", "name": 1})));
    }

    #[test]
    fn test_array_index_pads_with_null() {
        let root = write(None, &[i(2)], Some(json!(true)));
        assert_eq!(root, Some(json!([null, null, true])));
    }

    #[test]
    fn test_padding_limit() {
        let root = write(None, &[i(MAX_ARRAY_PADDING)], Some(json!(1)));
        assert_eq!(root.as_ref().and_then(Value::as_array).map(Vec::len), Some(MAX_ARRAY_PADDING + 1));

        let (err, kept) = set_at_path(root.clone(), &[i(usize::MAX)], Some(json!(1))).unwrap_err();
        assert_eq!(
            err,
            PathError::IndexOutOfRange {
                index: usize::MAX,
                len: MAX_ARRAY_PADDING + 1
            }
        );
        assert_eq!(kept, root);
    }

    #[test]
    fn test_padding_limit_applies_to_vivified_and_nested_arrays() {
        let root = Some(json!({"list": [1, 2]}));
        let too_far = 2 + MAX_ARRAY_PADDING + 1;

        let (err, kept) =
            set_at_path(root.clone(), &[k("list"), i(too_far)], Some(json!(0))).unwrap_err();
        assert_eq!(err, PathError::IndexOutOfRange { index: too_far, len: 2 });
        assert_eq!(kept, root);

        // Numeric key steps count as indices on arrays.
        let key = too_far.to_string();
        assert!(set_at_path(root.clone(), &[k("list"), k(&key)], None).is_err());

        // A fresh container in front of an index step starts empty.
        assert!(set_at_path(root.clone(), &[k("new"), i(4_000_000_000)], Some(json!(0))).is_err());
        assert!(set_at_path(None, &[i(0), k("a"), i(MAX_ARRAY_PADDING + 1)], Some(json!(0))).is_err());
    }

    #[test]
    fn test_get_stops_at_scalar_or_missing() {
        let root = json!({"a": 1, "n": null});
        assert_eq!(get_at_path(Some(&root), &[k("a"), k("b")]), None);
        assert_eq!(get_at_path(Some(&root), &[k("n"), k("b")]), None);
        assert_eq!(get_at_path(Some(&root), &[k("missing")]), None);
        assert_eq!(get_at_path(None, &[k("a")]), None);
        assert_eq!(get_at_path(Some(&root), &[]), Some(&root));
    }

    #[test]
    fn test_undefined_write_reads_as_absent() {
        let root = write(None, &[k("a")], Some(json!(1)));
        let root = write(root, &[k("a")], None);
        assert_eq!(get_at_path(root.as_ref(), &[k("a")]), None);
        assert_eq!(root, Some(json!({})));

        let root = write(Some(json!([1, 2])), &[i(0)], None);
        assert_eq!(root, Some(json!([null, 2])));
    }

    #[test]
    fn test_path_key_and_parse() {
        let path = p(&[k("btn1"), i(0), k("press")]);
        assert_eq!(path_key(&path), "btn1.0.press");
        assert_eq!(parse_path("btn1.0.press"), path);
        assert_eq!(parse_path(""), Vec::<PathStep>::new());
        assert_eq!(parse_path("+1"), vec![k("+1")]);
    }

    #[test]
    fn test_path_step_serde_untagged() {
        let path: Path = serde_json::from_str(r#"["a", 0, "b"]"#).unwrap();
        assert_eq!(path, p(&[k("a"), i(0), k("b")]));
        assert_eq!(serde_json::to_string(&path).unwrap(), r#"["a",0,"b"]"#);
        assert!(serde_json::from_str::<Path>("[-1]").is_err());
    }
}
