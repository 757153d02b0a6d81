//! Dot-path helpers shared across modules
//!
//! Three flavours of path lookup exist because filters, expressions and
//! stages read paths differently:
//!
//! - [`collect_path_values`]: filter semantics. Arrays met on the way fan out
//!   over their elements unless the next segment is a numeric index.
//! - [`resolve_path`]: expression semantics (`"$a.b"`). Arrays met on the way
//!   map the rest of the path over their elements and produce an array.
//! - [`get_nested_value`]: plain navigation through objects and array indexes.

use crate::document::Document;
use crate::value::Value;

/// Get nested value with dot notation support
///
/// Supports simple fields (`"name"`), nested objects (`"address.city"`) and
/// array indexing (`"items.0.name"`).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docmatch_core::value::Value;
/// use docmatch_core::value_utils::get_nested_value;
///
/// let doc = Value::from(json!({"address": {"city": "NYC"}}));
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&Value::from("NYC")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => {
                let index = part.parse::<usize>().ok()?;
                value = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Placeholder for array elements the rest of a path does not reach
static MISSING: Value = Value::Missing;

/// Every value reachable from `doc` by `path` under filter semantics
///
/// An empty result means the path is missing. When an array fans out, each
/// element the remaining path does not reach contributes a `Missing`
/// candidate, so `null` and `$exists: false` see the gap.
pub fn collect_path_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect_segments(doc, &segments, &mut out);
    out
}

fn collect_segments<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(head) {
                collect_segments(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect_segments(item, rest, out);
                }
            } else {
                // Implicit elemMatch: the remaining path applies to each element
                for item in items {
                    let before = out.len();
                    if item.is_object() {
                        collect_segments(item, segments, out);
                    }
                    if out.len() == before {
                        out.push(&MISSING);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Resolve `path` under expression semantics; `Missing` when absent
pub fn resolve_path(doc: &Value, path: &str) -> Value {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_segments(doc, &segments)
}

fn resolve_segments(value: &Value, segments: &[&str]) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return value.clone();
    };

    match value {
        Value::Object(map) => match map.get(head) {
            Some(child) => resolve_segments(child, rest),
            None => Value::Missing,
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_segments(item, segments))
                .filter(|found| !found.is_missing())
                .collect(),
        ),
        _ => Value::Missing,
    }
}

/// Set a value at a nested path, creating intermediate objects
///
/// Scalar intermediates are replaced by objects; arrays of objects receive
/// the value in every element.
///
/// # Examples
///
/// ```
/// use docmatch_core::document::Document;
/// use docmatch_core::value::Value;
/// use docmatch_core::value_utils::set_path;
///
/// let mut doc = Document::new();
/// set_path(&mut doc, "address.city", Value::from("NYC"));
/// assert_eq!(doc.get("address").and_then(|a| a.get("city")), Some(&Value::from("NYC")));
/// ```
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(doc, &segments, value);
}

fn set_segments(doc: &mut Document, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        doc.insert(*head, value);
        return;
    }

    if !matches!(doc.get(head), Some(Value::Object(_)) | Some(Value::Array(_))) {
        doc.insert(*head, Value::Object(Document::new()));
    }

    match doc.get_mut(head) {
        Some(Value::Object(inner)) => set_segments(inner, rest, value),
        Some(Value::Array(items)) => {
            for item in items.iter_mut() {
                if !item.is_object() {
                    *item = Value::Object(Document::new());
                }
                if let Value::Object(inner) = item {
                    set_segments(inner, rest, value.clone());
                }
            }
        }
        _ => {}
    }
}

/// Remove the leaf at `path`; ancestors are left in place
pub fn remove_path(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    remove_segments(doc, &segments);
}

fn remove_segments(doc: &mut Document, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        doc.remove(head);
        return;
    }

    match doc.get_mut(head) {
        Some(Value::Object(inner)) => remove_segments(inner, rest),
        Some(Value::Array(items)) => {
            for item in items.iter_mut() {
                if let Value::Object(inner) = item {
                    remove_segments(inner, rest);
                }
            }
        }
        _ => {}
    }
}

/// Copy the value at `path` from `source` into `target`, keeping the nesting
///
/// Used by inclusion projections: including `"a.b"` and `"a.c"` yields
/// `{a: {b, c}}`. Through arrays only object elements are kept.
pub fn include_path(source: &Document, path: &str, target: &mut Document) {
    let segments: Vec<&str> = path.split('.').collect();
    include_segments(source, &segments, target);
}

fn include_segments(source: &Document, segments: &[&str], target: &mut Document) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = source.get(head) else {
        return;
    };

    if rest.is_empty() {
        target.insert(*head, value.clone());
        return;
    }

    match value {
        Value::Object(inner) => {
            if !matches!(target.get(head), Some(Value::Object(_))) {
                target.insert(*head, Value::Object(Document::new()));
            }
            if let Some(Value::Object(out)) = target.get_mut(head) {
                include_segments(inner, rest, out);
            }
        }
        Value::Array(items) => {
            let objects: Vec<&Document> = items.iter().filter_map(Value::as_object).collect();
            let fresh = !matches!(target.get(head), Some(Value::Array(existing)) if existing.len() == objects.len());
            if fresh {
                target.insert(
                    *head,
                    Value::Array(vec![Value::Object(Document::new()); objects.len()]),
                );
            }
            if let Some(Value::Array(out_items)) = target.get_mut(head) {
                for (inner, out) in objects.into_iter().zip(out_items.iter_mut()) {
                    if let Value::Object(out) = out {
                        include_segments(inner, rest, out);
                    }
                }
            }
        }
        _ => {}
    }
}
