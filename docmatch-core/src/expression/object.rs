// src/expression/object.rs
//! Object operators and the scoping operators `$let` and `$literal`

use super::scope::validate_variable_name;
use super::{
    evaluate, evaluate_args, evaluate_unary, named_args, required_arg, type_mismatch,
    ExpressionFn, Scope,
};
use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::value::Value;
use std::collections::HashMap;

pub(super) fn register(registry: &mut HashMap<&'static str, ExpressionFn>) {
    registry.insert("$objectToArray", object_to_array);
    registry.insert("$arrayToObject", array_to_object);
    registry.insert("$mergeObjects", merge_objects);
    registry.insert("$literal", literal);
    registry.insert("$let", let_vars);
}

/// `{a: 1}` → `[{k: "a", v: 1}]`
fn object_to_array(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match evaluate_unary("$objectToArray", args, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::Object(doc) => Ok(Value::Array(
            doc.into_iter()
                .map(|(k, v)| {
                    let mut pair = Document::with_capacity(2);
                    pair.insert("k", Value::String(k));
                    pair.insert("v", v);
                    Value::Object(pair)
                })
                .collect(),
        )),
        other => Err(type_mismatch("$objectToArray", "an object", &other)),
    }
}

/// Accepts `[{k, v}, ...]` or `[[k, v], ...]`; a later duplicate key wins
fn array_to_object(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let items = match evaluate_unary("$arrayToObject", args, scope)? {
        v if v.is_nullish() => return Ok(Value::Null),
        Value::Array(items) => items,
        other => return Err(type_mismatch("$arrayToObject", "an array", &other)),
    };

    let mut out = Document::with_capacity(items.len());
    for item in items {
        let (key, value) = match item {
            Value::Object(mut pair) if pair.len() == 2 && pair.contains_key("k") && pair.contains_key("v") => {
                let key = pair.remove("k").unwrap_or_default();
                let value = pair.remove("v").unwrap_or_default();
                (key, value)
            }
            Value::Array(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or_default();
                let key = pair.pop().unwrap_or_default();
                (key, value)
            }
            other => {
                return Err(DocMatchError::TypeMismatch(format!(
                    "$arrayToObject requires {{k, v}} objects or [key, value] pairs, found {}",
                    other.to_json()
                )))
            }
        };
        match key {
            Value::String(key) => {
                out.insert(key, value);
            }
            other => return Err(type_mismatch("$arrayToObject", "string keys", &other)),
        }
    }
    Ok(Value::Object(out))
}

/// Shallow merge left to right; null and missing arguments are skipped
fn merge_objects(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let mut out = Document::new();
    for value in evaluate_args(args, scope)? {
        merge_into(&mut out, value)?;
    }
    Ok(Value::Object(out))
}

/// Shared with the `$mergeObjects` accumulator
pub(crate) fn merge_into(target: &mut Document, value: Value) -> Result<()> {
    match value {
        v if v.is_nullish() => Ok(()),
        Value::Object(doc) => {
            for (k, v) in doc {
                target.insert(k, v);
            }
            Ok(())
        }
        other => Err(type_mismatch("$mergeObjects", "objects", &other)),
    }
}

fn literal(args: &Value, _scope: &Scope<'_>) -> Result<Value> {
    Ok(args.clone())
}

/// `{vars: {name: expr, ...}, in: expr}`; vars are evaluated in the outer scope
fn let_vars(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let spec = named_args("$let", args, &["vars", "in"])?;
    let vars = required_arg("$let", spec, "vars")?
        .as_object()
        .ok_or_else(|| DocMatchError::QueryShape("$let 'vars' must be an object".to_string()))?;
    let body = required_arg("$let", spec, "in")?;

    let mut inner = scope.clone();
    for (name, expr) in vars {
        validate_variable_name("$let", name)?;
        let value = evaluate(expr, scope)?;
        inner = inner.bind(name.as_str(), value);
    }
    evaluate(body, &inner)
}

#[cfg(test)]
mod tests {
    use super::super::evaluate_on;
    use super::*;
    use serde_json::json;

    fn eval(expr: serde_json::Value) -> Result<Value> {
        evaluate_on(
            &Value::from(expr),
            &Value::from(json!({"dims": {"h": 2, "w": 3}, "extra": {"w": 9, "d": 1}, "none": null})),
        )
    }

    #[test]
    fn test_object_to_array_and_back() {
        let pairs = eval(json!({"$objectToArray": "$dims"})).unwrap();
        assert_eq!(pairs, Value::from(json!([{"k": "h", "v": 2}, {"k": "w", "v": 3}])));

        let back = eval(json!({"$arrayToObject": {"$objectToArray": "$dims"}})).unwrap();
        assert_eq!(back, Value::from(json!({"h": 2, "w": 3})));
    }

    #[test]
    fn test_array_to_object_pair_form_later_key_wins() {
        let result = eval(json!({"$arrayToObject": [[["a", 1], ["b", 2], ["a", 3]]]})).unwrap();
        assert_eq!(result, Value::from(json!({"a": 3, "b": 2})));
        assert!(eval(json!({"$arrayToObject": [[[1, 2]]]})).unwrap_err().is_type_mismatch());
    }

    #[test]
    fn test_merge_objects() {
        let merged = eval(json!({"$mergeObjects": ["$dims", "$extra", "$none"]})).unwrap();
        assert_eq!(merged, Value::from(json!({"h": 2, "w": 9, "d": 1})));
        assert!(eval(json!({"$mergeObjects": ["$dims", 5]})).is_err());
    }

    #[test]
    fn test_literal_is_not_evaluated() {
        assert_eq!(
            eval(json!({"$literal": {"$add": [1, 2]}})).unwrap(),
            Value::from(json!({"$add": [1, 2]}))
        );
        assert_eq!(eval(json!({"$literal": "$dims"})).unwrap(), Value::from("$dims"));
    }

    #[test]
    fn test_let_binds_variables() {
        let expr = json!({"$let": {
            "vars": {"area": {"$multiply": ["$dims.h", "$dims.w"]}},
            "in": {"$add": ["$$area", 1]}
        }});
        assert_eq!(eval(expr).unwrap(), Value::Int(7));
    }
}
