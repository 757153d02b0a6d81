// src/expression/array.rs
//! Array operators, including the higher-order `$filter`, `$map` and `$reduce`.

use super::scope::validate_variable_name;
use super::{
    evaluate, evaluate_args, evaluate_exact, evaluate_range, evaluate_unary, expect_i64,
    named_args, required_arg, type_mismatch, ExpressionFn, Scope,
};
use crate::error::{DocMatchError, Result};
use crate::value::{values_equal, Value};
use std::collections::HashMap;

pub(super) fn register(registry: &mut HashMap<&'static str, ExpressionFn>) {
    registry.insert("$arrayElemAt", array_elem_at);
    registry.insert("$concatArrays", concat_arrays);
    registry.insert("$filter", filter);
    registry.insert("$map", map);
    registry.insert("$reduce", reduce);
    registry.insert("$size", size);
    registry.insert("$slice", slice);
    registry.insert("$reverseArray", reverse_array);
    registry.insert("$in", is_in);
    registry.insert("$isArray", is_array);
    registry.insert("$first", first);
    registry.insert("$last", last);
    registry.insert("$indexOfArray", index_of_array);
    registry.insert("$range", range);
}

/// Array argument; `None` when it is null or missing
fn nullable_array(op: &str, value: Value) -> Result<Option<Vec<Value>>> {
    match value {
        v if v.is_nullish() => Ok(None),
        Value::Array(items) => Ok(Some(items)),
        other => Err(type_mismatch(op, "an array", &other)),
    }
}

/// Resolve a possibly negative index against `len`
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

fn array_elem_at(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let mut values = evaluate_exact("$arrayElemAt", args, scope, 2)?;
    let index = values.pop().unwrap_or_default();
    let Some(items) = nullable_array("$arrayElemAt", values.pop().unwrap_or_default())? else {
        return Ok(Value::Null);
    };
    if index.is_nullish() {
        return Ok(Value::Null);
    }
    let index = expect_i64("$arrayElemAt", &index)?;

    Ok(match resolve_index(index, items.len()) {
        Some(i) => items.into_iter().nth(i).unwrap_or(Value::Missing),
        None => Value::Missing,
    })
}

fn concat_arrays(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let mut out = Vec::new();
    for value in evaluate_args(args, scope)? {
        match nullable_array("$concatArrays", value)? {
            Some(items) => out.extend(items),
            None => return Ok(Value::Null),
        }
    }
    Ok(Value::Array(out))
}

/// The `as` variable name of `$filter`/`$map`, defaulting to `this`
fn loop_variable(op: &str, spec: &crate::document::Document) -> Result<String> {
    match spec.get("as") {
        Some(Value::String(name)) => {
            validate_variable_name(op, name)?;
            Ok(name.clone())
        }
        Some(other) => Err(type_mismatch(op, "a string for 'as'", other)),
        None => Ok("this".to_string()),
    }
}

/// `{input, as?, cond, limit?}`
fn filter(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let op = "$filter";
    let spec = named_args(op, args, &["input", "as", "cond", "limit"])?;
    let input = evaluate(required_arg(op, spec, "input")?, scope)?;
    let cond = required_arg(op, spec, "cond")?;
    let name = loop_variable(op, spec)?;

    let limit = match spec.get("limit") {
        Some(expr) => match evaluate(expr, scope)? {
            v if v.is_nullish() => None,
            v => {
                let n = expect_i64(op, &v)?;
                if n < 1 {
                    return Err(DocMatchError::QueryShape(format!(
                        "$filter limit must be a positive integer, got {}",
                        n
                    )));
                }
                Some(n as usize)
            }
        },
        None => None,
    };

    let Some(items) = nullable_array(op, input)? else {
        return Ok(Value::Null);
    };

    let mut kept = Vec::new();
    for item in items {
        if limit.is_some_and(|limit| kept.len() >= limit) {
            break;
        }
        let inner = scope.bind(name.as_str(), item.clone());
        if evaluate(cond, &inner)?.is_truthy() {
            kept.push(item);
        }
    }
    Ok(Value::Array(kept))
}

/// `{input, as?, in}`
fn map(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let op = "$map";
    let spec = named_args(op, args, &["input", "as", "in"])?;
    let input = evaluate(required_arg(op, spec, "input")?, scope)?;
    let body = required_arg(op, spec, "in")?;
    let name = loop_variable(op, spec)?;

    let Some(items) = nullable_array(op, input)? else {
        return Ok(Value::Null);
    };

    items
        .into_iter()
        .map(|item| {
            let inner = scope.bind(name.as_str(), item);
            evaluate(body, &inner).map(Value::or_null)
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

/// `{input, initialValue, in}` with `$$value` (accumulator) and `$$this`
fn reduce(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let op = "$reduce";
    let spec = named_args(op, args, &["input", "initialValue", "in"])?;
    let input = evaluate(required_arg(op, spec, "input")?, scope)?;
    let initial = required_arg(op, spec, "initialValue")?;
    let body = required_arg(op, spec, "in")?;

    let Some(items) = nullable_array(op, input)? else {
        return Ok(Value::Null);
    };

    let mut acc = evaluate(initial, scope)?;
    for item in items {
        let inner = scope.bind("value", acc).bind("this", item);
        acc = evaluate(body, &inner)?;
    }
    Ok(acc)
}

fn size(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match evaluate_unary("$size", args, scope)? {
        Value::Array(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(type_mismatch("$size", "an array", &other)),
    }
}

/// `[array, n]` or `[array, position, n]`
fn slice(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_range("$slice", args, scope, 2, 3)?;
    if values.iter().any(Value::is_nullish) {
        return Ok(Value::Null);
    }
    let items = values[0]
        .as_array()
        .ok_or_else(|| type_mismatch("$slice", "an array", &values[0]))?;
    let len = items.len();

    let (start, count) = if values.len() == 2 {
        let n = expect_i64("$slice", &values[1])?;
        if n >= 0 {
            (0, to_usize(n.unsigned_abs()))
        } else {
            let count = to_usize(n.unsigned_abs());
            (len.saturating_sub(count), count)
        }
    } else {
        let position = expect_i64("$slice", &values[1])?;
        let n = expect_i64("$slice", &values[2])?;
        if n <= 0 {
            return Err(DocMatchError::QueryShape(format!(
                "$slice count must be positive, got {}",
                n
            )));
        }
        let offset = to_usize(position.unsigned_abs());
        let start = if position < 0 {
            len.saturating_sub(offset)
        } else {
            offset.min(len)
        };
        (start, to_usize(n.unsigned_abs()))
    };

    Ok(Value::Array(items.iter().skip(start).take(count).cloned().collect()))
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn reverse_array(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$reverseArray", args, scope)?;
    Ok(match nullable_array("$reverseArray", value)? {
        Some(mut items) => {
            items.reverse();
            Value::Array(items)
        }
        None => Value::Null,
    })
}

fn is_in(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$in", args, scope, 2)?;
    let items = values[1]
        .as_array()
        .ok_or_else(|| type_mismatch("$in", "an array as its second argument", &values[1]))?;
    Ok(Value::Bool(
        items.iter().any(|item| values_equal(item, &values[0])),
    ))
}

fn is_array(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(evaluate_unary("$isArray", args, scope)?.is_array()))
}

fn first(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$first", args, scope)?;
    Ok(match nullable_array("$first", value)? {
        Some(items) => items.into_iter().next().unwrap_or(Value::Missing),
        None => Value::Null,
    })
}

fn last(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$last", args, scope)?;
    Ok(match nullable_array("$last", value)? {
        Some(items) => items.into_iter().last().unwrap_or(Value::Missing),
        None => Value::Null,
    })
}

/// `[array, search, start?, end?]` → index or -1
fn index_of_array(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_range("$indexOfArray", args, scope, 2, 4)?;
    if values[0].is_nullish() {
        return Ok(Value::Null);
    }
    let items = values[0]
        .as_array()
        .ok_or_else(|| type_mismatch("$indexOfArray", "an array", &values[0]))?;
    let start = match values.get(2) {
        Some(v) => expect_i64("$indexOfArray", v)?.max(0) as usize,
        None => 0,
    };
    let end = match values.get(3) {
        Some(v) => (expect_i64("$indexOfArray", v)?.max(0) as usize).min(items.len()),
        None => items.len(),
    };

    let found = (start..end).find(|&i| values_equal(&items[i], &values[1]));
    Ok(Value::Int(found.map(|i| i as i64).unwrap_or(-1)))
}

/// Largest array `$range` will build
const MAX_RANGE_LEN: i128 = 1_000_000;

/// `[start, end, step?]`, end exclusive
fn range(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_range("$range", args, scope, 2, 3)?;
    let start = expect_i64("$range", &values[0])?;
    let end = expect_i64("$range", &values[1])?;
    let step = match values.get(2) {
        Some(v) => expect_i64("$range", v)?,
        None => 1,
    };
    if step == 0 {
        return Err(DocMatchError::QueryShape(
            "$range requires a non-zero step value".to_string(),
        ));
    }

    let span = i128::from(end) - i128::from(start);
    let step = i128::from(step);
    let count = if span == 0 || (span > 0) != (step > 0) {
        0
    } else {
        (span.abs() + step.abs() - 1) / step.abs()
    };
    if count > MAX_RANGE_LEN {
        return Err(DocMatchError::LimitExceeded(format!(
            "$range would produce {} elements, more than the limit of {}",
            count, MAX_RANGE_LEN
        )));
    }

    // Every element lies between start and end, so it fits in an i64
    let out = (0..count)
        .map(|i| Value::Int((i128::from(start) + i * step) as i64))
        .collect();
    Ok(Value::Array(out))
}
