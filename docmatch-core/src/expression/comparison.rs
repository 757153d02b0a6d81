// src/expression/comparison.rs
//! Comparison, boolean and conditional operators

use super::{
    evaluate, evaluate_exact, evaluate_unary, named_args, required_arg, ExpressionFn, Scope,
};
use crate::error::{DocMatchError, Result};
use crate::value::{compare_values, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

pub(super) fn register(registry: &mut HashMap<&'static str, ExpressionFn>) {
    registry.insert("$eq", eq);
    registry.insert("$ne", ne);
    registry.insert("$gt", gt);
    registry.insert("$gte", gte);
    registry.insert("$lt", lt);
    registry.insert("$lte", lte);
    registry.insert("$cmp", cmp);
    registry.insert("$and", and);
    registry.insert("$or", or);
    registry.insert("$not", not);
    registry.insert("$cond", cond);
    registry.insert("$ifNull", if_null);
    registry.insert("$switch", switch);
}

// ============================================================================
// COMPARISON
// ============================================================================

fn compare(op: &str, args: &Value, scope: &Scope<'_>) -> Result<Ordering> {
    let values = evaluate_exact(op, args, scope, 2)?;
    Ok(compare_values(&values[0], &values[1]))
}

fn eq(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(compare("$eq", args, scope)? == Ordering::Equal))
}

fn ne(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(compare("$ne", args, scope)? != Ordering::Equal))
}

fn gt(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(compare("$gt", args, scope)? == Ordering::Greater))
}

fn gte(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(compare("$gte", args, scope)? != Ordering::Less))
}

fn lt(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(compare("$lt", args, scope)? == Ordering::Less))
}

fn lte(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(compare("$lte", args, scope)? != Ordering::Greater))
}

fn cmp(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Int(match compare("$cmp", args, scope)? {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

// ============================================================================
// BOOLEAN (short-circuiting)
// ============================================================================

fn arg_list(args: &Value) -> &[Value] {
    match args {
        Value::Array(items) => items,
        single => std::slice::from_ref(single),
    }
}

fn and(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    for arg in arg_list(args) {
        if !evaluate(arg, scope)?.is_truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn or(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    for arg in arg_list(args) {
        if evaluate(arg, scope)?.is_truthy() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn not(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(!evaluate_unary("$not", args, scope)?.is_truthy()))
}

// ============================================================================
// CONDITIONAL
// ============================================================================

/// `[if, then, else]` or `{if, then, else}`; only the chosen branch is evaluated
fn cond(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let (test, then, otherwise) = match args {
        Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Value::Array(items) => {
            return Err(DocMatchError::QueryShape(format!(
                "$cond requires exactly 3 arguments, got {}",
                items.len()
            )))
        }
        _ => {
            let spec = named_args("$cond", args, &["if", "then", "else"])?;
            (
                required_arg("$cond", spec, "if")?,
                required_arg("$cond", spec, "then")?,
                required_arg("$cond", spec, "else")?,
            )
        }
    };

    if evaluate(test, scope)?.is_truthy() {
        evaluate(then, scope)
    } else {
        evaluate(otherwise, scope)
    }
}

/// First argument that is neither null nor missing, else the last one
fn if_null(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let items = match args {
        Value::Array(items) if items.len() >= 2 => items,
        _ => {
            return Err(DocMatchError::QueryShape(
                "$ifNull requires at least 2 arguments".to_string(),
            ))
        }
    };

    let (last, candidates) = match items.split_last() {
        Some(split) => split,
        None => return Ok(Value::Null),
    };
    for candidate in candidates {
        let value = evaluate(candidate, scope)?;
        if !value.is_nullish() {
            return Ok(value);
        }
    }
    evaluate(last, scope)
}

/// `{branches: [{case, then}, ...], default?}`
fn switch(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let spec = named_args("$switch", args, &["branches", "default"])?;
    let branches = required_arg("$switch", spec, "branches")?
        .as_array()
        .ok_or_else(|| {
            DocMatchError::QueryShape("$switch expected an array for 'branches'".to_string())
        })?;

    for branch in branches {
        let branch = named_args("$switch", branch, &["case", "then"])?;
        let case = required_arg("$switch", branch, "case")?;
        let then = required_arg("$switch", branch, "then")?;
        if evaluate(case, scope)?.is_truthy() {
            return evaluate(then, scope);
        }
    }

    match spec.get("default") {
        Some(default) => evaluate(default, scope),
        None => Err(DocMatchError::TypeMismatch(
            "$switch could not find a matching branch for an input, and no default was specified"
                .to_string(),
        )),
    }
}
