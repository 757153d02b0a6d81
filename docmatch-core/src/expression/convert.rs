// src/expression/convert.rs
//! Type inspection and conversion operators

use super::{evaluate_unary, type_mismatch, ExpressionFn, Scope};
use crate::error::{DocMatchError, Result};
use crate::value::Value;
use chrono::SecondsFormat;
use std::collections::HashMap;

pub(super) fn register(registry: &mut HashMap<&'static str, ExpressionFn>) {
    registry.insert("$type", type_of);
    registry.insert("$toInt", to_int);
    registry.insert("$toLong", to_long);
    registry.insert("$toDouble", to_double);
    registry.insert("$toBool", to_bool);
    registry.insert("$toString", to_string);
    registry.insert("$isNumber", is_number);
}

/// Type name of the evaluated argument; a missing path reports `"undefined"`
fn type_of(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$type", args, scope)?;
    Ok(Value::from(value.type_name()))
}

fn to_int(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    to_integer("$toInt", args, scope)
}

fn to_long(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    to_integer("$toLong", args, scope)
}

fn conversion_failed(op: &str, value: &Value) -> DocMatchError {
    DocMatchError::TypeMismatch(format!(
        "{} failed to convert {} value {}",
        op,
        value.type_name(),
        value.to_json()
    ))
}

/// Doubles truncate toward zero; strings must hold a base-10 integer
fn to_integer(op: &str, args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match evaluate_unary(op, args, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Double(f) if f.is_finite() && f.trunc().abs() < 9.2e18 => {
            Ok(Value::Int(f.trunc() as i64))
        }
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| conversion_failed(op, &Value::String(s.clone()))),
        other => Err(conversion_failed(op, &other)),
    }
}

fn to_double(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match evaluate_unary("$toDouble", args, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Double(i as f64)),
        Value::Double(f) => Ok(Value::Double(f)),
        Value::Bool(b) => Ok(Value::Double(if b { 1.0 } else { 0.0 })),
        Value::Date(d) => Ok(Value::Double(d.timestamp_millis() as f64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| conversion_failed("$toDouble", &Value::String(s.clone()))),
        other => Err(conversion_failed("$toDouble", &other)),
    }
}

/// Null and missing convert to `false`; every string is `true`
fn to_bool(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(match evaluate_unary("$toBool", args, scope)? {
        Value::String(_) => true,
        other => other.is_truthy(),
    }))
}

fn to_string(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match evaluate_unary("$toString", args, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s)),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        Value::Int(i) => Ok(Value::String(i.to_string())),
        Value::Double(f) => Ok(Value::String(f.to_string())),
        Value::Date(d) => Ok(Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))),
        other => Err(type_mismatch("$toString", "a scalar value", &other)),
    }
}

fn is_number(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    Ok(Value::Bool(evaluate_unary("$isNumber", args, scope)?.is_number()))
}
