// src/expression/arithmetic.rs
//! Arithmetic operators
//!
//! `Null`/`Missing` inputs make the result `Null`. Integer arithmetic stays
//! integral until it overflows, then continues in floating point.

use super::{
    evaluate_args, evaluate_exact, evaluate_unary, expect_f64, expect_i64, type_mismatch,
    ExpressionFn, Scope,
};
use crate::error::{DocMatchError, Result};
use crate::value::Value;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

pub(super) fn register(registry: &mut HashMap<&'static str, ExpressionFn>) {
    registry.insert("$add", add);
    registry.insert("$subtract", subtract);
    registry.insert("$multiply", multiply);
    registry.insert("$divide", divide);
    registry.insert("$mod", modulo);
    registry.insert("$pow", pow);
    registry.insert("$sqrt", sqrt);
    registry.insert("$abs", abs);
    registry.insert("$ceil", ceil);
    registry.insert("$floor", floor);
    registry.insert("$round", round);
    registry.insert("$trunc", trunc);
    registry.insert("$exp", exp);
    registry.insert("$ln", ln);
    registry.insert("$log10", log10);
}

fn any_nullish(values: &[Value]) -> bool {
    values.iter().any(Value::is_nullish)
}

/// Millisecond offset applied to a date; doubles are rounded
fn offset_millis(op: &str, amount: &Value) -> Result<i64> {
    if let Value::Int(millis) = amount {
        return Ok(*millis);
    }
    let millis = expect_f64(op, amount)?.round();
    if !millis.is_finite() || millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return Err(DocMatchError::Arithmetic(format!(
            "{} offset {} is not a representable number of milliseconds",
            op, millis
        )));
    }
    Ok(millis as i64)
}

/// Shift `date` by `millis`, failing when the result leaves the date range
fn shift_date(op: &str, date: DateTime<Utc>, millis: i64, forward: bool) -> Result<Value> {
    let delta = Duration::try_milliseconds(millis);
    let shifted = delta.and_then(|delta| {
        if forward {
            date.checked_add_signed(delta)
        } else {
            date.checked_sub_signed(delta)
        }
    });
    shifted.map(Value::Date).ok_or_else(|| {
        DocMatchError::Arithmetic(format!(
            "{}: shifting {} by {}ms leaves the date range",
            op,
            date.to_rfc3339(),
            millis
        ))
    })
}

fn add(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_args(args, scope)?;
    if any_nullish(&values) {
        return Ok(Value::Null);
    }

    let mut date = None;
    let mut int_sum = Some(0i64);
    let mut float_sum = 0.0f64;
    for value in &values {
        match value {
            Value::Date(d) => {
                if date.is_some() {
                    return Err(DocMatchError::TypeMismatch(
                        "$add only supports one date argument".to_string(),
                    ));
                }
                date = Some(*d);
            }
            Value::Int(i) => {
                int_sum = int_sum.and_then(|sum| sum.checked_add(*i));
                float_sum += *i as f64;
            }
            Value::Double(f) => {
                int_sum = None;
                float_sum += *f;
            }
            other => return Err(type_mismatch("$add", "numbers or a date", other)),
        }
    }

    if let Some(date) = date {
        let millis = match int_sum {
            Some(sum) => sum,
            None => offset_millis("$add", &Value::Double(float_sum))?,
        };
        return shift_date("$add", date, millis, true);
    }
    Ok(match int_sum {
        Some(sum) => Value::Int(sum),
        None => Value::Double(float_sum),
    })
}

fn subtract(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$subtract", args, scope, 2)?;
    if any_nullish(&values) {
        return Ok(Value::Null);
    }

    match (&values[0], &values[1]) {
        (Value::Date(a), Value::Date(b)) => Ok(Value::Int((*a - *b).num_milliseconds())),
        (Value::Date(a), n) if n.is_number() => {
            let millis = offset_millis("$subtract", n)?;
            shift_date("$subtract", *a, millis, false)
        }
        (Value::Int(a), Value::Int(b)) => Ok(match a.checked_sub(*b) {
            Some(diff) => Value::Int(diff),
            None => Value::Double(*a as f64 - *b as f64),
        }),
        (a, b) => {
            let a = expect_f64("$subtract", a)?;
            let b = expect_f64("$subtract", b)?;
            Ok(Value::Double(a - b))
        }
    }
}

fn multiply(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_args(args, scope)?;
    if any_nullish(&values) {
        return Ok(Value::Null);
    }

    let mut int_product = Some(1i64);
    let mut float_product = 1.0f64;
    for value in &values {
        match value {
            Value::Int(i) => {
                int_product = int_product.and_then(|p| p.checked_mul(*i));
                float_product *= *i as f64;
            }
            Value::Double(f) => {
                int_product = None;
                float_product *= *f;
            }
            other => return Err(type_mismatch("$multiply", "numbers", other)),
        }
    }

    Ok(match int_product {
        Some(product) => Value::Int(product),
        None => Value::Double(float_product),
    })
}

fn divide(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$divide", args, scope, 2)?;
    if any_nullish(&values) {
        return Ok(Value::Null);
    }

    let dividend = expect_f64("$divide", &values[0])?;
    let divisor = expect_f64("$divide", &values[1])?;
    if divisor == 0.0 {
        return Err(DocMatchError::Arithmetic("$divide by zero".to_string()));
    }
    Ok(Value::Double(dividend / divisor))
}

fn modulo(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$mod", args, scope, 2)?;
    if any_nullish(&values) {
        return Ok(Value::Null);
    }

    match (&values[0], &values[1]) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(DocMatchError::Arithmetic("$mod by zero".to_string()));
            }
            Ok(Value::Int(a.wrapping_rem(*b)))
        }
        (a, b) => {
            let a = expect_f64("$mod", a)?;
            let b = expect_f64("$mod", b)?;
            if b == 0.0 {
                return Err(DocMatchError::Arithmetic("$mod by zero".to_string()));
            }
            Ok(Value::Double(a % b))
        }
    }
}

fn pow(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$pow", args, scope, 2)?;
    if any_nullish(&values) {
        return Ok(Value::Null);
    }

    let base = expect_f64("$pow", &values[0])?;
    let exponent = expect_f64("$pow", &values[1])?;
    if base == 0.0 && exponent < 0.0 {
        return Err(DocMatchError::Arithmetic(
            "$pow cannot raise 0 to a negative exponent".to_string(),
        ));
    }

    if let (Value::Int(b), Value::Int(e)) = (&values[0], &values[1]) {
        if let Ok(e) = u32::try_from(*e) {
            if let Some(result) = b.checked_pow(e) {
                return Ok(Value::Int(result));
            }
        }
    }
    Ok(Value::Double(base.powf(exponent)))
}

fn sqrt(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$sqrt", args, scope)?;
    if value.is_nullish() {
        return Ok(Value::Null);
    }
    let n = expect_f64("$sqrt", &value)?;
    if n < 0.0 {
        return Err(DocMatchError::Arithmetic(
            "$sqrt's argument must be greater than or equal to 0".to_string(),
        ));
    }
    Ok(Value::Double(n.sqrt()))
}

fn abs(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match evaluate_unary("$abs", args, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::Int(i) => Ok(match i.checked_abs() {
            Some(a) => Value::Int(a),
            None => Value::Double((i as f64).abs()),
        }),
        Value::Double(f) => Ok(Value::Double(f.abs())),
        other => Err(type_mismatch("$abs", "a number", &other)),
    }
}

fn ceil(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    unary_float("$ceil", args, scope, f64::ceil)
}

fn floor(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    unary_float("$floor", args, scope, f64::floor)
}

/// Integers pass through untouched; doubles go through `f`
fn unary_float(op: &str, args: &Value, scope: &Scope<'_>, f: fn(f64) -> f64) -> Result<Value> {
    match evaluate_unary(op, args, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Double(d) => Ok(Value::Double(f(d))),
        other => Err(type_mismatch(op, "a number", &other)),
    }
}

fn round(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    round_to_places("$round", args, scope, f64::round)
}

fn trunc(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    round_to_places("$trunc", args, scope, f64::trunc)
}

/// `$round`/`$trunc`: `value` or `[value, places]`, places in -20..=100
///
/// `f64::round` rounds half away from zero.
fn round_to_places(op: &str, args: &Value, scope: &Scope<'_>, f: fn(f64) -> f64) -> Result<Value> {
    let values = evaluate_args(args, scope)?;
    if values.is_empty() || values.len() > 2 {
        return Err(DocMatchError::QueryShape(format!(
            "{} requires 1 or 2 arguments, got {}",
            op,
            values.len()
        )));
    }
    if any_nullish(&values) {
        return Ok(Value::Null);
    }

    let places = match values.get(1) {
        Some(places) => expect_i64(op, places)?,
        None => 0,
    };
    if !(-20..=100).contains(&places) {
        return Err(DocMatchError::QueryShape(format!(
            "{} places must be between -20 and 100, got {}",
            op, places
        )));
    }

    let scaled = |x: f64| {
        if places >= 0 {
            let factor = 10f64.powi(places as i32);
            f(x * factor) / factor
        } else {
            let unit = 10f64.powi(-places as i32);
            f(x / unit) * unit
        }
    };
    match &values[0] {
        Value::Int(i) if places >= 0 => Ok(Value::Int(*i)),
        Value::Int(i) => Ok(Value::Int(scaled(*i as f64) as i64)),
        Value::Double(d) if !d.is_finite() => Ok(Value::Double(*d)),
        Value::Double(d) => Ok(Value::Double(scaled(*d))),
        other => Err(type_mismatch(op, "a number", other)),
    }
}

fn exp(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$exp", args, scope)?;
    if value.is_nullish() {
        return Ok(Value::Null);
    }
    Ok(Value::Double(expect_f64("$exp", &value)?.exp()))
}

fn ln(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    positive_log("$ln", args, scope, f64::ln)
}

fn log10(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    positive_log("$log10", args, scope, f64::log10)
}

fn positive_log(op: &str, args: &Value, scope: &Scope<'_>, f: fn(f64) -> f64) -> Result<Value> {
    let value = evaluate_unary(op, args, scope)?;
    if value.is_nullish() {
        return Ok(Value::Null);
    }
    let n = expect_f64(op, &value)?;
    if n <= 0.0 {
        return Err(DocMatchError::Arithmetic(format!(
            "{}'s argument must be a positive number, got {}",
            op, n
        )));
    }
    Ok(Value::Double(f(n)))
}
