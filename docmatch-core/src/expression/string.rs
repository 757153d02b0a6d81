// src/expression/string.rs
//! String operators. Positions and lengths count Unicode code points.

use super::{
    evaluate, evaluate_args, evaluate_exact, evaluate_range, evaluate_unary, expect_i64,
    named_args, required_arg, type_mismatch, ExpressionFn, Scope,
};
use crate::error::{DocMatchError, Result};
use crate::value::Value;
use std::collections::HashMap;

pub(super) fn register(registry: &mut HashMap<&'static str, ExpressionFn>) {
    registry.insert("$concat", concat);
    registry.insert("$toLower", to_lower);
    registry.insert("$toUpper", to_upper);
    registry.insert("$substr", substr);
    registry.insert("$substrCP", substr);
    registry.insert("$split", split);
    registry.insert("$strLenCP", str_len);
    registry.insert("$trim", trim);
    registry.insert("$ltrim", ltrim);
    registry.insert("$rtrim", rtrim);
    registry.insert("$replaceOne", replace_one);
    registry.insert("$replaceAll", replace_all);
    registry.insert("$indexOfCP", index_of);
    registry.insert("$strcasecmp", strcasecmp);
}

fn concat(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_args(args, scope)?;
    let mut out = String::new();
    for value in &values {
        match value {
            v if v.is_nullish() => return Ok(Value::Null),
            Value::String(s) => out.push_str(s),
            other => return Err(type_mismatch("$concat", "strings", other)),
        }
    }
    Ok(Value::String(out))
}

/// String argument where `Null`/`Missing` reads as the empty string
fn string_or_empty(op: &str, value: &Value) -> Result<String> {
    match value {
        v if v.is_nullish() => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Double(f) => Ok(f.to_string()),
        other => Err(type_mismatch(op, "a string", other)),
    }
}

fn to_lower(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$toLower", args, scope)?;
    Ok(Value::String(string_or_empty("$toLower", &value)?.to_lowercase()))
}

fn to_upper(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$toUpper", args, scope)?;
    Ok(Value::String(string_or_empty("$toUpper", &value)?.to_uppercase()))
}

/// `[string, start, length]`; a negative length takes the rest
fn substr(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$substrCP", args, scope, 3)?;
    let text = string_or_empty("$substrCP", &values[0])?;
    let start = expect_i64("$substrCP", &values[1])?;
    let length = expect_i64("$substrCP", &values[2])?;
    if start < 0 {
        return Err(DocMatchError::QueryShape(format!(
            "$substrCP start must be non-negative, got {}",
            start
        )));
    }

    let chars = text.chars().skip(start as usize);
    let out: String = if length < 0 {
        chars.collect()
    } else {
        chars.take(length as usize).collect()
    };
    Ok(Value::String(out))
}

fn split(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$split", args, scope, 2)?;
    if values[0].is_nullish() {
        return Ok(Value::Null);
    }
    let text = values[0]
        .as_str()
        .ok_or_else(|| type_mismatch("$split", "a string to split", &values[0]))?;
    let delimiter = values[1]
        .as_str()
        .ok_or_else(|| type_mismatch("$split", "a string delimiter", &values[1]))?;
    if delimiter.is_empty() {
        return Err(DocMatchError::QueryShape(
            "$split requires a non-empty delimiter".to_string(),
        ));
    }
    Ok(Value::Array(
        text.split(delimiter).map(Value::from).collect(),
    ))
}

fn str_len(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let value = evaluate_unary("$strLenCP", args, scope)?;
    let text = value
        .as_str()
        .ok_or_else(|| type_mismatch("$strLenCP", "a string", &value))?;
    Ok(Value::Int(text.chars().count() as i64))
}

#[derive(Clone, Copy)]
enum TrimSide {
    Both,
    Start,
    End,
}

fn trim(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    trim_impl("$trim", args, scope, TrimSide::Both)
}

fn ltrim(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    trim_impl("$ltrim", args, scope, TrimSide::Start)
}

fn rtrim(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    trim_impl("$rtrim", args, scope, TrimSide::End)
}

/// `{input, chars?}`; without `chars`, whitespace is trimmed
fn trim_impl(op: &str, args: &Value, scope: &Scope<'_>, side: TrimSide) -> Result<Value> {
    let spec = named_args(op, args, &["input", "chars"])?;
    let input = evaluate(required_arg(op, spec, "input")?, scope)?;
    if input.is_nullish() {
        return Ok(Value::Null);
    }
    let text = input
        .as_str()
        .ok_or_else(|| type_mismatch(op, "a string input", &input))?;

    let chars: Option<Vec<char>> = match spec.get("chars") {
        Some(expr) => match evaluate(expr, scope)? {
            v if v.is_nullish() => return Ok(Value::Null),
            Value::String(s) => Some(s.chars().collect()),
            other => return Err(type_mismatch(op, "a string for 'chars'", &other)),
        },
        None => None,
    };
    let strip = |c: char| match &chars {
        Some(set) => set.contains(&c),
        None => c.is_whitespace() || c == '\0',
    };

    let out = match side {
        TrimSide::Both => text.trim_matches(strip),
        TrimSide::Start => text.trim_start_matches(strip),
        TrimSide::End => text.trim_end_matches(strip),
    };
    Ok(Value::String(out.to_string()))
}

fn replace_one(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    replace_impl("$replaceOne", args, scope, Some(1))
}

fn replace_all(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    replace_impl("$replaceAll", args, scope, None)
}

/// `{input, find, replacement}`; any null argument yields null
fn replace_impl(op: &str, args: &Value, scope: &Scope<'_>, count: Option<usize>) -> Result<Value> {
    let spec = named_args(op, args, &["input", "find", "replacement"])?;
    let mut parts = Vec::with_capacity(3);
    for name in ["input", "find", "replacement"] {
        parts.push(evaluate(required_arg(op, spec, name)?, scope)?);
    }
    if parts.iter().any(Value::is_nullish) {
        return Ok(Value::Null);
    }

    let mut strings = Vec::with_capacity(3);
    for part in &parts {
        strings.push(
            part.as_str()
                .ok_or_else(|| type_mismatch(op, "string arguments", part))?,
        );
    }
    let (input, find, replacement) = (strings[0], strings[1], strings[2]);

    Ok(Value::String(match count {
        Some(n) => input.replacen(find, replacement, n),
        None => input.replace(find, replacement),
    }))
}

/// `[string, substring, start?, end?]` → code point index or -1
fn index_of(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_range("$indexOfCP", args, scope, 2, 4)?;
    if values[0].is_nullish() {
        return Ok(Value::Null);
    }
    let text = values[0]
        .as_str()
        .ok_or_else(|| type_mismatch("$indexOfCP", "a string", &values[0]))?;
    let needle = values[1]
        .as_str()
        .ok_or_else(|| type_mismatch("$indexOfCP", "a string to search for", &values[1]))?;

    let chars: Vec<char> = text.chars().collect();
    let needle: Vec<char> = needle.chars().collect();
    let start = match values.get(2) {
        Some(v) => expect_i64("$indexOfCP", v)?.max(0) as usize,
        None => 0,
    };
    let end = match values.get(3) {
        Some(v) => (expect_i64("$indexOfCP", v)?.max(0) as usize).min(chars.len()),
        None => chars.len(),
    };

    if start > end {
        return Ok(Value::Int(-1));
    }
    let found = (start..=end.saturating_sub(needle.len()))
        .take_while(|i| i + needle.len() <= end)
        .find(|&i| chars[i..i + needle.len()] == needle[..]);
    Ok(Value::Int(found.map(|i| i as i64).unwrap_or(-1)))
}

fn strcasecmp(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let values = evaluate_exact("$strcasecmp", args, scope, 2)?;
    let a = string_or_empty("$strcasecmp", &values[0])?.to_lowercase();
    let b = string_or_empty("$strcasecmp", &values[1])?.to_lowercase();
    Ok(Value::Int(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}
