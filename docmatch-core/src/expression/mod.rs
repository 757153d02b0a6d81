// src/expression/mod.rs
//! Aggregation expression evaluator
//!
//! An expression is a [`Value`] interpreted against a document:
//!
//! ```text
//! "$a.b"            field path, resolved with array mapping
//! "$$name.path"     variable reference ($$ROOT, $$CURRENT, $$REMOVE, bound vars)
//! {"$op": args}     operator invocation (exactly one `$`-key)
//! {"k": expr, ...}  object literal, every value evaluated
//! [expr, ...]       array literal, every element evaluated
//! anything else     constant
//! ```
//!
//! Operators receive their arguments unevaluated so that `$cond`, `$switch`,
//! `$and`/`$or`, `$map`, `$filter`, `$reduce`, `$let` and `$literal` control
//! evaluation themselves. Each operator family lives in its own file and
//! registers into [`EXPRESSION_OPERATORS`].

mod arithmetic;
mod array;
mod comparison;
mod convert;
mod date;
mod object;
pub mod scope;
mod string;

pub use scope::Scope;
pub(crate) use object::merge_into;

use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::value::Value;
use crate::value_utils::resolve_path;
use lazy_static::lazy_static;
use std::collections::HashMap;

/// Signature shared by every expression operator
pub type ExpressionFn = fn(&Value, &Scope<'_>) -> Result<Value>;

lazy_static! {
    /// Global registry of expression operators
    pub static ref EXPRESSION_OPERATORS: HashMap<&'static str, ExpressionFn> = {
        let mut registry: HashMap<&'static str, ExpressionFn> = HashMap::new();
        arithmetic::register(&mut registry);
        string::register(&mut registry);
        comparison::register(&mut registry);
        date::register(&mut registry);
        array::register(&mut registry);
        convert::register(&mut registry);
        object::register(&mut registry);
        registry
    };
}

/// Evaluate `expression` against `scope`
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docmatch_core::expression::{evaluate, Scope};
/// use docmatch_core::value::Value;
///
/// let doc = Value::from(json!({"price": 10, "qty": 6}));
/// let expr = Value::from(json!({"$multiply": ["$price", "$qty"]}));
/// assert_eq!(evaluate(&expr, &Scope::new(&doc)).unwrap(), Value::Int(60));
/// ```
pub fn evaluate(expression: &Value, scope: &Scope<'_>) -> Result<Value> {
    match expression {
        Value::String(s) if s.starts_with("$$") => scope.resolve_variable(&s[2..]),
        Value::String(s) if s.starts_with('$') => {
            let path = &s[1..];
            if path.is_empty() {
                return Err(DocMatchError::QueryShape(
                    "'$' is not a valid field path".to_string(),
                ));
            }
            Ok(resolve_path(scope.root(), path))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, scope).map(Value::or_null))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(doc) => evaluate_object(doc, scope),
        constant => Ok(constant.clone()),
    }
}

/// Evaluate `expression` with `document` as `$$ROOT`
pub fn evaluate_on(expression: &Value, document: &Value) -> Result<Value> {
    evaluate(expression, &Scope::new(document))
}

fn evaluate_object(doc: &Document, scope: &Scope<'_>) -> Result<Value> {
    if let Some((name, args)) = operator_invocation(doc)? {
        let operator = EXPRESSION_OPERATORS
            .get(name.as_str())
            .ok_or_else(|| unknown_operator(name))?;
        return operator(args, scope);
    }

    let mut out = Document::with_capacity(doc.len());
    for (key, value) in doc {
        let evaluated = evaluate(value, scope)?;
        if !evaluated.is_missing() {
            out.insert(key.clone(), evaluated);
        }
    }
    Ok(Value::Object(out))
}

/// Check an expression's shape without evaluating it
///
/// Reports unknown operators and objects that mix operator and field keys.
/// Arguments of `$literal` are not inspected.
pub fn validate(expression: &Value) -> Result<()> {
    match expression {
        Value::Array(items) => items.iter().try_for_each(validate),
        Value::Object(doc) => match operator_invocation(doc)? {
            Some((name, args)) => {
                if !EXPRESSION_OPERATORS.contains_key(name.as_str()) {
                    return Err(unknown_operator(name));
                }
                if name == "$literal" {
                    Ok(())
                } else {
                    validate(args)
                }
            }
            None => doc.values().try_for_each(validate),
        },
        _ => Ok(()),
    }
}

/// The `(name, args)` pair when `doc` is an operator invocation
///
/// An object with a `$`-key must have exactly one key.
pub(crate) fn operator_invocation(doc: &Document) -> Result<Option<(&String, &Value)>> {
    if !doc.keys().any(|k| k.starts_with('$')) {
        return Ok(None);
    }
    if doc.len() != 1 {
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        return Err(DocMatchError::QueryShape(format!(
            "an expression object with an operator must have exactly one field, found: {}",
            keys.join(", ")
        )));
    }
    Ok(doc.first())
}

fn unknown_operator(name: &str) -> DocMatchError {
    DocMatchError::QueryShape(format!("Unknown expression operator: {}", name))
}

// ============================================================================
// ARGUMENT HELPERS (shared by the operator families)
// ============================================================================

/// Evaluate a list of arguments; a non-array argument is a list of one
pub(crate) fn evaluate_args(args: &Value, scope: &Scope<'_>) -> Result<Vec<Value>> {
    match args {
        Value::Array(items) => items.iter().map(|item| evaluate(item, scope)).collect(),
        single => Ok(vec![evaluate(single, scope)?]),
    }
}

/// Evaluate exactly `count` arguments
pub(crate) fn evaluate_exact(
    op: &str,
    args: &Value,
    scope: &Scope<'_>,
    count: usize,
) -> Result<Vec<Value>> {
    let values = evaluate_args(args, scope)?;
    if values.len() != count {
        return Err(DocMatchError::QueryShape(format!(
            "{} requires exactly {} arguments, got {}",
            op,
            count,
            values.len()
        )));
    }
    Ok(values)
}

/// Evaluate between `min` and `max` arguments
pub(crate) fn evaluate_range(
    op: &str,
    args: &Value,
    scope: &Scope<'_>,
    min: usize,
    max: usize,
) -> Result<Vec<Value>> {
    let values = evaluate_args(args, scope)?;
    if values.len() < min || values.len() > max {
        return Err(DocMatchError::QueryShape(format!(
            "{} requires between {} and {} arguments, got {}",
            op,
            min,
            max,
            values.len()
        )));
    }
    Ok(values)
}

/// Evaluate the single argument of a unary operator, given as `x` or `[x]`
pub(crate) fn evaluate_unary(op: &str, args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match args {
        Value::Array(items) if items.len() == 1 => evaluate(&items[0], scope),
        Value::Array(items) => Err(DocMatchError::QueryShape(format!(
            "{} takes exactly 1 argument, got {}",
            op,
            items.len()
        ))),
        single => evaluate(single, scope),
    }
}

/// Named-argument operators (`$filter`, `$dateToString`, ...) take an object
pub(crate) fn named_args<'a>(op: &str, args: &'a Value, allowed: &[&str]) -> Result<&'a Document> {
    let doc = args.as_object().ok_or_else(|| {
        DocMatchError::QueryShape(format!("{} requires an object argument", op))
    })?;
    if let Some(unknown) = doc.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(DocMatchError::QueryShape(format!(
            "{} found an unknown argument: {}",
            op, unknown
        )));
    }
    Ok(doc)
}

/// A required named argument
pub(crate) fn required_arg<'a>(op: &str, doc: &'a Document, name: &str) -> Result<&'a Value> {
    doc.get(name).ok_or_else(|| {
        DocMatchError::QueryShape(format!("{} requires '{}' to be specified", op, name))
    })
}

pub(crate) fn type_mismatch(op: &str, expected: &str, found: &Value) -> DocMatchError {
    DocMatchError::TypeMismatch(format!(
        "{} requires {}, found {}",
        op,
        expected,
        found.type_name()
    ))
}

/// Numeric argument as `f64`
pub(crate) fn expect_f64(op: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| type_mismatch(op, "a number", value))
}

/// Integral numeric argument
pub(crate) fn expect_i64(op: &str, value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| type_mismatch(op, "an integer", value))
}
