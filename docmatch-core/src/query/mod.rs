// src/query/mod.rs
//! Query matching for MongoDB-style filter documents
//!
//! A filter is an object whose keys are either field paths or top-level
//! operators:
//!
//! ```text
//! {"age": {"$gte": 18}, "tags": "red", "$or": [{...}, {...}]}
//!   │       │                 │          └─ document operator (logical.rs)
//!   │       │                 └─ literal: implicit $eq
//!   │       └─ operator object: exactly one field operator (operators.rs)
//!   └─ dot path, fanned out over arrays (value_utils::collect_path_values)
//! ```
//!
//! Clauses are ANDed. Matching is pure: the same document and filter always
//! give the same answer.

pub mod logical;
pub mod operators;
pub mod schema;

use std::borrow::Cow;
use std::fmt;

use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::value::Value;
use crate::value_utils::collect_path_values;
use operators::{EqOperator, OperatorMatcher};

// ============================================================================
// TEXT SEARCH HOOK
// ============================================================================

/// Collaborator that decides `$text` clauses
///
/// The argument is the whole `$text` object (`{$search, $language, ...}`).
pub trait TextSearch: Send + Sync {
    fn matches(&self, document: &Value, search: &Value) -> Result<bool>;
}

/// Per-call matching context
#[derive(Clone, Copy, Default)]
pub struct MatchContext<'a> {
    text_search: Option<&'a dyn TextSearch>,
}

impl<'a> MatchContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text_search(mut self, text_search: &'a dyn TextSearch) -> Self {
        self.text_search = Some(text_search);
        self
    }

    pub fn text_search(&self) -> Option<&'a dyn TextSearch> {
        self.text_search
    }
}

impl fmt::Debug for MatchContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchContext")
            .field("text_search", &self.text_search.is_some())
            .finish()
    }
}

// ============================================================================
// QUERY
// ============================================================================

/// A filter whose shape has been checked up front
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docmatch_core::query::Query;
/// use docmatch_core::value::Value;
///
/// let query = Query::new(Value::from(json!({"age": {"$gte": 18}}))).unwrap();
/// assert!(query.matches(&Value::from(json!({"age": 30}))).unwrap());
/// assert!(Query::new(Value::from(json!({"age": {"$bogus": 1}}))).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    filter: Value,
}

impl Query {
    /// Validate operator names, operator arity and argument shapes
    pub fn new(filter: Value) -> Result<Self> {
        validate_filter(&filter)?;
        Ok(Self { filter })
    }

    pub fn from_json(filter: &serde_json::Value) -> Result<Self> {
        Self::new(Value::from(filter.clone()))
    }

    pub fn filter(&self) -> &Value {
        &self.filter
    }

    /// `{}` matches every document
    pub fn is_empty(&self) -> bool {
        self.filter.as_object().map(Document::is_empty).unwrap_or(false)
    }

    pub fn matches(&self, document: &Value) -> Result<bool> {
        matches_filter(document, &self.filter, &MatchContext::default())
    }

    pub fn matches_with(&self, document: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        matches_filter(document, &self.filter, ctx)
    }
}

/// Validate `filter`, then test `document` against it
pub fn matches(document: &Value, filter: &Value) -> Result<bool> {
    matches_with(document, filter, &MatchContext::default())
}

/// [`matches`] with a caller-supplied context (e.g. a `$text` hook)
pub fn matches_with(document: &Value, filter: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
    validate_filter(filter)?;
    matches_filter(document, filter, ctx)
}

// ============================================================================
// MATCHING
// ============================================================================

/// Test `document` against an already validated `filter`
///
/// Malformed operator arguments are still reported when they are reached.
pub fn matches_filter(document: &Value, filter: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
    for (key, condition) in filter_clauses(filter)? {
        let matched = if key.starts_with('$') {
            logical::lookup(key)?.matches(document, condition, ctx)?
        } else {
            matches_field(document, key, condition, ctx)?
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_field(document: &Value, path: &str, condition: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
    let candidates = collect_path_values(document, path);
    match operator_object(condition)? {
        Some(ops) => matches_operator_object(&candidates, ops, ctx),
        None => EqOperator.matches_candidates(&candidates, condition, ctx),
    }
}

/// Apply a single-operator object to the values a path reached
pub(crate) fn matches_operator_object(
    candidates: &[&Value],
    ops: &Document,
    ctx: &MatchContext<'_>,
) -> Result<bool> {
    let call = single_operator(ops)?;
    operators::lookup(call.name)?.matches_candidates(candidates, &call.arg, ctx)
}

fn filter_clauses(filter: &Value) -> Result<&Document> {
    filter.as_object().ok_or_else(|| {
        DocMatchError::QueryShape(format!(
            "filter must be an object, got {}",
            filter.type_name()
        ))
    })
}

/// `Some` when the clause value is an operator object
///
/// Objects with no `$`-keys are literals; mixing both kinds is an error.
fn operator_object(condition: &Value) -> Result<Option<&Document>> {
    let Value::Object(doc) = condition else {
        return Ok(None);
    };
    let operator_keys = doc.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys == 0 {
        return Ok(None);
    }
    if operator_keys != doc.len() {
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        return Err(DocMatchError::QueryShape(format!(
            "cannot mix operators and field names in a condition: {{{}}}",
            keys.join(", ")
        )));
    }
    Ok(Some(doc))
}

// ============================================================================
// OPERATOR OBJECTS
// ============================================================================

/// One operator of an operator object
pub(crate) struct OperatorCall<'a> {
    pub(crate) name: &'a str,
    pub(crate) arg: Cow<'a, Value>,
}

/// Every operator in `ops`, with `$options` folded into `$regex`
pub(crate) fn split_operators(ops: &Document) -> Result<Vec<OperatorCall<'_>>> {
    let options = ops.get("$options");
    if options.is_some() && !ops.contains_key("$regex") {
        return Err(DocMatchError::QueryShape(
            "$options needs a $regex".to_string(),
        ));
    }

    let mut calls = Vec::with_capacity(ops.len());
    for (name, arg) in ops {
        let arg = match (name.as_str(), options) {
            ("$options", _) => continue,
            ("$regex", Some(options)) => {
                let mut folded = Document::with_capacity(2);
                folded.insert("$regex", arg.clone());
                folded.insert("$options", options.clone());
                Cow::Owned(Value::Object(folded))
            }
            _ => Cow::Borrowed(arg),
        };
        calls.push(OperatorCall { name: name.as_str(), arg });
    }
    Ok(calls)
}

/// The one operator an operator object may carry
fn single_operator(ops: &Document) -> Result<OperatorCall<'_>> {
    let mut calls = split_operators(ops)?;
    if calls.len() != 1 {
        let names: Vec<&str> = calls.iter().map(|call| call.name).collect();
        return Err(DocMatchError::QueryShape(format!(
            "an operator object must hold exactly one operator, found [{}]",
            names.join(", ")
        )));
    }
    calls.pop().ok_or_else(|| {
        DocMatchError::QueryShape("empty operator object".to_string())
    })
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Check a filter's shape without matching anything
pub fn validate_filter(filter: &Value) -> Result<()> {
    for (key, condition) in filter_clauses(filter)? {
        if key.starts_with('$') {
            logical::lookup(key)?.validate(condition)?;
        } else if let Some(ops) = operator_object(condition)? {
            validate_operator_object(ops)?;
        }
    }
    Ok(())
}

pub(crate) fn validate_operator_object(ops: &Document) -> Result<()> {
    let call = single_operator(ops)?;
    operators::lookup(call.name)?.validate(&call.arg)
}
